//! Service enumeration, configuration and `QueryServiceConfig2W` payloads.

use serde::Serialize;
use uuid::Uuid;

use crate::decode::{BufferView, Record, RecordDecoder, decode_records};
use crate::error::QueryError;
use crate::guid;
use crate::layout::{
    ENUM_SERVICE_STATUS_PROCESSW, PointerWidth, QUERY_SERVICE_CONFIGW, SC_ACTION,
    SERVICE_DELAYED_AUTO_START_INFO, SERVICE_DESCRIPTIONW, SERVICE_FAILURE_ACTIONS_FLAG,
    SERVICE_FAILURE_ACTIONSW, SERVICE_LAUNCH_PROTECTED_INFO, SERVICE_PRESHUTDOWN_INFO,
    SERVICE_REQUIRED_PRIVILEGES_INFOW, SERVICE_SID_INFO, SERVICE_STATUS_PROCESS, SERVICE_TRIGGER,
    SERVICE_TRIGGER_INFO, SERVICE_TRIGGER_SPECIFIC_DATA_ITEM, StructLayout, TRIGGER_KEYWORD,
    TRIGGER_LEVEL,
};
use crate::names;

/// A raw native constant next to its symbolic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Named {
    pub value: u32,
    pub name: &'static str,
}

impl Named {
    fn new(value: u32, table: fn(u32) -> &'static str) -> Self {
        Self {
            value,
            name: table(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusProcess {
    pub service_type: Named,
    pub current_state: Named,
    pub controls_accepted: u32,
    pub win32_exit_code: u32,
    pub service_specific_exit_code: u32,
    pub check_point: u32,
    pub wait_hint: u32,
    pub process_id: u32,
    pub service_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub status: ServiceStatusProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub service_type: Named,
    pub start_type: Named,
    pub error_control: Named,
    pub binary_path: Option<String>,
    pub load_order_group: Option<String>,
    pub tag_id: u32,
    pub dependencies: Vec<String>,
    pub start_name: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScAction {
    pub action: Named,
    pub delay_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureActions {
    pub reset_period_secs: u32,
    pub reboot_message: Option<String>,
    pub command: Option<String>,
    pub actions: Vec<ScAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TriggerData {
    Binary(Vec<u8>),
    Strings(Vec<String>),
    Level(u8),
    Keyword(u64),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerDataItem {
    pub data_type: Named,
    pub data: TriggerData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTrigger {
    pub trigger_type: Named,
    pub action: Named,
    #[serde(serialize_with = "guid::serialize_opt")]
    pub subtype: Option<Uuid>,
    pub subtype_name: Option<&'static str>,
    pub data_items: Vec<TriggerDataItem>,
}

/// `QueryServiceConfig2W` information levels this crate decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Config2Level {
    Description,
    FailureActions,
    DelayedAutoStart,
    FailureActionsFlag,
    SidInfo,
    RequiredPrivileges,
    PreshutdownInfo,
    TriggerInfo,
    LaunchProtected,
}

impl Config2Level {
    pub const ALL: [Config2Level; 9] = [
        Config2Level::Description,
        Config2Level::FailureActions,
        Config2Level::DelayedAutoStart,
        Config2Level::FailureActionsFlag,
        Config2Level::SidInfo,
        Config2Level::RequiredPrivileges,
        Config2Level::PreshutdownInfo,
        Config2Level::TriggerInfo,
        Config2Level::LaunchProtected,
    ];

    pub fn code(self) -> u32 {
        match self {
            Config2Level::Description => 1,
            Config2Level::FailureActions => 2,
            Config2Level::DelayedAutoStart => 3,
            Config2Level::FailureActionsFlag => 4,
            Config2Level::SidInfo => 5,
            Config2Level::RequiredPrivileges => 6,
            Config2Level::PreshutdownInfo => 7,
            Config2Level::TriggerInfo => 8,
            Config2Level::LaunchProtected => 12,
        }
    }

    fn layout(self) -> &'static StructLayout {
        match self {
            Config2Level::Description => &SERVICE_DESCRIPTIONW,
            Config2Level::FailureActions => &SERVICE_FAILURE_ACTIONSW,
            Config2Level::DelayedAutoStart => &SERVICE_DELAYED_AUTO_START_INFO,
            Config2Level::FailureActionsFlag => &SERVICE_FAILURE_ACTIONS_FLAG,
            Config2Level::SidInfo => &SERVICE_SID_INFO,
            Config2Level::RequiredPrivileges => &SERVICE_REQUIRED_PRIVILEGES_INFOW,
            Config2Level::PreshutdownInfo => &SERVICE_PRESHUTDOWN_INFO,
            Config2Level::TriggerInfo => &SERVICE_TRIGGER_INFO,
            Config2Level::LaunchProtected => &SERVICE_LAUNCH_PROTECTED_INFO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Config2Value {
    Description(Option<String>),
    FailureActions(FailureActions),
    DelayedAutoStart(bool),
    FailureActionsOnNonCrash(bool),
    SidType(Named),
    RequiredPrivileges(Vec<String>),
    PreshutdownTimeoutMs(u32),
    Triggers(Vec<ServiceTrigger>),
    LaunchProtected(Named),
}

fn decode_status(rec: &Record<'_, '_>) -> Result<ServiceStatusProcess, QueryError> {
    Ok(ServiceStatusProcess {
        service_type: Named::new(rec.u32("dwServiceType")?, names::service_type),
        current_state: Named::new(rec.u32("dwCurrentState")?, names::service_state),
        controls_accepted: rec.u32("dwControlsAccepted")?,
        win32_exit_code: rec.u32("dwWin32ExitCode")?,
        service_specific_exit_code: rec.u32("dwServiceSpecificExitCode")?,
        check_point: rec.u32("dwCheckPoint")?,
        wait_hint: rec.u32("dwWaitHint")?,
        process_id: rec.u32("dwProcessId")?,
        service_flags: rec.u32("dwServiceFlags")?,
    })
}

/// Decodes `ENUM_SERVICE_STATUS_PROCESSW` arrays from `EnumServicesStatusExW`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceEnumDecoder {
    width: PointerWidth,
}

impl ServiceEnumDecoder {
    pub fn new(width: PointerWidth) -> Self {
        Self { width }
    }
}

impl RecordDecoder for ServiceEnumDecoder {
    type Record = ServiceEntry;

    fn width(&self) -> PointerWidth {
        self.width
    }

    fn decode(&self, view: BufferView<'_>, count: usize) -> Result<Vec<ServiceEntry>, QueryError> {
        let layout = ENUM_SERVICE_STATUS_PROCESSW.resolve(self.width);
        let status_layout = SERVICE_STATUS_PROCESS.resolve(self.width);
        decode_records(view, &layout, count, |rec| {
            let name = rec.string("lpServiceName")?.ok_or_else(|| {
                QueryError::malformed(ENUM_SERVICE_STATUS_PROCESSW.name, "服务名为空")
            })?;
            Ok(ServiceEntry {
                name,
                display_name: rec.string("lpDisplayName")?,
                status: decode_status(&rec.nested("ServiceStatusProcess", &status_layout)?)?,
            })
        })
    }
}

/// Decodes the `SERVICE_STATUS_PROCESS` written by `QueryServiceStatusEx`.
#[allow(clippy::missing_errors_doc)]
pub fn decode_status_process(view: BufferView<'_>) -> Result<ServiceStatusProcess, QueryError> {
    let layout = SERVICE_STATUS_PROCESS.resolve(view.width());
    decode_status(&view.record(&layout, 0)?)
}

#[allow(clippy::missing_errors_doc)]
pub fn decode_service_config(view: BufferView<'_>) -> Result<ServiceConfig, QueryError> {
    let layout = QUERY_SERVICE_CONFIGW.resolve(view.width());
    let rec = view.record(&layout, 0)?;
    Ok(ServiceConfig {
        service_type: Named::new(rec.u32("dwServiceType")?, names::service_type),
        start_type: Named::new(rec.u32("dwStartType")?, names::start_type),
        error_control: Named::new(rec.u32("dwErrorControl")?, names::error_control),
        binary_path: rec.string("lpBinaryPathName")?,
        load_order_group: rec.string("lpLoadOrderGroup")?,
        tag_id: rec.u32("dwTagId")?,
        dependencies: rec.multi_string("lpDependencies", None)?,
        start_name: rec.string("lpServiceStartName")?,
        display_name: rec.string("lpDisplayName")?,
    })
}

fn decode_failure_actions(rec: &Record<'_, '_>) -> Result<FailureActions, QueryError> {
    let view = rec.view();
    let action_layout = SC_ACTION.resolve(view.width());
    let actions = view
        .trailing_array(rec.pointer("lpsaActions")?, rec.count("cActions")?, &action_layout)?
        .iter()
        .map(|a| -> Result<ScAction, QueryError> {
            Ok(ScAction {
                action: Named::new(a.u32("Type")?, names::action_type),
                delay_ms: a.u32("Delay")?,
            })
        })
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(FailureActions {
        reset_period_secs: rec.u32("dwResetPeriod")?,
        reboot_message: rec.string("lpRebootMsg")?,
        command: rec.string("lpCommand")?,
        actions,
    })
}

fn decode_data_item(item: &Record<'_, '_>) -> Result<TriggerDataItem, QueryError> {
    const RECORD: &str = "SERVICE_TRIGGER_SPECIFIC_DATA_ITEM";
    let view = item.view();
    let data_type = item.u32("dwDataType")?;
    let len = item.count("cbData")?;
    let ptr = item.pointer("pData")?;

    let data = if len == 0 {
        match data_type {
            2 => TriggerData::Strings(Vec::new()),
            _ => TriggerData::Binary(Vec::new()),
        }
    } else {
        let off = view
            .pointer_offset(ptr, RECORD)?
            .ok_or_else(|| {
                QueryError::malformed(RECORD, format!("声明了 {len} 字节但数据指针为空"))
            })?;
        match data_type {
            1 => TriggerData::Binary(view.slice(off, len, RECORD)?.to_vec()),
            2 => TriggerData::Strings(view.multi_sz_at(off, Some(len), RECORD)?),
            3 => {
                let layout = TRIGGER_LEVEL.resolve(view.width());
                TriggerData::Level(view.record(&layout, off)?.u8("Level")?)
            }
            4 | 5 => {
                let layout = TRIGGER_KEYWORD.resolve(view.width());
                TriggerData::Keyword(view.record(&layout, off)?.u64("Keyword")?)
            }
            _ => TriggerData::Unknown(view.slice(off, len, RECORD)?.to_vec()),
        }
    };
    Ok(TriggerDataItem {
        data_type: Named::new(data_type, names::data_type),
        data,
    })
}

fn decode_trigger(rec: &Record<'_, '_>) -> Result<ServiceTrigger, QueryError> {
    let view = rec.view();
    let item_layout = SERVICE_TRIGGER_SPECIFIC_DATA_ITEM.resolve(view.width());
    let subtype = view.guid_ptr(rec.pointer("pTriggerSubtype")?, SERVICE_TRIGGER.name)?;
    let data_items = view
        .trailing_array(rec.pointer("pDataItems")?, rec.count("cDataItems")?, &item_layout)?
        .iter()
        .map(decode_data_item)
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(ServiceTrigger {
        trigger_type: Named::new(rec.u32("dwTriggerType")?, names::trigger_type),
        action: Named::new(rec.u32("dwAction")?, names::trigger_action),
        subtype_name: subtype.as_ref().and_then(names::trigger_subtype),
        subtype,
        data_items,
    })
}

fn decode_triggers(rec: &Record<'_, '_>) -> Result<Vec<ServiceTrigger>, QueryError> {
    let view = rec.view();
    let trigger_layout = SERVICE_TRIGGER.resolve(view.width());
    view.trailing_array(rec.pointer("pTriggers")?, rec.count("cTriggers")?, &trigger_layout)?
        .iter()
        .map(decode_trigger)
        .collect()
}

/// Decodes one `QueryServiceConfig2W` blob at `level`.
#[allow(clippy::missing_errors_doc)]
pub fn decode_config2(
    level: Config2Level,
    view: BufferView<'_>,
) -> Result<Config2Value, QueryError> {
    let layout = level.layout().resolve(view.width());
    let rec = view.record(&layout, 0)?;
    Ok(match level {
        Config2Level::Description => Config2Value::Description(rec.string("lpDescription")?),
        Config2Level::FailureActions => Config2Value::FailureActions(decode_failure_actions(&rec)?),
        Config2Level::DelayedAutoStart => {
            Config2Value::DelayedAutoStart(rec.flag("fDelayedAutostart")?)
        }
        Config2Level::FailureActionsFlag => Config2Value::FailureActionsOnNonCrash(
            rec.flag("fFailureActionsOnNonCrashFailures")?,
        ),
        Config2Level::SidInfo => {
            Config2Value::SidType(Named::new(rec.u32("dwServiceSidType")?, names::sid_type))
        }
        Config2Level::RequiredPrivileges => Config2Value::RequiredPrivileges(
            rec.multi_string("pmszRequiredPrivileges", None)?,
        ),
        Config2Level::PreshutdownInfo => {
            Config2Value::PreshutdownTimeoutMs(rec.u32("dwPreshutdownTimeout")?)
        }
        Config2Level::TriggerInfo => Config2Value::Triggers(decode_triggers(&rec)?),
        Config2Level::LaunchProtected => Config2Value::LaunchProtected(Named::new(
            rec.u32("dwLaunchProtected")?,
            names::launch_protection,
        )),
    })
}
