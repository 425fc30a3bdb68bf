//! Service enumeration plus per-service configuration sub-queries.

use serde::Serialize;

use crate::buffer::RawBuffer;
use crate::decode::BufferView;
use crate::decode::service::{
    Config2Level, Config2Value, ServiceConfig, ServiceEnumDecoder, ServiceStatusProcess,
    decode_config2, decode_service_config, decode_status_process,
};
use crate::error::QueryError;
use crate::facade::{Diagnostic, TargetReport, for_each_target};
use crate::layout::PointerWidth;
use crate::native::{RawHandle, ScopedHandle, ServiceNative};
use crate::negotiate::{CallReport, Negotiator};

pub const SERVICE_DRIVER: u32 = 0x0B;
pub const SERVICE_WIN32: u32 = 0x30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub include_drivers: bool,
    /// Services to describe; empty enumerates every service.
    pub names: Vec<String>,
    pub levels: Vec<Config2Level>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            include_drivers: false,
            names: Vec::new(),
            levels: Config2Level::ALL.to_vec(),
        }
    }
}

impl ServiceOptions {
    pub fn service_type(&self) -> u32 {
        if self.include_drivers {
            SERVICE_WIN32 | SERVICE_DRIVER
        } else {
            SERVICE_WIN32
        }
    }
}

/// Everything known about one service. Sub-queries that failed are listed
/// in `diagnostics`; the other fields are still filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub display_name: Option<String>,
    pub status: Option<ServiceStatusProcess>,
    pub config: Option<ServiceConfig>,
    pub extended: Vec<Config2Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ServiceDescriptor {
    fn new(
        name: String,
        display_name: Option<String>,
        status: Option<ServiceStatusProcess>,
    ) -> Self {
        Self {
            name,
            display_name,
            status,
            config: None,
            extended: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn note(&mut self, query: String, err: &QueryError) {
        tracing::warn!(
            service = %self.name,
            query = %query,
            code = %err.code(),
            native_code = ?err.native_code(),
            error = %err,
            "service sub-query failed"
        );
        self.diagnostics.push(Diagnostic::new(query, err));
    }
}

/// Describes the services on `host` (local machine for `None`).
///
/// Only a failure to reach the service control manager or to enumerate is
/// an error; per-service failures land on that service's descriptor.
#[allow(clippy::missing_errors_doc)]
pub fn query_services<N>(
    native: &N,
    host: Option<&str>,
    options: &ServiceOptions,
) -> Result<Vec<ServiceDescriptor>, QueryError>
where
    N: ServiceNative + ?Sized,
{
    let manager = ScopedHandle::new(native.open_manager(host)?, |h| {
        native.close_service_handle(h);
    });
    let negotiator = Negotiator::new(native.allocator());
    let width = native.pointer_width();

    let mut descriptors: Vec<ServiceDescriptor> = if options.names.is_empty() {
        let service_type = options.service_type();
        negotiator
            .query(
                "EnumServicesStatusExW",
                |buffer| native.enum_services(manager.raw(), service_type, buffer),
                &ServiceEnumDecoder::new(width),
            )?
            .into_iter()
            .map(|entry| ServiceDescriptor::new(entry.name, entry.display_name, Some(entry.status)))
            .collect()
    } else {
        options
            .names
            .iter()
            .map(|name| ServiceDescriptor::new(name.clone(), None, None))
            .collect()
    };

    for descriptor in &mut descriptors {
        describe_one(native, &negotiator, width, manager.raw(), &options.levels, descriptor);
    }
    tracing::debug!(
        host = host.unwrap_or("local"),
        services = descriptors.len(),
        "services described"
    );
    Ok(descriptors)
}

pub fn query_services_batch<N>(
    native: &N,
    targets: &[String],
    options: &ServiceOptions,
) -> Vec<TargetReport<Vec<ServiceDescriptor>>>
where
    N: ServiceNative + ?Sized,
{
    for_each_target(targets, |host| query_services(native, host, options))
}

fn describe_one<'a, N>(
    native: &'a N,
    negotiator: &Negotiator<'a>,
    width: PointerWidth,
    manager: RawHandle,
    levels: &[Config2Level],
    descriptor: &mut ServiceDescriptor,
) where
    N: ServiceNative + ?Sized,
{
    let handle = match native.open_service(manager, &descriptor.name) {
        Ok(handle) => handle,
        Err(err) => {
            descriptor.note("OpenServiceW".to_string(), &err);
            return;
        }
    };
    let service = ScopedHandle::new(handle, |h| native.close_service_handle(h));

    if descriptor.status.is_none() {
        match fetch(
            negotiator,
            width,
            "QueryServiceStatusEx",
            |buffer| native.query_status(service.raw(), buffer),
            decode_status_process,
        ) {
            Ok(status) => descriptor.status = Some(status),
            Err(err) => descriptor.note("QueryServiceStatusEx".to_string(), &err),
        }
    }

    match fetch(
        negotiator,
        width,
        "QueryServiceConfigW",
        |buffer| native.query_config(service.raw(), buffer),
        decode_service_config,
    ) {
        Ok(config) => {
            if descriptor.display_name.is_none() {
                descriptor.display_name.clone_from(&config.display_name);
            }
            descriptor.config = Some(config);
        }
        Err(err) => descriptor.note("QueryServiceConfigW".to_string(), &err),
    }

    for &level in levels {
        match fetch(
            negotiator,
            width,
            "QueryServiceConfig2W",
            |buffer| native.query_config2(service.raw(), level.code(), buffer),
            |view| decode_config2(level, view),
        ) {
            Ok(value) => descriptor.extended.push(value),
            Err(err) => descriptor.note(format!("QueryServiceConfig2W({level:?})"), &err),
        }
    }
}

/// Negotiates one blob and decodes it before the buffer is released.
fn fetch<'a, T, F, D>(
    negotiator: &Negotiator<'a>,
    width: PointerWidth,
    call: &'static str,
    invoke: F,
    decode: D,
) -> Result<T, QueryError>
where
    F: FnMut(Option<&mut RawBuffer<'a>>) -> Result<CallReport<'a>, QueryError>,
    D: FnOnce(BufferView<'_>) -> Result<T, QueryError>,
{
    let buffer = negotiator
        .query_single(call, invoke)?
        .ok_or_else(|| QueryError::malformed(call, "调用成功但没有返回数据"))?;
    decode(buffer.view(width))
}

#[cfg(test)]
mod tests {
    use super::{ServiceOptions, query_services, query_services_batch};
    use crate::decode::service::{Config2Level, Config2Value};
    use crate::error::QueryError;
    use crate::layout::{
        ENUM_SERVICE_STATUS_PROCESSW, PointerWidth, QUERY_SERVICE_CONFIGW, SERVICE_DESCRIPTIONW,
        SERVICE_STATUS_PROCESS,
    };
    use crate::native::fake::{BufferBuilder, FakeNative, Script};

    fn enum_script(names: &'static [&'static str]) -> Script {
        Script::sized(names.len(), move |base| {
            let width = PointerWidth::native();
            let layout = ENUM_SERVICE_STATUS_PROCESSW.resolve(width);
            let status = SERVICE_STATUS_PROCESS.resolve(width);
            let status_off = layout.offset("ServiceStatusProcess")?;
            let mut b = BufferBuilder::new(width);
            let first = b.reserve_records(&layout, names.len());
            for (i, name) in names.iter().enumerate() {
                let rec = first + i * layout.size();
                b.set_string(&layout, rec, "lpServiceName", name)?;
                b.set_string(&layout, rec, "lpDisplayName", &format!("{name} display"))?;
                b.set_u32(&status, rec + status_off, "dwCurrentState", 4)?;
            }
            b.finish(base)
        })
    }

    fn config_script(binary: &'static str) -> Script {
        Script::sized(1, move |base| {
            let width = PointerWidth::native();
            let layout = QUERY_SERVICE_CONFIGW.resolve(width);
            let mut b = BufferBuilder::new(width);
            let rec = b.reserve_records(&layout, 1);
            b.set_u32(&layout, rec, "dwServiceType", 0x10)?;
            b.set_u32(&layout, rec, "dwStartType", 3)?;
            b.set_string(&layout, rec, "lpBinaryPathName", binary)?;
            b.set_string(&layout, rec, "lpDisplayName", "Configured name")?;
            b.finish(base)
        })
    }

    fn description_script(text: &'static str) -> Script {
        Script::sized(1, move |base| {
            let width = PointerWidth::native();
            let layout = SERVICE_DESCRIPTIONW.resolve(width);
            let mut b = BufferBuilder::new(width);
            let rec = b.reserve_records(&layout, 1);
            b.set_string(&layout, rec, "lpDescription", text)?;
            b.finish(base)
        })
    }

    fn status_script() -> Script {
        Script::sized(1, |_| {
            let width = PointerWidth::native();
            let layout = SERVICE_STATUS_PROCESS.resolve(width);
            let mut b = BufferBuilder::new(width);
            let rec = b.reserve_records(&layout, 1);
            b.set_u32(&layout, rec, "dwCurrentState", 1)?;
            b.finish(0)
        })
    }

    fn description_only() -> ServiceOptions {
        ServiceOptions {
            levels: vec![Config2Level::Description],
            ..ServiceOptions::default()
        }
    }

    #[test]
    fn enumeration_describes_every_service() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        fake.add_services(None, &["Dnscache", "Spooler"])
            .script("EnumServicesStatusExW", "local:0x30", enum_script(&["Dnscache", "Spooler"]))
            .script("QueryServiceConfigW", "dnscache", config_script("svchost.exe -k netsvcs"))
            .script("QueryServiceConfigW", "spooler", config_script("spoolsv.exe"))
            .script("QueryServiceConfig2W", "dnscache:1", description_script("DNS client"))
            .script("QueryServiceConfig2W", "spooler:1", Script::Status(5));

        let services = query_services(&fake, None, &description_only())?;
        assert_eq!(services.len(), 2);

        let dns = &services[0];
        assert_eq!(dns.display_name.as_deref(), Some("Dnscache display"));
        assert_eq!(dns.status.as_ref().map(|s| s.current_state.name), Some("RUNNING"));
        assert_eq!(
            dns.config.as_ref().and_then(|c| c.binary_path.as_deref()),
            Some("svchost.exe -k netsvcs")
        );
        assert_eq!(dns.extended, vec![Config2Value::Description(Some("DNS client".to_string()))]);
        assert!(dns.diagnostics.is_empty());

        let spooler = &services[1];
        assert!(spooler.config.is_some());
        assert!(spooler.extended.is_empty());
        assert_eq!(spooler.diagnostics.len(), 1);
        assert_eq!(spooler.diagnostics[0].query, "QueryServiceConfig2W(Description)");
        assert_eq!(spooler.diagnostics[0].error.native_code, Some(5));

        assert_eq!(fake.open_handles(), 0);
        assert_eq!(fake.handles_opened(), 3);
        assert_eq!(fake.handles_closed(), 3);
        assert_eq!(fake.local().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn named_services_report_unknown_names() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        fake.add_services(None, &["W32Time"])
            .script("QueryServiceStatusEx", "w32time", status_script())
            .script("QueryServiceConfigW", "w32time", config_script("svchost.exe -k LocalService"));
        let options = ServiceOptions {
            names: vec!["W32Time".to_string(), "NoSuchSvc".to_string()],
            levels: Vec::new(),
            ..ServiceOptions::default()
        };

        let services = query_services(&fake, None, &options)?;
        assert_eq!(fake.call_count("EnumServicesStatusExW"), 0);
        assert_eq!(services[0].display_name.as_deref(), Some("Configured name"));
        assert_eq!(services[0].status.as_ref().map(|s| s.current_state.name), Some("STOPPED"));
        assert!(services[0].diagnostics.is_empty());

        assert!(services[1].config.is_none());
        assert_eq!(services[1].diagnostics[0].query, "OpenServiceW");
        assert_eq!(services[1].diagnostics[0].error.native_code, Some(1060));
        assert_eq!(fake.open_handles(), 0);
        Ok(())
    }

    #[test]
    fn unreachable_host_fails_only_that_target() {
        let mut fake = FakeNative::new();
        fake.deny_host("srv02")
            .add_services(Some("srv01"), &["Spooler"])
            .script("EnumServicesStatusExW", "srv01:0x3b", enum_script(&["Spooler"]));
        let options = ServiceOptions {
            include_drivers: true,
            levels: Vec::new(),
            ..ServiceOptions::default()
        };
        let targets = vec!["srv01".to_string(), "srv02".to_string()];

        let reports = query_services_batch(&fake, &targets, &options);
        assert_eq!(reports.len(), 2);
        let first = reports[0].outcome.as_ref().map(Vec::len);
        assert!(matches!(first, Ok(1)));
        assert!(matches!(
            reports[1].outcome,
            Err(QueryError::HandleUnavailable { code: 5, .. })
        ));
        assert_eq!(fake.open_handles(), 0);
    }
}
