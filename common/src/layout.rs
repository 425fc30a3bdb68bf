//! Native record layouts.
//!
//! Every record family the queries touch is described exactly once here as an
//! ordered field list. Offsets are never written by hand: they fall out of
//! sequential placement with natural (MSVC) alignment for the requested pointer
//! width, so the same table serves 32-bit and 64-bit callers.

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    W32,
    W64,
}

impl PointerWidth {
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::W64
        } else {
            PointerWidth::W32
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::W32 => 4,
            PointerWidth::W64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    /// Pointer-sized address into the same buffer (or null).
    Ptr,
    /// Two DWORDs, low then high; 4-byte aligned.
    FileTime,
    /// Inline, fixed-length UTF-16 array.
    WideChars(usize),
    Bytes(usize),
    Struct(&'static StructLayout),
}

impl FieldKind {
    fn size(self, width: PointerWidth) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::U32 => 4,
            FieldKind::U64 | FieldKind::FileTime => 8,
            FieldKind::Ptr => width.bytes(),
            FieldKind::WideChars(n) => n.saturating_mul(2),
            FieldKind::Bytes(n) => n,
            FieldKind::Struct(layout) => layout.size(width),
        }
    }

    fn align(self, width: PointerWidth) -> usize {
        match self {
            FieldKind::U8 | FieldKind::Bytes(_) => 1,
            FieldKind::U16 | FieldKind::WideChars(_) => 2,
            FieldKind::U32 | FieldKind::FileTime => 4,
            FieldKind::U64 => 8,
            FieldKind::Ptr => width.bytes(),
            FieldKind::Struct(layout) => layout.align(width),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub name: &'static str,
    pub fields: &'static [Field],
}

const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl StructLayout {
    pub fn align(&self, width: PointerWidth) -> usize {
        self.fields
            .iter()
            .map(|f| f.kind.align(width))
            .max()
            .unwrap_or(1)
    }

    pub fn size(&self, width: PointerWidth) -> usize {
        self.place(width).1
    }

    fn place(&self, width: PointerWidth) -> (Vec<usize>, usize) {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut cursor = 0usize;
        for field in self.fields {
            cursor = align_up(cursor, field.kind.align(width));
            offsets.push(cursor);
            cursor = cursor.saturating_add(field.kind.size(width));
        }
        (offsets, align_up(cursor, self.align(width)))
    }

    pub fn resolve(&'static self, width: PointerWidth) -> ResolvedLayout {
        let (offsets, size) = self.place(width);
        ResolvedLayout {
            layout: self,
            width,
            offsets,
            size,
        }
    }
}

/// A layout with concrete offsets for one pointer width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayout {
    layout: &'static StructLayout,
    width: PointerWidth,
    offsets: Vec<usize>,
    size: usize,
}

impl ResolvedLayout {
    pub fn name(&self) -> &'static str {
        self.layout.name
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn field(&self, name: &str) -> Result<(usize, FieldKind), QueryError> {
        self.layout
            .fields
            .iter()
            .zip(self.offsets.iter())
            .find(|(f, _)| f.name == name)
            .map(|(f, off)| (*off, f.kind))
            .ok_or_else(|| QueryError::malformed(self.layout.name, format!("未知字段 {name}")))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn offset(&self, name: &str) -> Result<usize, QueryError> {
        self.field(name).map(|(off, _)| off)
    }
}

use FieldKind::{FileTime, Ptr, U8, U16, U32, WideChars};

pub static GUID: StructLayout = StructLayout {
    name: "GUID",
    fields: &[
        Field::new("Data1", U32),
        Field::new("Data2", U16),
        Field::new("Data3", U16),
        Field::new("Data4", FieldKind::Bytes(8)),
    ],
};

pub static SESSION_INFO_10: StructLayout = StructLayout {
    name: "SESSION_INFO_10",
    fields: &[
        Field::new("sesi10_cname", Ptr),
        Field::new("sesi10_username", Ptr),
        Field::new("sesi10_time", U32),
        Field::new("sesi10_idle_time", U32),
    ],
};

pub static SESSION_INFO_502: StructLayout = StructLayout {
    name: "SESSION_INFO_502",
    fields: &[
        Field::new("sesi502_cname", Ptr),
        Field::new("sesi502_username", Ptr),
        Field::new("sesi502_num_opens", U32),
        Field::new("sesi502_time", U32),
        Field::new("sesi502_idle_time", U32),
        Field::new("sesi502_user_flags", U32),
        Field::new("sesi502_cltype_name", Ptr),
        Field::new("sesi502_transport", Ptr),
    ],
};

pub static WIN32_FIND_DATAW: StructLayout = StructLayout {
    name: "WIN32_FIND_DATAW",
    fields: &[
        Field::new("dwFileAttributes", U32),
        Field::new("ftCreationTime", FileTime),
        Field::new("ftLastAccessTime", FileTime),
        Field::new("ftLastWriteTime", FileTime),
        Field::new("nFileSizeHigh", U32),
        Field::new("nFileSizeLow", U32),
        Field::new("dwReserved0", U32),
        Field::new("dwReserved1", U32),
        Field::new("cFileName", WideChars(260)),
        Field::new("cAlternateFileName", WideChars(14)),
    ],
};

pub static SERVICE_STATUS_PROCESS: StructLayout = StructLayout {
    name: "SERVICE_STATUS_PROCESS",
    fields: &[
        Field::new("dwServiceType", U32),
        Field::new("dwCurrentState", U32),
        Field::new("dwControlsAccepted", U32),
        Field::new("dwWin32ExitCode", U32),
        Field::new("dwServiceSpecificExitCode", U32),
        Field::new("dwCheckPoint", U32),
        Field::new("dwWaitHint", U32),
        Field::new("dwProcessId", U32),
        Field::new("dwServiceFlags", U32),
    ],
};

pub static ENUM_SERVICE_STATUS_PROCESSW: StructLayout = StructLayout {
    name: "ENUM_SERVICE_STATUS_PROCESSW",
    fields: &[
        Field::new("lpServiceName", Ptr),
        Field::new("lpDisplayName", Ptr),
        Field::new("ServiceStatusProcess", FieldKind::Struct(&SERVICE_STATUS_PROCESS)),
    ],
};

pub static QUERY_SERVICE_CONFIGW: StructLayout = StructLayout {
    name: "QUERY_SERVICE_CONFIGW",
    fields: &[
        Field::new("dwServiceType", U32),
        Field::new("dwStartType", U32),
        Field::new("dwErrorControl", U32),
        Field::new("lpBinaryPathName", Ptr),
        Field::new("lpLoadOrderGroup", Ptr),
        Field::new("dwTagId", U32),
        Field::new("lpDependencies", Ptr),
        Field::new("lpServiceStartName", Ptr),
        Field::new("lpDisplayName", Ptr),
    ],
};

pub static SERVICE_DESCRIPTIONW: StructLayout = StructLayout {
    name: "SERVICE_DESCRIPTIONW",
    fields: &[Field::new("lpDescription", Ptr)],
};

pub static SERVICE_FAILURE_ACTIONSW: StructLayout = StructLayout {
    name: "SERVICE_FAILURE_ACTIONSW",
    fields: &[
        Field::new("dwResetPeriod", U32),
        Field::new("lpRebootMsg", Ptr),
        Field::new("lpCommand", Ptr),
        Field::new("cActions", U32),
        Field::new("lpsaActions", Ptr),
    ],
};

pub static SC_ACTION: StructLayout = StructLayout {
    name: "SC_ACTION",
    fields: &[Field::new("Type", U32), Field::new("Delay", U32)],
};

pub static SERVICE_DELAYED_AUTO_START_INFO: StructLayout = StructLayout {
    name: "SERVICE_DELAYED_AUTO_START_INFO",
    fields: &[Field::new("fDelayedAutostart", U32)],
};

pub static SERVICE_FAILURE_ACTIONS_FLAG: StructLayout = StructLayout {
    name: "SERVICE_FAILURE_ACTIONS_FLAG",
    fields: &[Field::new("fFailureActionsOnNonCrashFailures", U32)],
};

pub static SERVICE_SID_INFO: StructLayout = StructLayout {
    name: "SERVICE_SID_INFO",
    fields: &[Field::new("dwServiceSidType", U32)],
};

pub static SERVICE_REQUIRED_PRIVILEGES_INFOW: StructLayout = StructLayout {
    name: "SERVICE_REQUIRED_PRIVILEGES_INFOW",
    fields: &[Field::new("pmszRequiredPrivileges", Ptr)],
};

pub static SERVICE_PRESHUTDOWN_INFO: StructLayout = StructLayout {
    name: "SERVICE_PRESHUTDOWN_INFO",
    fields: &[Field::new("dwPreshutdownTimeout", U32)],
};

pub static SERVICE_TRIGGER_INFO: StructLayout = StructLayout {
    name: "SERVICE_TRIGGER_INFO",
    fields: &[
        Field::new("cTriggers", U32),
        Field::new("pTriggers", Ptr),
        Field::new("pReserved", Ptr),
    ],
};

pub static SERVICE_TRIGGER: StructLayout = StructLayout {
    name: "SERVICE_TRIGGER",
    fields: &[
        Field::new("dwTriggerType", U32),
        Field::new("dwAction", U32),
        Field::new("pTriggerSubtype", Ptr),
        Field::new("cDataItems", U32),
        Field::new("pDataItems", Ptr),
    ],
};

pub static SERVICE_TRIGGER_SPECIFIC_DATA_ITEM: StructLayout = StructLayout {
    name: "SERVICE_TRIGGER_SPECIFIC_DATA_ITEM",
    fields: &[
        Field::new("dwDataType", U32),
        Field::new("cbData", U32),
        Field::new("pData", Ptr),
    ],
};

pub static SERVICE_LAUNCH_PROTECTED_INFO: StructLayout = StructLayout {
    name: "SERVICE_LAUNCH_PROTECTED_INFO",
    fields: &[Field::new("dwLaunchProtected", U32)],
};

/// Single-byte payload of a `SERVICE_TRIGGER_DATA_TYPE_LEVEL` item.
pub static TRIGGER_LEVEL: StructLayout = StructLayout {
    name: "TRIGGER_LEVEL",
    fields: &[Field::new("Level", U8)],
};

/// Eight-byte payload of a `SERVICE_TRIGGER_DATA_TYPE_KEYWORD_*` item.
pub static TRIGGER_KEYWORD: StructLayout = StructLayout {
    name: "TRIGGER_KEYWORD",
    fields: &[Field::new("Keyword", FieldKind::U64)],
};

pub static ALL: &[&StructLayout] = &[
    &GUID,
    &SESSION_INFO_10,
    &SESSION_INFO_502,
    &WIN32_FIND_DATAW,
    &SERVICE_STATUS_PROCESS,
    &ENUM_SERVICE_STATUS_PROCESSW,
    &QUERY_SERVICE_CONFIGW,
    &SERVICE_DESCRIPTIONW,
    &SERVICE_FAILURE_ACTIONSW,
    &SC_ACTION,
    &SERVICE_DELAYED_AUTO_START_INFO,
    &SERVICE_FAILURE_ACTIONS_FLAG,
    &SERVICE_SID_INFO,
    &SERVICE_REQUIRED_PRIVILEGES_INFOW,
    &SERVICE_PRESHUTDOWN_INFO,
    &SERVICE_TRIGGER_INFO,
    &SERVICE_TRIGGER,
    &SERVICE_TRIGGER_SPECIFIC_DATA_ITEM,
    &SERVICE_LAUNCH_PROTECTED_INFO,
    &TRIGGER_LEVEL,
    &TRIGGER_KEYWORD,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(layout: &'static StructLayout) -> (usize, usize) {
        (layout.size(PointerWidth::W32), layout.size(PointerWidth::W64))
    }

    #[test]
    fn record_sizes_match_native_abi() {
        assert_eq!(sizes(&GUID), (16, 16));
        assert_eq!(sizes(&SESSION_INFO_10), (16, 24));
        assert_eq!(sizes(&SESSION_INFO_502), (32, 48));
        assert_eq!(sizes(&WIN32_FIND_DATAW), (592, 592));
        assert_eq!(sizes(&SERVICE_STATUS_PROCESS), (36, 36));
        assert_eq!(sizes(&ENUM_SERVICE_STATUS_PROCESSW), (44, 56));
        assert_eq!(sizes(&QUERY_SERVICE_CONFIGW), (36, 64));
        assert_eq!(sizes(&SERVICE_DESCRIPTIONW), (4, 8));
        assert_eq!(sizes(&SERVICE_FAILURE_ACTIONSW), (20, 40));
        assert_eq!(sizes(&SC_ACTION), (8, 8));
        assert_eq!(sizes(&SERVICE_TRIGGER_INFO), (12, 24));
        assert_eq!(sizes(&SERVICE_TRIGGER), (20, 32));
        assert_eq!(sizes(&SERVICE_TRIGGER_SPECIFIC_DATA_ITEM), (12, 16));
    }

    #[test]
    fn pointer_fields_are_aligned_to_width() -> Result<(), QueryError> {
        let l64 = QUERY_SERVICE_CONFIGW.resolve(PointerWidth::W64);
        assert_eq!(l64.offset("lpBinaryPathName")?, 16);
        assert_eq!(l64.offset("dwTagId")?, 32);
        assert_eq!(l64.offset("lpDependencies")?, 40);
        assert_eq!(l64.offset("lpDisplayName")?, 56);

        let l32 = QUERY_SERVICE_CONFIGW.resolve(PointerWidth::W32);
        assert_eq!(l32.offset("lpBinaryPathName")?, 12);
        assert_eq!(l32.offset("lpDependencies")?, 24);

        let fa = SERVICE_FAILURE_ACTIONSW.resolve(PointerWidth::W64);
        assert_eq!(fa.offset("lpRebootMsg")?, 8);
        assert_eq!(fa.offset("cActions")?, 24);
        assert_eq!(fa.offset("lpsaActions")?, 32);

        let find = WIN32_FIND_DATAW.resolve(PointerWidth::W64);
        assert_eq!(find.offset("ftCreationTime")?, 4);
        assert_eq!(find.offset("cFileName")?, 44);
        assert_eq!(find.offset("cAlternateFileName")?, 564);
        Ok(())
    }

    #[test]
    fn unknown_field_is_reported() {
        let l = SC_ACTION.resolve(PointerWidth::W64);
        assert!(l.field("Nope").is_err());
    }

    #[test]
    fn every_layout_has_unique_name() {
        let mut names: Vec<&str> = ALL.iter().map(|l| l.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[cfg(windows)]
    #[test]
    fn sizes_agree_with_windows_sys() {
        use windows_sys::Win32::NetworkManagement::NetManagement::{
            SESSION_INFO_10 as SI10, SESSION_INFO_502 as SI502,
        };
        use windows_sys::Win32::Storage::FileSystem::WIN32_FIND_DATAW as FD;
        use windows_sys::Win32::System::Services::{
            ENUM_SERVICE_STATUS_PROCESSW as ESSP, QUERY_SERVICE_CONFIGW as QSC, SC_ACTION as SCA,
            SERVICE_FAILURE_ACTIONSW as SFA, SERVICE_STATUS_PROCESS as SSP,
            SERVICE_TRIGGER as ST, SERVICE_TRIGGER_INFO as STI,
            SERVICE_TRIGGER_SPECIFIC_DATA_ITEM as STDI,
        };
        let w = PointerWidth::native();
        assert_eq!(SESSION_INFO_10.size(w), std::mem::size_of::<SI10>());
        assert_eq!(SESSION_INFO_502.size(w), std::mem::size_of::<SI502>());
        assert_eq!(WIN32_FIND_DATAW.size(w), std::mem::size_of::<FD>());
        assert_eq!(ENUM_SERVICE_STATUS_PROCESSW.size(w), std::mem::size_of::<ESSP>());
        assert_eq!(SERVICE_STATUS_PROCESS.size(w), std::mem::size_of::<SSP>());
        assert_eq!(QUERY_SERVICE_CONFIGW.size(w), std::mem::size_of::<QSC>());
        assert_eq!(SERVICE_FAILURE_ACTIONSW.size(w), std::mem::size_of::<SFA>());
        assert_eq!(SC_ACTION.size(w), std::mem::size_of::<SCA>());
        assert_eq!(SERVICE_TRIGGER_INFO.size(w), std::mem::size_of::<STI>());
        assert_eq!(SERVICE_TRIGGER.size(w), std::mem::size_of::<ST>());
        assert_eq!(
            SERVICE_TRIGGER_SPECIFIC_DATA_ITEM.size(w),
            std::mem::size_of::<STDI>()
        );
    }
}
