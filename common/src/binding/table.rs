//! Every native entry point the crate binds, declared once.

use super::Direction::{In, InOut, Out};
use super::ValueType::{
    Bool, HResult, Handle, I32, Pointer, Struct, U32, Usize, Void, WideString,
};
use super::{Param, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Sessions,
    Services,
    Directory,
    Folders,
    Memory,
}

#[derive(Debug)]
pub struct BindingSpec {
    pub family: Family,
    pub library: &'static str,
    pub symbol: &'static str,
    pub signature: &'static Signature,
}

pub static NET_SESSION_ENUM: Signature = Signature {
    params: &[
        Param::new("servername", In, WideString),
        Param::new("UncClientName", In, WideString),
        Param::new("username", In, WideString),
        Param::new("level", In, U32),
        Param::new("bufptr", Out, Pointer),
        Param::new("prefmaxlen", In, U32),
        Param::new("entriesread", Out, U32),
        Param::new("totalentries", Out, U32),
        Param::new("resume_handle", InOut, U32),
    ],
    ret: U32,
};

pub static NET_API_BUFFER_FREE: Signature = Signature {
    params: &[Param::new("Buffer", In, Pointer)],
    ret: U32,
};

pub static NET_API_BUFFER_SIZE: Signature = Signature {
    params: &[
        Param::new("Buffer", In, Pointer),
        Param::new("ByteCount", Out, U32),
    ],
    ret: U32,
};

pub static OPEN_SC_MANAGER: Signature = Signature {
    params: &[
        Param::new("lpMachineName", In, WideString),
        Param::new("lpDatabaseName", In, WideString),
        Param::new("dwDesiredAccess", In, U32),
    ],
    ret: Handle,
};

pub static OPEN_SERVICE: Signature = Signature {
    params: &[
        Param::new("hSCManager", In, Handle),
        Param::new("lpServiceName", In, WideString),
        Param::new("dwDesiredAccess", In, U32),
    ],
    ret: Handle,
};

pub static CLOSE_SERVICE_HANDLE: Signature = Signature {
    params: &[Param::new("hSCObject", In, Handle)],
    ret: Bool,
};

pub static ENUM_SERVICES_STATUS_EX: Signature = Signature {
    params: &[
        Param::new("hSCManager", In, Handle),
        Param::new("InfoLevel", In, U32),
        Param::new("dwServiceType", In, U32),
        Param::new("dwServiceState", In, U32),
        Param::new("lpServices", Out, Struct("ENUM_SERVICE_STATUS_PROCESSW")),
        Param::new("cbBufSize", In, U32),
        Param::new("pcbBytesNeeded", Out, U32),
        Param::new("lpServicesReturned", Out, U32),
        Param::new("lpResumeHandle", InOut, U32),
        Param::new("pszGroupName", In, WideString),
    ],
    ret: Bool,
};

pub static QUERY_SERVICE_CONFIG: Signature = Signature {
    params: &[
        Param::new("hService", In, Handle),
        Param::new("lpServiceConfig", Out, Struct("QUERY_SERVICE_CONFIGW")),
        Param::new("cbBufSize", In, U32),
        Param::new("pcbBytesNeeded", Out, U32),
    ],
    ret: Bool,
};

pub static QUERY_SERVICE_CONFIG2: Signature = Signature {
    params: &[
        Param::new("hService", In, Handle),
        Param::new("dwInfoLevel", In, U32),
        Param::new("lpBuffer", Out, Pointer),
        Param::new("cbBufSize", In, U32),
        Param::new("pcbBytesNeeded", Out, U32),
    ],
    ret: Bool,
};

pub static QUERY_SERVICE_STATUS_EX: Signature = Signature {
    params: &[
        Param::new("hService", In, Handle),
        Param::new("InfoLevel", In, U32),
        Param::new("lpBuffer", Out, Struct("SERVICE_STATUS_PROCESS")),
        Param::new("cbBufSize", In, U32),
        Param::new("pcbBytesNeeded", Out, U32),
    ],
    ret: Bool,
};

pub static FIND_FIRST_FILE_EX: Signature = Signature {
    params: &[
        Param::new("lpFileName", In, WideString),
        Param::new("fInfoLevelId", In, I32),
        Param::new("lpFindFileData", Out, Struct("WIN32_FIND_DATAW")),
        Param::new("fSearchOp", In, I32),
        Param::new("lpSearchFilter", In, Pointer),
        Param::new("dwAdditionalFlags", In, U32),
    ],
    ret: Handle,
};

pub static FIND_NEXT_FILE: Signature = Signature {
    params: &[
        Param::new("hFindFile", In, Handle),
        Param::new("lpFindFileData", Out, Struct("WIN32_FIND_DATAW")),
    ],
    ret: Bool,
};

pub static FIND_CLOSE: Signature = Signature {
    params: &[Param::new("hFindFile", In, Handle)],
    ret: Bool,
};

pub static LOCAL_ALLOC: Signature = Signature {
    params: &[
        Param::new("uFlags", In, U32),
        Param::new("uBytes", In, Usize),
    ],
    ret: Pointer,
};

pub static LOCAL_FREE: Signature = Signature {
    params: &[Param::new("hMem", In, Pointer)],
    ret: Pointer,
};

pub static SH_GET_KNOWN_FOLDER_PATH: Signature = Signature {
    params: &[
        Param::new("rfid", In, Struct("GUID")),
        Param::new("dwFlags", In, U32),
        Param::new("hToken", In, Handle),
        Param::new("ppszPath", Out, WideString),
    ],
    ret: HResult,
};

pub static CO_TASK_MEM_FREE: Signature = Signature {
    params: &[Param::new("pv", In, Pointer)],
    ret: Void,
};

const fn spec(
    family: Family,
    library: &'static str,
    symbol: &'static str,
    signature: &'static Signature,
) -> BindingSpec {
    BindingSpec {
        family,
        library,
        symbol,
        signature,
    }
}

pub static BINDINGS: &[BindingSpec] = &[
    spec(Family::Sessions, "netapi32.dll", "NetSessionEnum", &NET_SESSION_ENUM),
    spec(Family::Sessions, "netapi32.dll", "NetApiBufferFree", &NET_API_BUFFER_FREE),
    spec(Family::Sessions, "netapi32.dll", "NetApiBufferSize", &NET_API_BUFFER_SIZE),
    spec(Family::Services, "advapi32.dll", "OpenSCManagerW", &OPEN_SC_MANAGER),
    spec(Family::Services, "advapi32.dll", "OpenServiceW", &OPEN_SERVICE),
    spec(Family::Services, "advapi32.dll", "CloseServiceHandle", &CLOSE_SERVICE_HANDLE),
    spec(Family::Services, "advapi32.dll", "EnumServicesStatusExW", &ENUM_SERVICES_STATUS_EX),
    spec(Family::Services, "advapi32.dll", "QueryServiceConfigW", &QUERY_SERVICE_CONFIG),
    spec(Family::Services, "advapi32.dll", "QueryServiceConfig2W", &QUERY_SERVICE_CONFIG2),
    spec(Family::Services, "advapi32.dll", "QueryServiceStatusEx", &QUERY_SERVICE_STATUS_EX),
    spec(Family::Directory, "kernel32.dll", "FindFirstFileExW", &FIND_FIRST_FILE_EX),
    spec(Family::Directory, "kernel32.dll", "FindNextFileW", &FIND_NEXT_FILE),
    spec(Family::Directory, "kernel32.dll", "FindClose", &FIND_CLOSE),
    spec(Family::Memory, "kernel32.dll", "LocalAlloc", &LOCAL_ALLOC),
    spec(Family::Memory, "kernel32.dll", "LocalFree", &LOCAL_FREE),
    spec(Family::Folders, "shell32.dll", "SHGetKnownFolderPath", &SH_GET_KNOWN_FOLDER_PATH),
    spec(Family::Folders, "ole32.dll", "CoTaskMemFree", &CO_TASK_MEM_FREE),
];

pub fn family(family: Family) -> impl Iterator<Item = &'static BindingSpec> {
    BINDINGS.iter().filter(move |spec| spec.family == family)
}

pub fn lookup(library: &str, symbol: &str) -> Option<&'static BindingSpec> {
    BINDINGS
        .iter()
        .find(|spec| spec.library.eq_ignore_ascii_case(library) && spec.symbol == symbol)
}

#[cfg(test)]
mod tests {
    use super::{BINDINGS, Family, family};

    #[test]
    fn table_entries_are_unique() {
        for (i, a) in BINDINGS.iter().enumerate() {
            for b in &BINDINGS[i + 1..] {
                assert!(
                    !(a.library.eq_ignore_ascii_case(b.library) && a.symbol == b.symbol),
                    "{}!{}",
                    a.library,
                    a.symbol
                );
            }
        }
    }

    #[test]
    fn every_family_has_entries() {
        for f in [
            Family::Sessions,
            Family::Services,
            Family::Directory,
            Family::Folders,
            Family::Memory,
        ] {
            assert!(family(f).count() >= 2, "{f:?}");
        }
        assert_eq!(family(Family::Services).count(), 7);
    }
}
