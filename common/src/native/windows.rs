use std::ffi::c_void;
use std::ptr::{NonNull, null, null_mut};

use uuid::Uuid;
use windows_sys::core::GUID;
use windows_sys::Win32::Foundation::{
    ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_FILES, GetLastError, INVALID_HANDLE_VALUE,
};

use crate::binding::{BindingRegistry, Family, table};
use crate::buffer::{NativeAllocator, RawBuffer};
use crate::decode::find::find_data_size;
use crate::error::{BindingError, QueryError};
use crate::layout::PointerWidth;
use crate::native::{
    DirectoryNative, FolderNative, NativeBase, RawHandle, ServiceNative, SessionNative,
};
use crate::negotiate::{CallReport, NativeStatus};

type NetSessionEnumFn = unsafe extern "system" fn(
    *const u16,
    *const u16,
    *const u16,
    u32,
    *mut *mut u8,
    u32,
    *mut u32,
    *mut u32,
    *mut u32,
) -> u32;
type NetApiBufferFreeFn = unsafe extern "system" fn(*const c_void) -> u32;
type NetApiBufferSizeFn = unsafe extern "system" fn(*const c_void, *mut u32) -> u32;
type OpenSCManagerWFn = unsafe extern "system" fn(*const u16, *const u16, u32) -> isize;
type OpenServiceWFn = unsafe extern "system" fn(isize, *const u16, u32) -> isize;
type CloseServiceHandleFn = unsafe extern "system" fn(isize) -> i32;
type EnumServicesStatusExWFn = unsafe extern "system" fn(
    isize,
    i32,
    u32,
    u32,
    *mut u8,
    u32,
    *mut u32,
    *mut u32,
    *mut u32,
    *const u16,
) -> i32;
type QueryServiceConfigWFn = unsafe extern "system" fn(isize, *mut u8, u32, *mut u32) -> i32;
type QueryServiceConfig2WFn = unsafe extern "system" fn(isize, u32, *mut u8, u32, *mut u32) -> i32;
type QueryServiceStatusExFn = unsafe extern "system" fn(isize, i32, *mut u8, u32, *mut u32) -> i32;
type FindFirstFileExWFn =
    unsafe extern "system" fn(*const u16, i32, *mut c_void, i32, *const c_void, u32) -> isize;
type FindNextFileWFn = unsafe extern "system" fn(isize, *mut c_void) -> i32;
type FindCloseFn = unsafe extern "system" fn(isize) -> i32;
type LocalAllocFn = unsafe extern "system" fn(u32, usize) -> *mut c_void;
type LocalFreeFn = unsafe extern "system" fn(*mut c_void) -> *mut c_void;
type SHGetKnownFolderPathFn =
    unsafe extern "system" fn(*const GUID, u32, isize, *mut *mut u16) -> i32;
type CoTaskMemFreeFn = unsafe extern "system" fn(*const c_void);

const MAX_PREFERRED_LENGTH: u32 = u32::MAX;
const LMEM_ZEROINIT: u32 = 0x40;
const SC_MANAGER_CONNECT: u32 = 0x1;
const SC_MANAGER_ENUMERATE_SERVICE: u32 = 0x4;
const SERVICE_QUERY_CONFIG: u32 = 0x1;
const SERVICE_QUERY_STATUS: u32 = 0x4;
const SC_ENUM_PROCESS_INFO: i32 = 0;
const SC_STATUS_PROCESS_INFO: i32 = 0;
const SERVICE_STATE_ALL: u32 = 0x3;
const FIND_EX_INFO_BASIC: i32 = 1;
const FIND_EX_SEARCH_NAME_MATCH: i32 = 0;
const FIND_FIRST_EX_LARGE_FETCH: u32 = 0x2;
/// Longest path `SHGetKnownFolderPath` can hand back, in UTF-16 units.
const MAX_WIDE_PATH: usize = 32_768;

#[derive(Clone, Copy)]
struct MemoryEntries {
    local_alloc: LocalAllocFn,
    local_free: LocalFreeFn,
}

#[derive(Clone, Copy)]
struct SessionEntries {
    net_session_enum: NetSessionEnumFn,
    net_api_buffer_free: NetApiBufferFreeFn,
    net_api_buffer_size: NetApiBufferSizeFn,
}

#[derive(Clone, Copy)]
struct ServiceEntries {
    open_sc_manager: OpenSCManagerWFn,
    open_service: OpenServiceWFn,
    close_service_handle: CloseServiceHandleFn,
    enum_services_status_ex: EnumServicesStatusExWFn,
    query_service_config: QueryServiceConfigWFn,
    query_service_config2: QueryServiceConfig2WFn,
    query_service_status_ex: QueryServiceStatusExFn,
}

#[derive(Clone, Copy)]
struct DirectoryEntries {
    find_first_file_ex: FindFirstFileExWFn,
    find_next_file: FindNextFileWFn,
    find_close: FindCloseFn,
}

#[derive(Clone, Copy)]
struct FolderEntries {
    sh_get_known_folder_path: SHGetKnownFolderPathFn,
    co_task_mem_free: CoTaskMemFreeFn,
}

#[allow(unsafe_code)]
fn bind<F: Copy>(
    registry: &mut BindingRegistry,
    library: &str,
    symbol: &str,
) -> Result<F, BindingError> {
    let spec = table::lookup(library, symbol).ok_or_else(|| BindingError::UnresolvedSymbol {
        library: library.to_string(),
        symbol: symbol.to_string(),
        reason: "未在绑定表中声明".to_string(),
    })?;
    let descriptor = registry.resolve_spec(spec)?;
    // SAFETY: every call site pairs the symbol with the alias declared for it
    // above, which mirrors the table signature.
    unsafe { descriptor.cast::<F>() }
}

fn bind_memory(r: &mut BindingRegistry) -> Result<MemoryEntries, BindingError> {
    Ok(MemoryEntries {
        local_alloc: bind(r, "kernel32.dll", "LocalAlloc")?,
        local_free: bind(r, "kernel32.dll", "LocalFree")?,
    })
}

fn bind_sessions(r: &mut BindingRegistry) -> Result<SessionEntries, BindingError> {
    Ok(SessionEntries {
        net_session_enum: bind(r, "netapi32.dll", "NetSessionEnum")?,
        net_api_buffer_free: bind(r, "netapi32.dll", "NetApiBufferFree")?,
        net_api_buffer_size: bind(r, "netapi32.dll", "NetApiBufferSize")?,
    })
}

fn bind_services(r: &mut BindingRegistry) -> Result<ServiceEntries, BindingError> {
    Ok(ServiceEntries {
        open_sc_manager: bind(r, "advapi32.dll", "OpenSCManagerW")?,
        open_service: bind(r, "advapi32.dll", "OpenServiceW")?,
        close_service_handle: bind(r, "advapi32.dll", "CloseServiceHandle")?,
        enum_services_status_ex: bind(r, "advapi32.dll", "EnumServicesStatusExW")?,
        query_service_config: bind(r, "advapi32.dll", "QueryServiceConfigW")?,
        query_service_config2: bind(r, "advapi32.dll", "QueryServiceConfig2W")?,
        query_service_status_ex: bind(r, "advapi32.dll", "QueryServiceStatusEx")?,
    })
}

fn bind_directory(r: &mut BindingRegistry) -> Result<DirectoryEntries, BindingError> {
    Ok(DirectoryEntries {
        find_first_file_ex: bind(r, "kernel32.dll", "FindFirstFileExW")?,
        find_next_file: bind(r, "kernel32.dll", "FindNextFileW")?,
        find_close: bind(r, "kernel32.dll", "FindClose")?,
    })
}

fn bind_folders(r: &mut BindingRegistry) -> Result<FolderEntries, BindingError> {
    Ok(FolderEntries {
        sh_get_known_folder_path: bind(r, "shell32.dll", "SHGetKnownFolderPath")?,
        co_task_mem_free: bind(r, "ole32.dll", "CoTaskMemFree")?,
    })
}

fn logged<T>(family: Family, entries: Result<T, BindingError>) -> Result<T, BindingError> {
    if let Err(err) = &entries {
        tracing::warn!(?family, code = %err.code(), error = %err, "entry point family unavailable");
    }
    entries
}

#[allow(unsafe_code)]
fn last_error() -> u32 {
    unsafe { GetLastError() }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[allow(clippy::cast_possible_wrap)]
fn to_native(handle: RawHandle) -> isize {
    handle.0 as isize
}

#[allow(clippy::cast_sign_loss)]
fn from_native(handle: isize) -> RawHandle {
    RawHandle(handle as usize)
}

fn buffer_parts(buffer: Option<&mut RawBuffer<'_>>) -> (*mut u8, u32) {
    match buffer {
        Some(buf) => (buf.as_mut_ptr(), u32::try_from(buf.len()).unwrap_or(u32::MAX)),
        None => (null_mut(), 0),
    }
}

/// Report for a `BOOL`-returning sized call.
fn bool_report<'a>(ok: i32, needed: u32, returned: usize) -> CallReport<'a> {
    if ok != 0 {
        return CallReport::new(NativeStatus::Success).with_returned(returned);
    }
    CallReport::new(NativeStatus::from_win32(last_error()))
        .with_bytes_needed(usize::try_from(needed).unwrap_or(0))
}

fn entries<T: Copy>(family: &Result<T, BindingError>) -> Result<T, QueryError> {
    family.clone().map_err(QueryError::from)
}

/// `LocalAlloc`/`LocalFree` for caller-provided buffers.
struct LocalAllocator {
    entries: Result<MemoryEntries, BindingError>,
}

#[allow(unsafe_code)]
impl NativeAllocator for LocalAllocator {
    fn name(&self) -> &'static str {
        "LocalFree"
    }

    fn allocate(&self, len: usize) -> Result<NonNull<u8>, QueryError> {
        let e = entries(&self.entries)?;
        let ptr = unsafe { (e.local_alloc)(LMEM_ZEROINIT, len) };
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| QueryError::Failure {
            call: "LocalAlloc",
            code: last_error(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _len: usize) {
        if let Ok(e) = &self.entries {
            // SAFETY: `ptr` came from `LocalAlloc` above.
            unsafe { (e.local_free)(ptr.as_ptr().cast()) };
        }
    }
}

/// Releases `NetSessionEnum` results.
struct NetApiAllocator {
    entries: Result<SessionEntries, BindingError>,
}

#[allow(unsafe_code)]
impl NativeAllocator for NetApiAllocator {
    fn name(&self) -> &'static str {
        "NetApiBufferFree"
    }

    fn allocate(&self, _len: usize) -> Result<NonNull<u8>, QueryError> {
        Err(QueryError::InvalidArgument {
            message: "NetApi 缓冲区只能由被调用方分配".to_string(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _len: usize) {
        if let Ok(e) = &self.entries {
            // SAFETY: `ptr` was returned by `NetSessionEnum`.
            unsafe { (e.net_api_buffer_free)(ptr.as_ptr().cast_const().cast()) };
        }
    }
}

/// Releases `SHGetKnownFolderPath` results.
struct CoTaskAllocator {
    entries: Result<FolderEntries, BindingError>,
}

#[allow(unsafe_code)]
impl NativeAllocator for CoTaskAllocator {
    fn name(&self) -> &'static str {
        "CoTaskMemFree"
    }

    fn allocate(&self, _len: usize) -> Result<NonNull<u8>, QueryError> {
        Err(QueryError::InvalidArgument {
            message: "CoTaskMem 缓冲区只能由被调用方分配".to_string(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _len: usize) {
        if let Ok(e) = &self.entries {
            // SAFETY: `ptr` was returned by `SHGetKnownFolderPath`.
            unsafe { (e.co_task_mem_free)(ptr.as_ptr().cast_const().cast()) };
        }
    }
}

/// Native layer over the real Windows entry points.
///
/// Each family is bound once at load time; a family that fails to bind keeps
/// its error and reports it from every call while the others keep working.
pub struct WindowsNative {
    sessions: Result<SessionEntries, BindingError>,
    services: Result<ServiceEntries, BindingError>,
    directory: Result<DirectoryEntries, BindingError>,
    folders: Result<FolderEntries, BindingError>,
    local: LocalAllocator,
    netapi: NetApiAllocator,
    cotask: CoTaskAllocator,
    // Owns the loaded libraries; must drop after the entry points above.
    _registry: BindingRegistry,
}

impl WindowsNative {
    pub fn load() -> Self {
        let mut registry = BindingRegistry::new();
        let memory = logged(Family::Memory, bind_memory(&mut registry));
        let sessions = logged(Family::Sessions, bind_sessions(&mut registry));
        let services = logged(Family::Services, bind_services(&mut registry));
        let directory = logged(Family::Directory, bind_directory(&mut registry));
        let folders = logged(Family::Folders, bind_folders(&mut registry));
        tracing::debug!(
            libraries = registry.library_opens(),
            bindings = registry.binding_count(),
            "native bindings loaded"
        );
        Self {
            local: LocalAllocator { entries: memory },
            netapi: NetApiAllocator {
                entries: sessions.clone(),
            },
            cotask: CoTaskAllocator {
                entries: folders.clone(),
            },
            sessions,
            services,
            directory,
            folders,
            _registry: registry,
        }
    }
}

impl NativeBase for WindowsNative {
    fn allocator(&self) -> &dyn NativeAllocator {
        &self.local
    }

    fn pointer_width(&self) -> PointerWidth {
        PointerWidth::native()
    }
}

impl SessionNative for WindowsNative {
    #[allow(unsafe_code)]
    fn net_session_enum<'a>(
        &'a self,
        server: Option<&str>,
        level: u32,
        _buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.sessions)?;
        let server_w = server.map(wide);
        let server_ptr = server_w.as_ref().map_or(null(), |w| w.as_ptr());
        let mut out: *mut u8 = null_mut();
        let mut read = 0u32;
        let mut total = 0u32;
        let mut resume = 0u32;
        let status = unsafe {
            (e.net_session_enum)(
                server_ptr,
                null(),
                null(),
                level,
                std::ptr::from_mut(&mut out),
                MAX_PREFERRED_LENGTH,
                std::ptr::from_mut(&mut read),
                std::ptr::from_mut(&mut total),
                std::ptr::from_mut(&mut resume),
            )
        };
        let adopted = match NonNull::new(out) {
            None => None,
            Some(ptr) => {
                let mut size = 0u32;
                let rc = unsafe {
                    (e.net_api_buffer_size)(
                        ptr.as_ptr().cast_const().cast(),
                        std::ptr::from_mut(&mut size),
                    )
                };
                // SAFETY: `ptr` is the NetApi block just returned; the buffer
                // owns it from here and frees it with `NetApiBufferFree`.
                let block = unsafe {
                    RawBuffer::adopt(&self.netapi, ptr, usize::try_from(size).unwrap_or(0))
                };
                if rc != 0 {
                    return Err(QueryError::Failure {
                        call: "NetApiBufferSize",
                        code: rc,
                    });
                }
                Some(block)
            }
        };
        tracing::debug!(level, read, total, status, "NetSessionEnum returned");
        Ok(CallReport::new(NativeStatus::from_win32(status))
            .with_returned(usize::try_from(read).unwrap_or(0))
            .with_adopted(adopted))
    }
}

impl DirectoryNative for WindowsNative {
    #[allow(unsafe_code)]
    fn find_first(
        &self,
        pattern: &str,
        large_fetch: bool,
        data: &mut [u8],
    ) -> Result<Option<RawHandle>, QueryError> {
        let e = entries(&self.directory)?;
        if data.len() < find_data_size() {
            return Err(QueryError::InvalidArgument {
                message: format!("查找缓冲区需要 {} 字节", find_data_size()),
            });
        }
        let pattern_w = wide(pattern);
        let flags = if large_fetch { FIND_FIRST_EX_LARGE_FETCH } else { 0 };
        let handle = unsafe {
            (e.find_first_file_ex)(
                pattern_w.as_ptr(),
                FIND_EX_INFO_BASIC,
                data.as_mut_ptr().cast(),
                FIND_EX_SEARCH_NAME_MATCH,
                null(),
                flags,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let code = last_error();
            if code == ERROR_FILE_NOT_FOUND {
                return Ok(None);
            }
            return Err(QueryError::HandleUnavailable {
                call: "FindFirstFileExW",
                target: pattern.to_string(),
                code,
            });
        }
        Ok(Some(from_native(handle)))
    }

    #[allow(unsafe_code)]
    fn find_next(&self, handle: RawHandle, data: &mut [u8]) -> Result<bool, QueryError> {
        let e = entries(&self.directory)?;
        if data.len() < find_data_size() {
            return Err(QueryError::InvalidArgument {
                message: format!("查找缓冲区需要 {} 字节", find_data_size()),
            });
        }
        let ok = unsafe { (e.find_next_file)(to_native(handle), data.as_mut_ptr().cast()) };
        if ok != 0 {
            return Ok(true);
        }
        match last_error() {
            ERROR_NO_MORE_FILES => Ok(false),
            code => Err(QueryError::Failure {
                call: "FindNextFileW",
                code,
            }),
        }
    }

    #[allow(unsafe_code)]
    fn find_close(&self, handle: RawHandle) {
        if let Ok(e) = &self.directory {
            unsafe { (e.find_close)(to_native(handle)) };
        }
    }
}

impl ServiceNative for WindowsNative {
    #[allow(unsafe_code)]
    fn open_manager(&self, host: Option<&str>) -> Result<RawHandle, QueryError> {
        let e = entries(&self.services)?;
        let host_w = host.map(wide);
        let host_ptr = host_w.as_ref().map_or(null(), |w| w.as_ptr());
        let handle = unsafe {
            (e.open_sc_manager)(host_ptr, null(), SC_MANAGER_CONNECT | SC_MANAGER_ENUMERATE_SERVICE)
        };
        if handle == 0 {
            return Err(QueryError::HandleUnavailable {
                call: "OpenSCManagerW",
                target: host.unwrap_or("local").to_string(),
                code: last_error(),
            });
        }
        Ok(from_native(handle))
    }

    #[allow(unsafe_code)]
    fn open_service(&self, manager: RawHandle, name: &str) -> Result<RawHandle, QueryError> {
        let e = entries(&self.services)?;
        let name_w = wide(name);
        let handle = unsafe {
            (e.open_service)(
                to_native(manager),
                name_w.as_ptr(),
                SERVICE_QUERY_CONFIG | SERVICE_QUERY_STATUS,
            )
        };
        if handle == 0 {
            return Err(QueryError::HandleUnavailable {
                call: "OpenServiceW",
                target: name.to_string(),
                code: last_error(),
            });
        }
        Ok(from_native(handle))
    }

    #[allow(unsafe_code)]
    fn close_service_handle(&self, handle: RawHandle) {
        if let Ok(e) = &self.services {
            unsafe { (e.close_service_handle)(to_native(handle)) };
        }
    }

    #[allow(unsafe_code)]
    fn enum_services<'a>(
        &'a self,
        manager: RawHandle,
        service_type: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.services)?;
        let (ptr, cb) = buffer_parts(buffer);
        let mut needed = 0u32;
        let mut returned = 0u32;
        let mut resume = 0u32;
        let ok = unsafe {
            (e.enum_services_status_ex)(
                to_native(manager),
                SC_ENUM_PROCESS_INFO,
                service_type,
                SERVICE_STATE_ALL,
                ptr,
                cb,
                std::ptr::from_mut(&mut needed),
                std::ptr::from_mut(&mut returned),
                std::ptr::from_mut(&mut resume),
                null(),
            )
        };
        Ok(bool_report(ok, needed, usize::try_from(returned).unwrap_or(0)))
    }

    #[allow(unsafe_code)]
    fn query_config<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.services)?;
        let (ptr, cb) = buffer_parts(buffer);
        let mut needed = 0u32;
        let ok = unsafe {
            (e.query_service_config)(to_native(service), ptr, cb, std::ptr::from_mut(&mut needed))
        };
        Ok(bool_report(ok, needed, 1))
    }

    #[allow(unsafe_code)]
    fn query_config2<'a>(
        &'a self,
        service: RawHandle,
        level: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.services)?;
        let (ptr, cb) = buffer_parts(buffer);
        let mut needed = 0u32;
        let ok = unsafe {
            (e.query_service_config2)(
                to_native(service),
                level,
                ptr,
                cb,
                std::ptr::from_mut(&mut needed),
            )
        };
        Ok(bool_report(ok, needed, 1))
    }

    #[allow(unsafe_code)]
    fn query_status<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.services)?;
        let (ptr, cb) = buffer_parts(buffer);
        let mut needed = 0u32;
        let ok = unsafe {
            (e.query_service_status_ex)(
                to_native(service),
                SC_STATUS_PROCESS_INFO,
                ptr,
                cb,
                std::ptr::from_mut(&mut needed),
            )
        };
        Ok(bool_report(ok, needed, 1))
    }
}

impl FolderNative for WindowsNative {
    #[allow(unsafe_code)]
    fn known_folder_path<'a>(
        &'a self,
        id: &Uuid,
        _buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let e = entries(&self.folders)?;
        let mut out: *mut u16 = null_mut();
        let (data1, data2, data3, data4) = id.as_fields();
        let guid = GUID {
            data1,
            data2,
            data3,
            data4: *data4,
        };
        let hr = unsafe {
            (e.sh_get_known_folder_path)(
                std::ptr::from_ref(&guid),
                0,
                0,
                std::ptr::from_mut(&mut out),
            )
        };
        let status = NativeStatus::from_hresult(hr, !out.is_null());
        let Some(ptr) = NonNull::new(out.cast::<u8>()) else {
            return Ok(CallReport::new(status));
        };
        if hr < 0 {
            // SAFETY: a non-null result must be released with `CoTaskMemFree`
            // even when the call fails; nothing reads it.
            drop(unsafe { RawBuffer::adopt(&self.cotask, ptr, 0) });
            return Ok(CallReport::new(status));
        }
        let mut units = 0usize;
        while units < MAX_WIDE_PATH {
            // SAFETY: the callee returned a NUL-terminated string and the scan
            // stops at the terminator.
            let unit = unsafe { out.add(units).read_unaligned() };
            units += 1;
            if unit == 0 {
                break;
            }
        }
        // SAFETY: `ptr` came from `SHGetKnownFolderPath`; the buffer releases
        // it with `CoTaskMemFree`.
        let block = unsafe { RawBuffer::adopt(&self.cotask, ptr, units.saturating_mul(2)) };
        Ok(CallReport::new(NativeStatus::Success)
            .with_returned(1)
            .with_adopted(Some(block)))
    }
}
