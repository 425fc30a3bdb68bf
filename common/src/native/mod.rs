//! Entry-point families the query façades call into.
//!
//! Every family is a trait so the façades run unchanged against the real
//! Windows layer or the scripted `fake::FakeNative` (tests and the `fake`
//! feature).

#[cfg(any(test, feature = "fake"))]
pub mod fake;
#[cfg(windows)]
pub mod windows;

use uuid::Uuid;

use crate::buffer::{NativeAllocator, RawBuffer};
use crate::error::QueryError;
use crate::layout::PointerWidth;
use crate::negotiate::CallReport;

/// Opaque native handle value (`SC_HANDLE`, find handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub usize);

/// Closes its handle exactly once when dropped.
pub struct ScopedHandle<F: FnMut(RawHandle)> {
    handle: RawHandle,
    close: Option<F>,
}

impl<F: FnMut(RawHandle)> ScopedHandle<F> {
    pub fn new(handle: RawHandle, close: F) -> Self {
        Self {
            handle,
            close: Some(close),
        }
    }

    pub fn raw(&self) -> RawHandle {
        self.handle
    }
}

impl<F: FnMut(RawHandle)> Drop for ScopedHandle<F> {
    fn drop(&mut self) {
        if let Some(mut close) = self.close.take() {
            close(self.handle);
        }
    }
}

pub trait NativeBase {
    /// Allocator for caller-provided buffers.
    fn allocator(&self) -> &dyn NativeAllocator;

    fn pointer_width(&self) -> PointerWidth;
}

#[allow(clippy::missing_errors_doc)]
pub trait SessionNative: NativeBase {
    /// `NetSessionEnum`; the callee allocates the result block.
    fn net_session_enum<'a>(
        &'a self,
        server: Option<&str>,
        level: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;
}

#[allow(clippy::missing_errors_doc)]
pub trait DirectoryNative: NativeBase {
    /// `FindFirstFileExW`. `Ok(None)` when nothing matches the pattern.
    fn find_first(
        &self,
        pattern: &str,
        large_fetch: bool,
        data: &mut [u8],
    ) -> Result<Option<RawHandle>, QueryError>;

    /// `FindNextFileW`. `Ok(false)` once the search is exhausted.
    fn find_next(&self, handle: RawHandle, data: &mut [u8]) -> Result<bool, QueryError>;

    fn find_close(&self, handle: RawHandle);
}

#[allow(clippy::missing_errors_doc)]
pub trait ServiceNative: NativeBase {
    /// `OpenSCManagerW` against `host` (local machine for `None`).
    fn open_manager(&self, host: Option<&str>) -> Result<RawHandle, QueryError>;

    fn open_service(&self, manager: RawHandle, name: &str) -> Result<RawHandle, QueryError>;

    fn close_service_handle(&self, handle: RawHandle);

    fn enum_services<'a>(
        &'a self,
        manager: RawHandle,
        service_type: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;

    fn query_config<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;

    fn query_config2<'a>(
        &'a self,
        service: RawHandle,
        level: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;

    fn query_status<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;
}

#[allow(clippy::missing_errors_doc)]
pub trait FolderNative: NativeBase {
    /// `SHGetKnownFolderPath`; the callee allocates the returned string.
    fn known_folder_path<'a>(
        &'a self,
        id: &Uuid,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError>;
}

#[cfg(windows)]
pub type PlatformNative = windows::WindowsNative;

/// Stand-in on platforms without the Windows entry points; never constructed.
#[cfg(not(windows))]
#[derive(Debug)]
pub enum PlatformNative {}

/// The native layer for the running platform.
#[allow(clippy::missing_errors_doc)]
pub fn platform() -> Result<PlatformNative, QueryError> {
    #[cfg(windows)]
    {
        Ok(windows::WindowsNative::load())
    }
    #[cfg(not(windows))]
    {
        Err(QueryError::Unsupported {
            message: "原生查询仅在 Windows 上可用".to_string(),
        })
    }
}

#[cfg(not(windows))]
mod unsupported {
    use super::{
        CallReport, DirectoryNative, FolderNative, NativeAllocator, NativeBase,
        PlatformNative, PointerWidth, QueryError, RawBuffer, RawHandle, ServiceNative,
        SessionNative, Uuid,
    };

    impl NativeBase for PlatformNative {
        fn allocator(&self) -> &dyn NativeAllocator {
            match *self {}
        }

        fn pointer_width(&self) -> PointerWidth {
            match *self {}
        }
    }

    impl SessionNative for PlatformNative {
        fn net_session_enum<'a>(
            &'a self,
            _server: Option<&str>,
            _level: u32,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }
    }

    impl DirectoryNative for PlatformNative {
        fn find_first(
            &self,
            _pattern: &str,
            _large_fetch: bool,
            _data: &mut [u8],
        ) -> Result<Option<RawHandle>, QueryError> {
            match *self {}
        }

        fn find_next(&self, _handle: RawHandle, _data: &mut [u8]) -> Result<bool, QueryError> {
            match *self {}
        }

        fn find_close(&self, _handle: RawHandle) {
            match *self {}
        }
    }

    impl ServiceNative for PlatformNative {
        fn open_manager(&self, _host: Option<&str>) -> Result<RawHandle, QueryError> {
            match *self {}
        }

        fn open_service(&self, _manager: RawHandle, _name: &str) -> Result<RawHandle, QueryError> {
            match *self {}
        }

        fn close_service_handle(&self, _handle: RawHandle) {
            match *self {}
        }

        fn enum_services<'a>(
            &'a self,
            _manager: RawHandle,
            _service_type: u32,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }

        fn query_config<'a>(
            &'a self,
            _service: RawHandle,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }

        fn query_config2<'a>(
            &'a self,
            _service: RawHandle,
            _level: u32,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }

        fn query_status<'a>(
            &'a self,
            _service: RawHandle,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }
    }

    impl FolderNative for PlatformNative {
        fn known_folder_path<'a>(
            &'a self,
            _id: &Uuid,
            _buffer: Option<&mut RawBuffer<'a>>,
        ) -> Result<CallReport<'a>, QueryError> {
            match *self {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::{RawHandle, ScopedHandle};

    #[test]
    fn scoped_handle_closes_once_on_drop() {
        let closed = Cell::new(0);
        {
            let guard = ScopedHandle::new(RawHandle(7), |h| {
                assert_eq!(h, RawHandle(7));
                closed.set(closed.get() + 1);
            });
            assert_eq!(guard.raw(), RawHandle(7));
        }
        assert_eq!(closed.get(), 1);
    }

    #[cfg(not(windows))]
    #[test]
    fn platform_is_unsupported_off_windows() {
        assert!(matches!(
            super::platform(),
            Err(crate::error::QueryError::Unsupported { .. })
        ));
    }
}
