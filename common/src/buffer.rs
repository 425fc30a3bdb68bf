use std::fmt;
use std::ptr::NonNull;

use crate::decode::BufferView;
use crate::error::QueryError;
use crate::layout::PointerWidth;

/// Allocation entry points for one family of native memory.
///
/// Memory handed out by (or adopted from) an allocator must be released through
/// that same allocator; a generic Rust allocator never touches it.
#[allow(unsafe_code)]
pub trait NativeAllocator {
    fn name(&self) -> &'static str;

    /// Returns a zero-initialized block of exactly `len` bytes.
    #[allow(clippy::missing_errors_doc)]
    fn allocate(&self, len: usize) -> Result<NonNull<u8>, QueryError>;

    /// # Safety
    ///
    /// `ptr` must have been produced by this allocator (or by the native call
    /// paired with it) for a block of `len` bytes, and not released before.
    unsafe fn release(&self, ptr: NonNull<u8>, len: usize);
}

/// Single-owner block of foreign memory, released exactly once on drop.
pub struct RawBuffer<'a> {
    ptr: NonNull<u8>,
    len: usize,
    allocator: &'a dyn NativeAllocator,
}

#[allow(unsafe_code)]
impl<'a> RawBuffer<'a> {
    #[allow(clippy::missing_errors_doc)]
    pub fn allocate(allocator: &'a dyn NativeAllocator, len: usize) -> Result<Self, QueryError> {
        if len == 0 {
            return Err(QueryError::InvalidArgument {
                message: format!("{} 不能分配 0 字节", allocator.name()),
            });
        }
        let ptr = allocator.allocate(len)?;
        tracing::trace!(allocator = allocator.name(), len, "allocated native buffer");
        Ok(Self {
            ptr,
            len,
            allocator,
        })
    }

    /// Takes ownership of a block the native side allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` initialized bytes until released,
    /// and `allocator` must be the matching deallocation entry point.
    pub unsafe fn adopt(allocator: &'a dyn NativeAllocator, ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            allocator,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn address(&self) -> u64 {
        self.ptr.as_ptr() as usize as u64
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// A bounds-checked view whose embedded pointers are relative to this block.
    pub fn view(&self, width: PointerWidth) -> BufferView<'_> {
        BufferView::new(self.as_bytes(), self.address(), width)
    }
}

#[allow(unsafe_code)]
impl Drop for RawBuffer<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            allocator = self.allocator.name(),
            len = self.len,
            "releasing native buffer"
        );
        unsafe { self.allocator.release(self.ptr, self.len) };
    }
}

impl fmt::Debug for RawBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::RawBuffer;
    use crate::native::fake::CountingAllocator;

    #[test]
    fn dropping_releases_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
        let alloc = CountingAllocator::new();
        {
            let mut buf = RawBuffer::allocate(&alloc, 64)?;
            assert_eq!(buf.len(), 64);
            assert!(buf.as_bytes().iter().all(|b| *b == 0));
            buf.as_bytes_mut()[0] = 0xAA;
            assert_eq!(buf.as_bytes()[0], 0xAA);
            assert_eq!(alloc.allocations(), 1);
            assert_eq!(alloc.releases(), 0);
        }
        assert_eq!(alloc.releases(), 1);
        assert_eq!(alloc.outstanding(), 0);
        assert_eq!(alloc.invalid_releases(), 0);
        Ok(())
    }

    #[test]
    fn zero_length_allocation_is_rejected() {
        let alloc = CountingAllocator::new();
        assert!(RawBuffer::allocate(&alloc, 0).is_err());
        assert_eq!(alloc.allocations(), 0);
    }
}
