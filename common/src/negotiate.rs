//! The probe-then-fetch protocol shared by every sized native query.
//!
//! Exactly one probe is issued without a buffer. If it reports that a buffer
//! of `bytes_needed` is required, exactly one buffer of that size is allocated
//! and exactly one fetch is issued. Anything other than success on the fetch is
//! a [`QueryError::Failure`]; there is no third attempt.

use crate::buffer::{NativeAllocator, RawBuffer};
use crate::decode::RecordDecoder;
use crate::error::QueryError;

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_NO_MORE_FILES: u32 = 18;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_MORE_DATA: u32 = 234;
pub const ERROR_NO_MORE_ITEMS: u32 = 259;
pub const E_UNEXPECTED: u32 = 0x8000_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Success,
    BufferTooSmall,
    MoreData,
    NoMoreData,
    Other(u32),
}

impl NativeStatus {
    pub fn from_win32(code: u32) -> Self {
        match code {
            ERROR_SUCCESS => NativeStatus::Success,
            ERROR_INSUFFICIENT_BUFFER => NativeStatus::BufferTooSmall,
            ERROR_MORE_DATA => NativeStatus::MoreData,
            ERROR_NO_MORE_ITEMS | ERROR_NO_MORE_FILES => NativeStatus::NoMoreData,
            other => NativeStatus::Other(other),
        }
    }

    /// Status of an `HRESULT` call whose out-parameter may stay null.
    /// Success without a result is `E_UNEXPECTED`.
    pub fn from_hresult(hr: i32, produced: bool) -> Self {
        if hr < 0 {
            NativeStatus::Other(u32::from_ne_bytes(hr.to_ne_bytes()))
        } else if produced {
            NativeStatus::Success
        } else {
            NativeStatus::Other(E_UNEXPECTED)
        }
    }

    pub fn code(self) -> u32 {
        match self {
            NativeStatus::Success => ERROR_SUCCESS,
            NativeStatus::BufferTooSmall => ERROR_INSUFFICIENT_BUFFER,
            NativeStatus::MoreData => ERROR_MORE_DATA,
            NativeStatus::NoMoreData => ERROR_NO_MORE_ITEMS,
            NativeStatus::Other(code) => code,
        }
    }
}

/// What one native invocation reported back.
#[derive(Debug)]
pub struct CallReport<'a> {
    pub status: NativeStatus,
    pub bytes_needed: usize,
    pub returned: usize,
    /// A block the callee allocated itself (released through its own allocator).
    pub adopted: Option<RawBuffer<'a>>,
}

impl<'a> CallReport<'a> {
    pub fn new(status: NativeStatus) -> Self {
        Self {
            status,
            bytes_needed: 0,
            returned: 0,
            adopted: None,
        }
    }

    #[must_use]
    pub fn with_bytes_needed(mut self, bytes_needed: usize) -> Self {
        self.bytes_needed = bytes_needed;
        self
    }

    #[must_use]
    pub fn with_returned(mut self, returned: usize) -> Self {
        self.returned = returned;
        self
    }

    #[must_use]
    pub fn with_adopted(mut self, adopted: Option<RawBuffer<'a>>) -> Self {
        self.adopted = adopted;
        self
    }
}

#[derive(Debug)]
pub enum QueryOutcome<'a> {
    Success {
        count: usize,
        buffer: Option<RawBuffer<'a>>,
    },
    InsufficientBuffer {
        required: usize,
    },
    Failure(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probe,
    Fetch,
}

fn classify<'a>(report: CallReport<'a>, phase: Phase) -> QueryOutcome<'a> {
    let CallReport {
        status,
        bytes_needed,
        returned,
        adopted,
    } = report;
    match (status, phase) {
        (NativeStatus::Success | NativeStatus::NoMoreData, _) => QueryOutcome::Success {
            count: returned,
            buffer: adopted,
        },
        (NativeStatus::BufferTooSmall | NativeStatus::MoreData, Phase::Probe)
            if bytes_needed > 0 && adopted.is_none() =>
        {
            QueryOutcome::InsufficientBuffer {
                required: bytes_needed,
            }
        }
        (status, _) => QueryOutcome::Failure(status.code()),
    }
}

pub struct Negotiator<'a> {
    allocator: &'a dyn NativeAllocator,
}

impl<'a> Negotiator<'a> {
    pub fn new(allocator: &'a dyn NativeAllocator) -> Self {
        Self { allocator }
    }

    /// Runs probe and (when asked for) fetch, returning the record count and
    /// the buffer holding them.
    #[allow(clippy::missing_errors_doc)]
    pub fn run<F>(
        &self,
        call: &'static str,
        mut invoke: F,
    ) -> Result<(usize, Option<RawBuffer<'a>>), QueryError>
    where
        F: FnMut(Option<&mut RawBuffer<'a>>) -> Result<CallReport<'a>, QueryError>,
    {
        let required = match classify(invoke(None)?, Phase::Probe) {
            QueryOutcome::Success { count, buffer } => {
                tracing::debug!(call, count, "probe returned data directly");
                return Ok((count, buffer));
            }
            QueryOutcome::Failure(code) => {
                tracing::debug!(call, code, "probe failed");
                return Err(QueryError::Failure { call, code });
            }
            QueryOutcome::InsufficientBuffer { required } => required,
        };

        tracing::debug!(call, required, "probe asked for buffer");
        let mut buffer = RawBuffer::allocate(self.allocator, required)?;
        match classify(invoke(Some(&mut buffer))?, Phase::Fetch) {
            QueryOutcome::Success { count, .. } => Ok((count, Some(buffer))),
            QueryOutcome::InsufficientBuffer { .. } => Err(QueryError::Failure {
                call,
                code: ERROR_INSUFFICIENT_BUFFER,
            }),
            QueryOutcome::Failure(code) => {
                tracing::debug!(call, code, required, "fetch failed");
                Err(QueryError::Failure { call, code })
            }
        }
    }

    /// Enumerate-many: negotiates, decodes, then releases the buffer.
    #[allow(clippy::missing_errors_doc)]
    pub fn query<F, D>(
        &self,
        call: &'static str,
        invoke: F,
        decoder: &D,
    ) -> Result<Vec<D::Record>, QueryError>
    where
        F: FnMut(Option<&mut RawBuffer<'a>>) -> Result<CallReport<'a>, QueryError>,
        D: RecordDecoder,
    {
        let (count, buffer) = self.run(call, invoke)?;
        let Some(buffer) = buffer else {
            if count == 0 {
                return Ok(Vec::new());
            }
            return Err(QueryError::malformed(
                call,
                format!("报告了 {count} 条记录但没有缓冲区"),
            ));
        };
        let records = decoder.decode(buffer.view(decoder.width()), count);
        drop(buffer);
        records
    }

    /// Fetch-one: negotiates and hands the blob to the caller, who decodes it
    /// and lets it drop.
    #[allow(clippy::missing_errors_doc)]
    pub fn query_single<F>(
        &self,
        call: &'static str,
        invoke: F,
    ) -> Result<Option<RawBuffer<'a>>, QueryError>
    where
        F: FnMut(Option<&mut RawBuffer<'a>>) -> Result<CallReport<'a>, QueryError>,
    {
        self.run(call, invoke).map(|(_, buffer)| buffer)
    }
}
