//! Bounds-checked decoding of native record buffers.
//!
//! A [`BufferView`] is a byte slice plus the address it lives at in the
//! producing process. Embedded pointers are absolute addresses; they are
//! translated back into offsets and rejected unless they land inside the
//! slice. Nothing here keeps a reference into the slice once a record has
//! been decoded.

pub mod find;
pub mod service;
pub mod session;

use uuid::Uuid;

use crate::error::QueryError;
use crate::layout::{FieldKind, GUID, PointerWidth, ResolvedLayout};

/// Turns `count` records in a buffer into owned values.
pub trait RecordDecoder {
    type Record;

    fn width(&self) -> PointerWidth;

    #[allow(clippy::missing_errors_doc)]
    fn decode(&self, view: BufferView<'_>, count: usize) -> Result<Vec<Self::Record>, QueryError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    bytes: &'a [u8],
    base: u64,
    width: PointerWidth,
}

impl<'a> BufferView<'a> {
    pub fn new(bytes: &'a [u8], base: u64, width: PointerWidth) -> Self {
        Self { bytes, base, width }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn slice(
        &self,
        off: usize,
        len: usize,
        record: &'static str,
    ) -> Result<&'a [u8], QueryError> {
        let end = off
            .checked_add(len)
            .ok_or_else(|| QueryError::malformed(record, "偏移溢出"))?;
        self.bytes.get(off..end).ok_or_else(|| {
            QueryError::malformed(
                record,
                format!("读取 [{off}, {end}) 越过缓冲区长度 {}", self.bytes.len()),
            )
        })
    }

    fn array<const N: usize>(
        &self,
        off: usize,
        record: &'static str,
    ) -> Result<[u8; N], QueryError> {
        let b = self.slice(off, N, record)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u8_at(&self, off: usize, record: &'static str) -> Result<u8, QueryError> {
        Ok(self.array::<1>(off, record)?[0])
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u16_at(&self, off: usize, record: &'static str) -> Result<u16, QueryError> {
        Ok(u16::from_le_bytes(self.array(off, record)?))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u32_at(&self, off: usize, record: &'static str) -> Result<u32, QueryError> {
        Ok(u32::from_le_bytes(self.array(off, record)?))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u64_at(&self, off: usize, record: &'static str) -> Result<u64, QueryError> {
        Ok(u64::from_le_bytes(self.array(off, record)?))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn ptr_at(&self, off: usize, record: &'static str) -> Result<u64, QueryError> {
        match self.width {
            PointerWidth::W32 => self.u32_at(off, record).map(u64::from),
            PointerWidth::W64 => self.u64_at(off, record),
        }
    }

    /// Maps an embedded address to an offset; null maps to `None`.
    #[allow(clippy::missing_errors_doc)]
    pub fn pointer_offset(
        &self,
        ptr: u64,
        record: &'static str,
    ) -> Result<Option<usize>, QueryError> {
        if ptr == 0 {
            return Ok(None);
        }
        let rel = ptr
            .checked_sub(self.base)
            .and_then(|rel| usize::try_from(rel).ok())
            .filter(|rel| *rel < self.bytes.len())
            .ok_or_else(|| {
                QueryError::malformed(
                    record,
                    format!(
                        "指针 {ptr:#x} 不在缓冲区 [{:#x}, +{}) 内",
                        self.base,
                        self.bytes.len()
                    ),
                )
            })?;
        Ok(Some(rel))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn record<'l>(
        &self,
        layout: &'l ResolvedLayout,
        off: usize,
    ) -> Result<Record<'a, 'l>, QueryError> {
        self.slice(off, layout.size(), layout.name())?;
        Ok(Record {
            view: *self,
            offset: off,
            layout,
        })
    }

    /// `count` consecutive records starting at `off`, stride `layout.size()`.
    #[allow(clippy::missing_errors_doc)]
    pub fn records<'l>(
        &self,
        layout: &'l ResolvedLayout,
        off: usize,
        count: usize,
    ) -> Result<Vec<Record<'a, 'l>>, QueryError> {
        let total = count
            .checked_mul(layout.size())
            .ok_or_else(|| QueryError::malformed(layout.name(), "记录数溢出"))?;
        self.slice(off, total, layout.name()).map_err(|_| {
            QueryError::malformed(
                layout.name(),
                format!(
                    "{count} 条记录（每条 {} 字节）超出缓冲区长度 {}",
                    layout.size(),
                    self.bytes.len()
                ),
            )
        })?;
        let mut out = Vec::with_capacity(count);
        let mut cursor = off;
        for _ in 0..count {
            out.push(Record {
                view: *self,
                offset: cursor,
                layout,
            });
            cursor = cursor.saturating_add(layout.size());
        }
        Ok(out)
    }

    /// Follows `ptr` to a trailing array of `count` fixed-size records.
    ///
    /// With `count == 0` the pointer is not looked at.
    #[allow(clippy::missing_errors_doc)]
    pub fn trailing_array<'l>(
        &self,
        ptr: u64,
        count: usize,
        layout: &'l ResolvedLayout,
    ) -> Result<Vec<Record<'a, 'l>>, QueryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let Some(off) = self.pointer_offset(ptr, layout.name())? else {
            return Err(QueryError::malformed(
                layout.name(),
                format!("声明了 {count} 个元素但数组指针为空"),
            ));
        };
        self.records(layout, off, count)
    }

    /// Reads a NUL-terminated UTF-16 string starting at `off`.
    #[allow(clippy::missing_errors_doc)]
    pub fn wide_cstr_at(&self, off: usize, record: &'static str) -> Result<String, QueryError> {
        let tail = self.bytes.get(off..).unwrap_or_default();
        let (words, terminated) = utf16_until_nul(tail);
        if !terminated {
            return Err(QueryError::malformed(
                record,
                format!("偏移 {off} 处的字符串缺少结束符"),
            ));
        }
        Ok(String::from_utf16_lossy(words.as_slice()))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn wide_cstr_ptr(
        &self,
        ptr: u64,
        record: &'static str,
    ) -> Result<Option<String>, QueryError> {
        match self.pointer_offset(ptr, record)? {
            None => Ok(None),
            Some(off) => self.wide_cstr_at(off, record).map(Some),
        }
    }

    /// Decodes a multi-string list at `off`.
    ///
    /// Stops at the first empty string or once fewer than two bytes of
    /// `budget` remain. The budget shrinks by the bytes each string occupies,
    /// terminator included, saturating at zero. `None` budgets to the end of
    /// the buffer; a budget past the end is clamped to it.
    #[allow(clippy::missing_errors_doc)]
    pub fn multi_sz_at(
        &self,
        off: usize,
        budget: Option<usize>,
        record: &'static str,
    ) -> Result<Vec<String>, QueryError> {
        let available = self.bytes.len().checked_sub(off).ok_or_else(|| {
            QueryError::malformed(record, format!("多字符串偏移 {off} 越界"))
        })?;
        let mut remaining = budget.map_or(available, |b| b.min(available));
        let mut cursor = off;
        let mut out = Vec::new();
        while remaining >= 2 {
            let window = self.slice(cursor, remaining, record)?;
            let (words, terminated) = utf16_until_nul(window);
            if words.is_empty() {
                break;
            }
            out.push(String::from_utf16_lossy(words.as_slice()));
            let consumed = words.len().saturating_add(usize::from(terminated)).saturating_mul(2);
            remaining = remaining.saturating_sub(consumed);
            cursor = cursor.saturating_add(consumed);
        }
        Ok(out)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn multi_sz_ptr(
        &self,
        ptr: u64,
        budget: Option<usize>,
        record: &'static str,
    ) -> Result<Vec<String>, QueryError> {
        match self.pointer_offset(ptr, record)? {
            None => Ok(Vec::new()),
            Some(off) => self.multi_sz_at(off, budget, record),
        }
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn guid_at(&self, off: usize) -> Result<Uuid, QueryError> {
        let layout = GUID.resolve(self.width);
        self.record(&layout, off)?;
        Ok(Uuid::from_bytes_le(self.array(off, GUID.name)?))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn guid_ptr(&self, ptr: u64, record: &'static str) -> Result<Option<Uuid>, QueryError> {
        match self.pointer_offset(ptr, record)? {
            None => Ok(None),
            Some(off) => self.guid_at(off).map(Some),
        }
    }
}

/// One fixed-size record inside a [`BufferView`], read field-by-field by name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a, 'l> {
    view: BufferView<'a>,
    offset: usize,
    layout: &'l ResolvedLayout,
}

impl<'a> Record<'a, '_> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn view(&self) -> BufferView<'a> {
        self.view
    }

    fn typed(
        &self,
        name: &str,
        want: fn(FieldKind) -> bool,
    ) -> Result<(usize, FieldKind), QueryError> {
        let (off, kind) = self.layout.field(name)?;
        if !want(kind) {
            return Err(QueryError::malformed(
                self.layout.name(),
                format!("字段 {name} 的类型是 {kind:?}"),
            ));
        }
        Ok((self.offset.saturating_add(off), kind))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u8(&self, name: &str) -> Result<u8, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::U8)?;
        self.view.u8_at(off, self.layout.name())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u16(&self, name: &str) -> Result<u16, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::U16)?;
        self.view.u16_at(off, self.layout.name())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u32(&self, name: &str) -> Result<u32, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::U32)?;
        self.view.u32_at(off, self.layout.name())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn u64(&self, name: &str) -> Result<u64, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::U64)?;
        self.view.u64_at(off, self.layout.name())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn flag(&self, name: &str) -> Result<bool, QueryError> {
        self.u32(name).map(|v| v != 0)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn count(&self, name: &str) -> Result<usize, QueryError> {
        let v = self.u32(name)?;
        usize::try_from(v).map_err(|_| QueryError::malformed(self.layout.name(), "计数溢出"))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn pointer(&self, name: &str) -> Result<u64, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::Ptr)?;
        self.view.ptr_at(off, self.layout.name())
    }

    /// `FILETIME` as a single 100ns tick count.
    #[allow(clippy::missing_errors_doc)]
    pub fn filetime(&self, name: &str) -> Result<u64, QueryError> {
        let (off, _) = self.typed(name, |k| k == FieldKind::FileTime)?;
        let low = self.view.u32_at(off, self.layout.name())?;
        let high = self.view.u32_at(off.saturating_add(4), self.layout.name())?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn bytes(&self, name: &str) -> Result<&'a [u8], QueryError> {
        let (off, kind) = self.typed(name, |k| matches!(k, FieldKind::Bytes(_)))?;
        let FieldKind::Bytes(n) = kind else {
            return Err(QueryError::malformed(self.layout.name(), "字段类型不符"));
        };
        self.view.slice(off, n, self.layout.name())
    }

    /// Inline fixed-length UTF-16 field, cut at the first NUL.
    #[allow(clippy::missing_errors_doc)]
    pub fn inline_wide(&self, name: &str) -> Result<String, QueryError> {
        let (off, kind) = self.typed(name, |k| matches!(k, FieldKind::WideChars(_)))?;
        let FieldKind::WideChars(n) = kind else {
            return Err(QueryError::malformed(self.layout.name(), "字段类型不符"));
        };
        let raw = self.view.slice(off, n.saturating_mul(2), self.layout.name())?;
        let (words, _) = utf16_until_nul(raw);
        Ok(String::from_utf16_lossy(words.as_slice()))
    }

    /// Follows a string pointer field.
    #[allow(clippy::missing_errors_doc)]
    pub fn string(&self, name: &str) -> Result<Option<String>, QueryError> {
        let ptr = self.pointer(name)?;
        self.view.wide_cstr_ptr(ptr, self.layout.name())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn multi_string(
        &self,
        name: &str,
        budget: Option<usize>,
    ) -> Result<Vec<String>, QueryError> {
        let ptr = self.pointer(name)?;
        self.view.multi_sz_ptr(ptr, budget, self.layout.name())
    }

    /// An embedded struct field, decoded with its own resolved layout.
    #[allow(clippy::missing_errors_doc)]
    pub fn nested<'n>(
        &self,
        name: &str,
        layout: &'n ResolvedLayout,
    ) -> Result<Record<'a, 'n>, QueryError> {
        let (off, kind) = self.typed(name, |k| matches!(k, FieldKind::Struct(_)))?;
        let FieldKind::Struct(inner) = kind else {
            return Err(QueryError::malformed(self.layout.name(), "字段类型不符"));
        };
        if inner.name != layout.name() {
            return Err(QueryError::malformed(
                self.layout.name(),
                format!("字段 {name} 需要布局 {}", inner.name),
            ));
        }
        self.view.record(layout, off)
    }
}

/// Decodes `count` records of `layout` starting at offset 0 with `decode_one`.
#[allow(clippy::missing_errors_doc)]
pub fn decode_records<T, F>(
    view: BufferView<'_>,
    layout: &ResolvedLayout,
    count: usize,
    mut decode_one: F,
) -> Result<Vec<T>, QueryError>
where
    F: FnMut(&Record<'_, '_>) -> Result<T, QueryError>,
{
    view.records(layout, 0, count)?
        .iter()
        .map(|rec| decode_one(rec))
        .collect()
}

fn utf16_until_nul(bytes: &[u8]) -> (Vec<u16>, bool) {
    let mut words = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let w = u16::from_le_bytes([chunk[0], chunk[1]]);
        if w == 0 {
            return (words, true);
        }
        words.push(w);
    }
    (words, false)
}

pub fn filetime_100ns_to_unix_ms(filetime_100ns: u64) -> i64 {
    const EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;
    if filetime_100ns < EPOCH_DIFF_100NS {
        return 0;
    }
    let diff = filetime_100ns.saturating_sub(EPOCH_DIFF_100NS);
    let ms = diff / 10_000;
    i64::try_from(ms).unwrap_or(i64::MAX)
}
