//! Scripted native layer with allocation and call accounting.
//!
//! Built for unit tests and behind the `fake` feature for integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ptr::NonNull;

use uuid::Uuid;

use crate::buffer::{NativeAllocator, RawBuffer};
use crate::decode::find::find_data_size;
use crate::error::QueryError;
use crate::layout::{FieldKind, PointerWidth, ResolvedLayout, WIN32_FIND_DATAW};
use crate::native::{
    DirectoryNative, FolderNative, NativeBase, RawHandle, ServiceNative, SessionNative,
};
use crate::negotiate::{
    CallReport, ERROR_ACCESS_DENIED, ERROR_CALL_NOT_IMPLEMENTED, ERROR_INSUFFICIENT_BUFFER,
    NativeStatus,
};

const ERROR_PATH_NOT_FOUND: u32 = 3;
const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
const E_FILE_NOT_FOUND: u32 = 0x8007_0002;

/// Heap-backed allocator that counts allocations and releases.
///
/// Releasing a pointer it never handed out is recorded in
/// [`invalid_releases`](Self::invalid_releases) and otherwise ignored.
pub struct CountingAllocator {
    name: &'static str,
    live: RefCell<HashMap<usize, (*mut [u8], usize)>>,
    allocations: Cell<usize>,
    releases: Cell<usize>,
    invalid_releases: Cell<usize>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::named("CountingAllocator")
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            live: RefCell::new(HashMap::new()),
            allocations: Cell::new(0),
            releases: Cell::new(0),
            invalid_releases: Cell::new(0),
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn releases(&self) -> usize {
        self.releases.get()
    }

    pub fn outstanding(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases.get()
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(unsafe_code)]
impl NativeAllocator for CountingAllocator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn allocate(&self, len: usize) -> Result<NonNull<u8>, QueryError> {
        let block: *mut [u8] = Box::into_raw(vec![0u8; len].into_boxed_slice());
        let ptr = NonNull::new(block.cast::<u8>()).ok_or_else(|| QueryError::InvalidArgument {
            message: format!("{} 分配 {len} 字节失败", self.name),
        })?;
        self.live
            .borrow_mut()
            .insert(ptr.as_ptr() as usize, (block, len));
        self.allocations.set(self.allocations.get() + 1);
        Ok(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, len: usize) {
        let entry = self.live.borrow_mut().remove(&(ptr.as_ptr() as usize));
        match entry {
            Some((block, allocated)) if allocated == len => {
                // SAFETY: `block` came from `Box::into_raw` in `allocate` and is
                // removed from `live` before being reclaimed.
                drop(unsafe { Box::from_raw(block) });
                self.releases.set(self.releases.get() + 1);
            }
            Some(other) => {
                self.live.borrow_mut().insert(ptr.as_ptr() as usize, other);
                self.invalid_releases.set(self.invalid_releases.get() + 1);
            }
            None => self.invalid_releases.set(self.invalid_releases.get() + 1),
        }
    }
}

#[allow(unsafe_code)]
impl Drop for CountingAllocator {
    fn drop(&mut self) {
        for (_, (block, _)) in self.live.borrow_mut().drain() {
            // SAFETY: every entry still in `live` is an unreleased `Box::into_raw` block.
            drop(unsafe { Box::from_raw(block) });
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Offset(usize),
    Absolute(u64),
}

/// Lays out native record buffers: fixed records first, variable data
/// appended behind them, pointers patched to absolute addresses by
/// [`finish`](Self::finish).
#[derive(Debug, Clone)]
pub struct BufferBuilder {
    width: PointerWidth,
    bytes: Vec<u8>,
    pointers: Vec<(usize, Target)>,
}

const BUILDER: &str = "BufferBuilder";

fn wide_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

impl BufferBuilder {
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            bytes: Vec::new(),
            pointers: Vec::new(),
        }
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn align_to(&mut self, align: usize) {
        let padded = self.bytes.len().next_multiple_of(align.max(1));
        self.bytes.resize(padded, 0);
    }

    /// Appends `count` zeroed records and returns the offset of the first.
    pub fn reserve_records(&mut self, layout: &ResolvedLayout, count: usize) -> usize {
        self.align_to(8);
        let off = self.bytes.len();
        self.bytes
            .resize(off + layout.size().saturating_mul(count), 0);
        off
    }

    pub fn append_bytes(&mut self, data: &[u8], align: usize) -> usize {
        self.align_to(align);
        let off = self.bytes.len();
        self.bytes.extend_from_slice(data);
        off
    }

    pub fn append_wide(&mut self, s: &str) -> usize {
        let mut data = wide_bytes(s);
        data.extend_from_slice(&[0, 0]);
        self.append_bytes(&data, 2)
    }

    /// Appends each string with its terminator, then the closing empty string.
    pub fn append_multi_sz(&mut self, items: &[&str]) -> usize {
        let mut data = Vec::new();
        for item in items {
            data.extend(wide_bytes(item));
            data.extend_from_slice(&[0, 0]);
        }
        data.extend_from_slice(&[0, 0]);
        self.append_bytes(&data, 2)
    }

    pub fn append_guid(&mut self, guid: Uuid) -> usize {
        self.append_bytes(&guid.to_bytes_le(), 4)
    }

    fn write(&mut self, off: usize, data: &[u8]) -> Result<(), QueryError> {
        let end = off
            .checked_add(data.len())
            .ok_or_else(|| QueryError::malformed(BUILDER, "偏移溢出"))?;
        let len = self.bytes.len();
        self.bytes
            .get_mut(off..end)
            .ok_or_else(|| {
                QueryError::malformed(BUILDER, format!("写入 {off}..{end} 超出 {len}"))
            })?
            .copy_from_slice(data);
        Ok(())
    }

    fn field(
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        accept: fn(FieldKind) -> bool,
    ) -> Result<(usize, FieldKind), QueryError> {
        let (off, kind) = layout.field(name)?;
        if !accept(kind) {
            return Err(QueryError::malformed(
                layout.name(),
                format!("字段 {name} 的类型是 {kind:?}"),
            ));
        }
        Ok((rec + off, kind))
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_u8(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        v: u8,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::U8)?;
        self.write(off, &[v])
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_u16(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        v: u16,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::U16)?;
        self.write(off, &v.to_le_bytes())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_u32(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        v: u32,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::U32)?;
        self.write(off, &v.to_le_bytes())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_u64(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        v: u64,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::U64)?;
        self.write(off, &v.to_le_bytes())
    }

    /// Writes a FILETIME as its low then high DWORD.
    #[allow(clippy::missing_errors_doc)]
    pub fn set_filetime(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        v: u64,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::FileTime)?;
        self.write(off, &v.to_le_bytes())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_inline_wide(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        s: &str,
    ) -> Result<(), QueryError> {
        let (off, kind) = Self::field(layout, rec, name, |k| matches!(k, FieldKind::WideChars(_)))?;
        let data = wide_bytes(s);
        if let FieldKind::WideChars(n) = kind
            && data.len() / 2 >= n
        {
            let max = n.saturating_sub(1);
            return Err(QueryError::malformed(
                layout.name(),
                format!("{name} 最多 {max} 个字符"),
            ));
        }
        self.write(off, &data)
    }

    /// Points `name` at `target`, an offset inside this buffer.
    #[allow(clippy::missing_errors_doc)]
    pub fn set_pointer(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        target: usize,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::Ptr)?;
        self.pointers.push((off, Target::Offset(target)));
        Ok(())
    }

    /// Stores `addr` verbatim, even if it lands outside the buffer.
    #[allow(clippy::missing_errors_doc)]
    pub fn set_raw_pointer(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        addr: u64,
    ) -> Result<(), QueryError> {
        let (off, _) = Self::field(layout, rec, name, |k| k == FieldKind::Ptr)?;
        self.pointers.push((off, Target::Absolute(addr)));
        Ok(())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_string(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        s: &str,
    ) -> Result<(), QueryError> {
        let target = self.append_wide(s);
        self.set_pointer(layout, rec, name, target)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn set_multi_sz(
        &mut self,
        layout: &ResolvedLayout,
        rec: usize,
        name: &str,
        items: &[&str],
    ) -> Result<(), QueryError> {
        let target = self.append_multi_sz(items);
        self.set_pointer(layout, rec, name, target)
    }

    /// Produces the bytes as they would sit at address `base`.
    #[allow(clippy::missing_errors_doc)]
    pub fn finish(&self, base: u64) -> Result<Vec<u8>, QueryError> {
        let mut out = self.clone();
        for (off, target) in &self.pointers {
            let addr = match *target {
                Target::Absolute(addr) => addr,
                Target::Offset(rel) => base
                    .checked_add(rel as u64)
                    .ok_or_else(|| QueryError::malformed(BUILDER, "地址溢出"))?,
            };
            match self.width {
                PointerWidth::W32 => {
                    let narrow = u32::try_from(addr).map_err(|_| {
                        QueryError::malformed(BUILDER, format!("地址 {addr:#x} 超出 32 位"))
                    })?;
                    out.write(*off, &narrow.to_le_bytes())?;
                }
                PointerWidth::W64 => out.write(*off, &addr.to_le_bytes())?,
            }
        }
        Ok(out.bytes)
    }
}

/// One `WIN32_FIND_DATAW` record for the native pointer width.
#[allow(clippy::missing_errors_doc)]
pub fn find_record(
    name: &str,
    attributes: u32,
    size: u64,
    filetime: u64,
) -> Result<Vec<u8>, QueryError> {
    let layout = WIN32_FIND_DATAW.resolve(PointerWidth::native());
    let mut b = BufferBuilder::new(PointerWidth::native());
    let rec = b.reserve_records(&layout, 1);
    b.set_u32(&layout, rec, "dwFileAttributes", attributes)?;
    b.set_filetime(&layout, rec, "ftCreationTime", filetime)?;
    b.set_filetime(&layout, rec, "ftLastAccessTime", filetime)?;
    b.set_filetime(&layout, rec, "ftLastWriteTime", filetime)?;
    #[allow(clippy::cast_possible_truncation)]
    {
        b.set_u32(&layout, rec, "nFileSizeHigh", (size >> 32) as u32)?;
        b.set_u32(&layout, rec, "nFileSizeLow", size as u32)?;
    }
    b.set_inline_wide(&layout, rec, "cFileName", name)?;
    b.finish(0)
}

/// Produces buffer contents for the address the buffer ends up at.
pub type Fill = Box<dyn Fn(u64) -> Result<Vec<u8>, QueryError>>;

/// Scripted behaviour of one native call.
pub enum Script {
    /// Probe reports the fill's length as too small; fetch writes it.
    Sized { count: usize, fill: Fill },
    /// First call returns a callee-allocated block holding the fill.
    Adopted { count: usize, fill: Fill },
    /// Every call reports this status.
    Status(u32),
    /// Probe asks for `needed` bytes; the fetch then reports `then`.
    Then { needed: usize, then: u32 },
}

impl Script {
    pub fn sized(
        count: usize,
        fill: impl Fn(u64) -> Result<Vec<u8>, QueryError> + 'static,
    ) -> Self {
        Script::Sized {
            count,
            fill: Box::new(fill),
        }
    }

    pub fn adopted(
        count: usize,
        fill: impl Fn(u64) -> Result<Vec<u8>, QueryError> + 'static,
    ) -> Self {
        Script::Adopted {
            count,
            fill: Box::new(fill),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeEntry {
    record: Vec<u8>,
}

struct FindState {
    entries: Vec<FakeEntry>,
    next: usize,
}

/// In-memory native layer. Calls are logged as `"Call:key"` strings.
pub struct FakeNative {
    width: PointerWidth,
    local: CountingAllocator,
    callee: CountingAllocator,
    scripts: HashMap<String, Script>,
    log: RefCell<Vec<String>>,
    denied_hosts: HashSet<String>,
    services: BTreeMap<String, Vec<String>>,
    directories: HashMap<String, Vec<FakeEntry>>,
    denied_directories: HashSet<String>,
    next_handle: Cell<usize>,
    open: RefCell<HashMap<usize, String>>,
    finds: RefCell<HashMap<usize, FindState>>,
    opened: Cell<usize>,
    closed: Cell<usize>,
}

impl Default for FakeNative {
    fn default() -> Self {
        Self::new()
    }
}

fn host_key(host: Option<&str>) -> String {
    host.unwrap_or("local").to_ascii_lowercase()
}

fn directory_key(pattern: &str) -> String {
    let trimmed = pattern.strip_suffix("\\*").unwrap_or(pattern);
    let trimmed = trimmed
        .strip_prefix("\\\\?\\UNC\\")
        .map(|rest| format!("\\\\{rest}"))
        .or_else(|| trimmed.strip_prefix("\\\\?\\").map(str::to_string))
        .unwrap_or_else(|| trimmed.to_string());
    trimmed.to_ascii_lowercase()
}

impl FakeNative {
    pub fn new() -> Self {
        Self::with_width(PointerWidth::native())
    }

    pub fn with_width(width: PointerWidth) -> Self {
        Self {
            width,
            local: CountingAllocator::named("LocalFree"),
            callee: CountingAllocator::named("NetApiBufferFree"),
            scripts: HashMap::new(),
            log: RefCell::new(Vec::new()),
            denied_hosts: HashSet::new(),
            services: BTreeMap::new(),
            directories: HashMap::new(),
            denied_directories: HashSet::new(),
            next_handle: Cell::new(0x100),
            open: RefCell::new(HashMap::new()),
            finds: RefCell::new(HashMap::new()),
            opened: Cell::new(0),
            closed: Cell::new(0),
        }
    }

    /// Scripts `call` for `key` (host, service name, `name:level` or folder id).
    pub fn script(&mut self, call: &str, key: &str, script: Script) -> &mut Self {
        self.scripts
            .insert(format!("{call}:{}", key.to_ascii_lowercase()), script);
        self
    }

    pub fn deny_host(&mut self, host: &str) -> &mut Self {
        self.denied_hosts.insert(host.to_ascii_lowercase());
        self
    }

    /// Registers services on `host` so `OpenServiceW` succeeds for them.
    pub fn add_services(&mut self, host: Option<&str>, names: &[&str]) -> &mut Self {
        self.services
            .entry(host_key(host))
            .or_default()
            .extend(names.iter().map(|n| n.to_ascii_lowercase()));
        self
    }

    /// Registers a directory listing; `path` is the plain (unprefixed) form.
    pub fn add_directory(&mut self, path: &str, entries: Vec<Vec<u8>>) -> &mut Self {
        self.directories.insert(
            directory_key(path),
            entries.into_iter().map(|record| FakeEntry { record }).collect(),
        );
        self
    }

    pub fn deny_directory(&mut self, path: &str) -> &mut Self {
        self.denied_directories.insert(directory_key(path));
        self
    }

    pub fn local(&self) -> &CountingAllocator {
        &self.local
    }

    pub fn callee(&self) -> &CountingAllocator {
        &self.callee
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Handles currently open (service and find handles).
    pub fn open_handles(&self) -> usize {
        self.open.borrow().len() + self.finds.borrow().len()
    }

    pub fn handles_opened(&self) -> usize {
        self.opened.get()
    }

    pub fn handles_closed(&self) -> usize {
        self.closed.get()
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }

    fn new_handle(&self) -> RawHandle {
        let h = self.next_handle.get();
        self.next_handle.set(h + 4);
        self.opened.set(self.opened.get() + 1);
        RawHandle(h)
    }

    fn handle_key(&self, handle: RawHandle) -> String {
        self.open
            .borrow()
            .get(&handle.0)
            .cloned()
            .unwrap_or_default()
    }

    fn run_script<'a>(
        &'a self,
        call: &'static str,
        key: &str,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let key = key.to_ascii_lowercase();
        self.record(format!("{call}:{key}"));
        let Some(script) = self.scripts.get(&format!("{call}:{key}")) else {
            return Ok(CallReport::new(NativeStatus::from_win32(ERROR_CALL_NOT_IMPLEMENTED)));
        };
        match (script, buffer) {
            (Script::Status(code), _) => Ok(CallReport::new(NativeStatus::from_win32(*code))),
            (Script::Then { needed, .. }, None) => {
                Ok(CallReport::new(NativeStatus::BufferTooSmall).with_bytes_needed(*needed))
            }
            (Script::Then { needed, then }, Some(_)) => Ok(CallReport::new(
                NativeStatus::from_win32(*then),
            )
            .with_bytes_needed(*needed)),
            (Script::Sized { fill, .. }, None) => {
                let needed = fill(0)?.len();
                Ok(CallReport::new(NativeStatus::BufferTooSmall).with_bytes_needed(needed))
            }
            (Script::Sized { count, fill }, Some(buf)) => {
                let data = fill(buf.address())?;
                let Some(dest) = buf.as_bytes_mut().get_mut(..data.len()) else {
                    return Ok(CallReport::new(NativeStatus::BufferTooSmall)
                        .with_bytes_needed(data.len()));
                };
                dest.copy_from_slice(&data);
                Ok(CallReport::new(NativeStatus::Success).with_returned(*count))
            }
            (Script::Adopted { count, fill }, _) => {
                let len = fill(0)?.len();
                if len == 0 {
                    return Ok(CallReport::new(NativeStatus::Success));
                }
                let mut block = RawBuffer::allocate(&self.callee, len)?;
                let data = fill(block.address())?;
                if data.len() != len {
                    return Err(QueryError::malformed(BUILDER, "填充长度随地址变化"));
                }
                block.as_bytes_mut().copy_from_slice(&data);
                Ok(CallReport::new(NativeStatus::Success)
                    .with_returned(*count)
                    .with_adopted(Some(block)))
            }
        }
    }
}

impl NativeBase for FakeNative {
    fn allocator(&self) -> &dyn NativeAllocator {
        &self.local
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }
}

impl SessionNative for FakeNative {
    fn net_session_enum<'a>(
        &'a self,
        server: Option<&str>,
        level: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let host = host_key(server);
        if self.denied_hosts.contains(&host) {
            self.record(format!("NetSessionEnum:{host}"));
            return Ok(CallReport::new(NativeStatus::from_win32(ERROR_ACCESS_DENIED)));
        }
        self.run_script("NetSessionEnum", &format!("{host}:{level}"), buffer)
    }
}

impl DirectoryNative for FakeNative {
    fn find_first(
        &self,
        pattern: &str,
        _large_fetch: bool,
        data: &mut [u8],
    ) -> Result<Option<RawHandle>, QueryError> {
        let key = directory_key(pattern);
        self.record(format!("FindFirstFileExW:{key}"));
        if self.denied_directories.contains(&key) {
            return Err(QueryError::HandleUnavailable {
                call: "FindFirstFileExW",
                target: pattern.to_string(),
                code: ERROR_ACCESS_DENIED,
            });
        }
        let Some(entries) = self.directories.get(&key) else {
            return Err(QueryError::HandleUnavailable {
                call: "FindFirstFileExW",
                target: pattern.to_string(),
                code: ERROR_PATH_NOT_FOUND,
            });
        };
        let Some(first) = entries.first() else {
            return Ok(None);
        };
        copy_record(&first.record, data)?;
        let handle = self.new_handle();
        self.finds.borrow_mut().insert(
            handle.0,
            FindState {
                entries: entries.clone(),
                next: 1,
            },
        );
        Ok(Some(handle))
    }

    fn find_next(&self, handle: RawHandle, data: &mut [u8]) -> Result<bool, QueryError> {
        self.record(format!("FindNextFileW:{:#x}", handle.0));
        let mut finds = self.finds.borrow_mut();
        let Some(state) = finds.get_mut(&handle.0) else {
            return Err(QueryError::Failure {
                call: "FindNextFileW",
                code: 6,
            });
        };
        let Some(entry) = state.entries.get(state.next) else {
            return Ok(false);
        };
        copy_record(&entry.record, data)?;
        state.next += 1;
        Ok(true)
    }

    fn find_close(&self, handle: RawHandle) {
        self.record(format!("FindClose:{:#x}", handle.0));
        if self.finds.borrow_mut().remove(&handle.0).is_some() {
            self.closed.set(self.closed.get() + 1);
        }
    }
}

fn copy_record(record: &[u8], data: &mut [u8]) -> Result<(), QueryError> {
    if data.len() < find_data_size() || record.len() > data.len() {
        return Err(QueryError::Failure {
            call: "FindFirstFileExW",
            code: ERROR_INSUFFICIENT_BUFFER,
        });
    }
    data.fill(0);
    if let Some(dest) = data.get_mut(..record.len()) {
        dest.copy_from_slice(record);
    }
    Ok(())
}

impl ServiceNative for FakeNative {
    fn open_manager(&self, host: Option<&str>) -> Result<RawHandle, QueryError> {
        let key = host_key(host);
        self.record(format!("OpenSCManagerW:{key}"));
        if self.denied_hosts.contains(&key) {
            return Err(QueryError::HandleUnavailable {
                call: "OpenSCManagerW",
                target: key,
                code: ERROR_ACCESS_DENIED,
            });
        }
        let handle = self.new_handle();
        self.open.borrow_mut().insert(handle.0, key);
        Ok(handle)
    }

    fn open_service(&self, manager: RawHandle, name: &str) -> Result<RawHandle, QueryError> {
        let host = self.handle_key(manager);
        let name = name.to_ascii_lowercase();
        self.record(format!("OpenServiceW:{name}"));
        let known = self
            .services
            .get(&host)
            .is_some_and(|names| names.contains(&name));
        if !known {
            return Err(QueryError::HandleUnavailable {
                call: "OpenServiceW",
                target: name,
                code: ERROR_SERVICE_DOES_NOT_EXIST,
            });
        }
        let handle = self.new_handle();
        self.open.borrow_mut().insert(handle.0, name);
        Ok(handle)
    }

    fn close_service_handle(&self, handle: RawHandle) {
        self.record(format!("CloseServiceHandle:{:#x}", handle.0));
        if self.open.borrow_mut().remove(&handle.0).is_some() {
            self.closed.set(self.closed.get() + 1);
        }
    }

    fn enum_services<'a>(
        &'a self,
        manager: RawHandle,
        service_type: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let host = self.handle_key(manager);
        self.run_script("EnumServicesStatusExW", &format!("{host}:{service_type:#x}"), buffer)
    }

    fn query_config<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let name = self.handle_key(service);
        self.run_script("QueryServiceConfigW", &name, buffer)
    }

    fn query_config2<'a>(
        &'a self,
        service: RawHandle,
        level: u32,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let name = self.handle_key(service);
        self.run_script("QueryServiceConfig2W", &format!("{name}:{level}"), buffer)
    }

    fn query_status<'a>(
        &'a self,
        service: RawHandle,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let name = self.handle_key(service);
        self.run_script("QueryServiceStatusEx", &name, buffer)
    }
}

impl FolderNative for FakeNative {
    fn known_folder_path<'a>(
        &'a self,
        id: &Uuid,
        buffer: Option<&mut RawBuffer<'a>>,
    ) -> Result<CallReport<'a>, QueryError> {
        let key = id.to_string();
        if !self
            .scripts
            .contains_key(&format!("SHGetKnownFolderPath:{}", key.to_ascii_lowercase()))
        {
            self.record(format!("SHGetKnownFolderPath:{}", key.to_ascii_lowercase()));
            return Ok(CallReport::new(NativeStatus::Other(E_FILE_NOT_FOUND)));
        }
        self.run_script("SHGetKnownFolderPath", &key, buffer)
    }
}

/// A `SHGetKnownFolderPath` script returning `path`.
pub fn folder_path_script(path: &str) -> Script {
    let path = path.to_string();
    Script::adopted(1, move |_| {
        let mut b = BufferBuilder::new(PointerWidth::native());
        b.append_wide(&path);
        b.finish(0)
    })
}

#[cfg(test)]
mod tests {
    use super::{BufferBuilder, CountingAllocator, FakeNative, Script};
    use crate::buffer::{NativeAllocator, RawBuffer};
    use crate::layout::{PointerWidth, SESSION_INFO_10};
    use crate::native::{NativeBase, SessionNative};
    use crate::negotiate::NativeStatus;

    #[test]
    fn builder_patches_pointers_for_width() -> Result<(), Box<dyn std::error::Error>> {
        let layout = SESSION_INFO_10.resolve(PointerWidth::W32);
        let mut b = BufferBuilder::new(PointerWidth::W32);
        let rec = b.reserve_records(&layout, 1);
        b.set_string(&layout, rec, "sesi10_username", "x")?;
        let bytes = b.finish(0x1000)?;
        assert_eq!(bytes.len(), 16 + 4);
        assert_eq!(&bytes[4..8], &0x1010u32.to_le_bytes());
        assert!(b.finish(0x1_0000_0000).is_err());
        Ok(())
    }

    #[test]
    fn builder_rejects_wrong_field_kind() {
        let layout = SESSION_INFO_10.resolve(PointerWidth::W64);
        let mut b = BufferBuilder::new(PointerWidth::W64);
        let rec = b.reserve_records(&layout, 1);
        assert!(b.set_u32(&layout, rec, "sesi10_cname", 1).is_err());
        assert!(b.set_u32(&layout, rec, "no_such_field", 1).is_err());
    }

    #[test]
    #[allow(unsafe_code)]
    fn foreign_release_is_counted_not_freed() -> Result<(), Box<dyn std::error::Error>> {
        let a = CountingAllocator::new();
        let b = CountingAllocator::new();
        let ptr = a.allocate(8)?;
        unsafe { b.release(ptr, 8) };
        assert_eq!(b.invalid_releases(), 1);
        assert_eq!(a.outstanding(), 1);
        unsafe { a.release(ptr, 8) };
        assert_eq!(a.releases(), 1);
        Ok(())
    }

    #[test]
    fn adopted_script_uses_callee_allocator() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        fake.script(
            "NetSessionEnum",
            "local:10",
            Script::adopted(0, |_| Ok(vec![0u8; 24])),
        );
        {
            let report = fake.net_session_enum(None, 10, None)?;
            assert_eq!(report.status, NativeStatus::Success);
            let adopted: Option<&RawBuffer<'_>> = report.adopted.as_ref();
            assert_eq!(adopted.map(RawBuffer::len), Some(24));
            assert_eq!(fake.callee().outstanding(), 1);
        }
        assert_eq!(fake.callee().releases(), 1);
        assert_eq!(fake.allocator().name(), "LocalFree");
        Ok(())
    }
}
