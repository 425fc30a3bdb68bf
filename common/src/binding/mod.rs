//! Runtime resolution of `(library, symbol)` pairs into callable addresses.

pub mod table;

use std::collections::HashMap;
use std::ffi::c_void;

use crate::error::BindingError;

pub use table::{BINDINGS, BindingSpec, Family};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Void,
    U32,
    I32,
    Usize,
    /// Win32 `BOOL`.
    Bool,
    HResult,
    Handle,
    /// Untyped caller- or callee-owned memory.
    Pointer,
    WideString,
    /// Pointer to a named native struct.
    Struct(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub direction: Direction,
    pub ty: ValueType,
}

impl Param {
    pub const fn new(name: &'static str, direction: Direction, ty: ValueType) -> Self {
        Self {
            name,
            direction,
            ty,
        }
    }
}

/// Marshaling shape of an entry point.
#[derive(Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [Param],
    pub ret: ValueType,
}

impl Signature {
    /// Same arity, directions, parameter types and return type. Parameter
    /// names are documentation only.
    pub fn compatible(&self, other: &Signature) -> bool {
        self.ret == other.ret
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.direction == b.direction && a.ty == b.ty)
    }
}

/// A resolved entry point. Immutable once produced by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDescriptor {
    pub library: String,
    pub symbol: String,
    pub signature: &'static Signature,
    address: usize,
}

impl BindingDescriptor {
    pub fn address(&self) -> usize {
        self.address
    }

    /// Reinterprets the address as the function pointer type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "system"` function pointer whose parameters and
    /// return value match `self.signature`, and the library that exported the
    /// symbol must stay loaded for as long as the result is called.
    #[allow(unsafe_code)]
    #[allow(clippy::missing_errors_doc)]
    pub unsafe fn cast<F: Copy>(&self) -> Result<F, BindingError> {
        if std::mem::size_of::<F>() != std::mem::size_of::<usize>() {
            return Err(BindingError::SignatureMismatch {
                library: self.library.clone(),
                symbol: self.symbol.clone(),
            });
        }
        // SAFETY: sizes are equal and the caller guarantees `F` is the matching
        // function pointer type.
        Ok(unsafe { std::mem::transmute_copy::<usize, F>(&self.address) })
    }
}

/// Locates libraries and their exports.
pub trait LibraryLoader {
    type Library;

    fn open(&mut self, name: &str) -> Result<Self::Library, String>;

    /// Address of `symbol` in `library`; zero means absent.
    fn symbol(&self, library: &Self::Library, symbol: &str) -> Result<usize, String>;
}

/// Loader backed by the platform dynamic linker.
#[derive(Debug, Default)]
pub struct DynamicLoader;

#[allow(unsafe_code)]
impl LibraryLoader for DynamicLoader {
    type Library = libloading::Library;

    fn open(&mut self, name: &str) -> Result<Self::Library, String> {
        // SAFETY: only system libraries without initialisation side effects
        // are listed in the binding table.
        unsafe { libloading::Library::new(name) }.map_err(|e| e.to_string())
    }

    fn symbol(&self, library: &Self::Library, symbol: &str) -> Result<usize, String> {
        // SAFETY: the address is read, not called, here.
        let sym = unsafe { library.get::<*const c_void>(symbol.as_bytes()) }
            .map_err(|e| e.to_string())?;
        Ok(*sym as usize)
    }
}

/// Process-lifetime cache of opened libraries and resolved entry points.
pub struct BindingRegistry<L: LibraryLoader = DynamicLoader> {
    loader: L,
    libraries: HashMap<String, L::Library>,
    bindings: HashMap<(String, String), BindingDescriptor>,
    library_opens: usize,
}

impl BindingRegistry<DynamicLoader> {
    pub fn new() -> Self {
        Self::with_loader(DynamicLoader)
    }
}

impl Default for BindingRegistry<DynamicLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LibraryLoader> BindingRegistry<L> {
    pub fn with_loader(loader: L) -> Self {
        Self {
            loader,
            libraries: HashMap::new(),
            bindings: HashMap::new(),
            library_opens: 0,
        }
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn resolve(
        &mut self,
        library: &str,
        symbol: &str,
        signature: &'static Signature,
    ) -> Result<BindingDescriptor, BindingError> {
        let lib_key = library.to_ascii_lowercase();
        let key = (lib_key.clone(), symbol.to_string());
        if let Some(existing) = self.bindings.get(&key) {
            if !existing.signature.compatible(signature) {
                return Err(BindingError::SignatureMismatch {
                    library: library.to_string(),
                    symbol: symbol.to_string(),
                });
            }
            return Ok(existing.clone());
        }

        let unresolved = |reason: String| BindingError::UnresolvedSymbol {
            library: library.to_string(),
            symbol: symbol.to_string(),
            reason,
        };

        if !self.libraries.contains_key(&lib_key) {
            let handle = self.loader.open(library).map_err(unresolved)?;
            self.library_opens += 1;
            tracing::debug!(library, "opened native library");
            self.libraries.insert(lib_key.clone(), handle);
        }
        let handle = self
            .libraries
            .get(&lib_key)
            .ok_or_else(|| unresolved("库句柄缺失".to_string()))?;
        let address = self.loader.symbol(handle, symbol).map_err(unresolved)?;
        if address == 0 {
            return Err(unresolved("导出地址为空".to_string()));
        }

        let descriptor = BindingDescriptor {
            library: library.to_string(),
            symbol: symbol.to_string(),
            signature,
            address,
        };
        tracing::debug!(
            library,
            symbol,
            address = format_args!("{address:#x}"),
            "resolved entry point"
        );
        self.bindings.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn resolve_spec(&mut self, spec: &BindingSpec) -> Result<BindingDescriptor, BindingError> {
        self.resolve(spec.library, spec.symbol, spec.signature)
    }

    /// Resolves every entry of `family`, stopping at the first failure.
    #[allow(clippy::missing_errors_doc)]
    pub fn resolve_family(
        &mut self,
        family: Family,
    ) -> Result<Vec<BindingDescriptor>, BindingError> {
        table::family(family).map(|spec| self.resolve_spec(spec)).collect()
    }

    pub fn library_opens(&self) -> usize {
        self.library_opens
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
