//! The object graph of a loaded assembly: a [`Module`] with its types, their methods and
//! the decoded method bodies.
//!
//! A module read from an image keeps that image, so [`writer`] can emit a copy in which
//! only the modified method bodies and the grown `#US` heap differ. Modules built in
//! memory (for tests, or by other tools) carry no image and cannot be written.
//!
//! # Key Components
//!
//! - [`Module`] / [`TypeDef`] / [`MethodDef`] - The object graph
//! - [`ModuleStore`] - Read and write seam used by the patch orchestration
//! - [`PeStore`] - File-backed [`ModuleStore`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpatch::module::Module;
//! use std::path::Path;
//!
//! let module = Module::from_file(Path::new("Assembly-CSharp.dll"))?;
//! for ty in module.types() {
//!     println!("{} ({} methods)", ty.full_name(), ty.methods.len());
//! }
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod loader;
pub mod writer;

use std::{fmt, path::Path};

use crate::{
    file::File,
    metadata::{method::MethodBody, token::Token},
    Result,
};

/// Name and version of the assembly a module belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyIdentity {
    /// Simple assembly name
    pub name: String,
    /// Major, minor, build and revision number
    pub version: (u16, u16, u16, u16),
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, build, revision) = self.version;
        write!(f, "{}, Version={major}.{minor}.{build}.{revision}", self.name)
    }
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// MethodDef token
    pub token: Token,
    /// Simple name
    pub name: String,
    /// Raw `MethodAttributes`
    pub flags: u32,
    /// Raw `MethodImplAttributes`
    pub impl_flags: u32,
    /// RVA of the body in the source image, 0 for methods without one
    pub rva: u32,
    body: Option<MethodBody>,
    modified: bool,
}

impl MethodDef {
    /// Create a method, optionally with a body.
    #[must_use]
    pub fn new(token: Token, name: impl Into<String>, body: Option<MethodBody>) -> Self {
        MethodDef {
            token,
            name: name.into(),
            flags: 0,
            impl_flags: 0,
            rva: 0,
            body,
            modified: false,
        }
    }

    /// Returns the decoded body.
    #[must_use]
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    /// Returns the decoded body for editing and marks the method as modified.
    pub fn body_mut(&mut self) -> Option<&mut MethodBody> {
        if self.body.is_some() {
            self.modified = true;
        }
        self.body.as_mut()
    }

    /// Returns `true` once the body was borrowed mutably.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

/// A type definition.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// TypeDef token
    pub token: Token,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// `true` if the type is nested in another type
    pub is_nested: bool,
    /// Methods in definition order
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Create a top-level type without methods.
    #[must_use]
    pub fn new(token: Token, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            token,
            namespace: namespace.into(),
            name: name.into(),
            is_nested: false,
            methods: Vec::new(),
        }
    }

    /// Returns `Namespace.Name`, or just the name in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A loaded module.
pub struct Module {
    /// Module name from the Module table
    pub name: String,
    /// Identity from the Assembly table, absent for netmodules
    pub assembly: Option<AssemblyIdentity>,
    /// Types in definition order
    pub types: Vec<TypeDef>,
    image: Option<File>,
}

impl Module {
    /// Create an empty in-memory module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            assembly: None,
            types: Vec::new(),
            image: None,
        }
    }

    /// Load the assembly at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its metadata or method bodies are
    /// malformed.
    pub fn from_file(path: &Path) -> Result<Module> {
        loader::load(File::from_file(path)?)
    }

    /// Load an assembly held in memory.
    ///
    /// # Errors
    /// Same conditions as [`Module::from_file`], minus filesystem errors.
    pub fn from_mem(data: Vec<u8>) -> Result<Module> {
        loader::load(File::from_mem(data)?)
    }

    /// Returns the source image, if the module was loaded from one.
    #[must_use]
    pub fn image(&self) -> Option<&File> {
        self.image.as_ref()
    }

    /// Iterate the types.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    /// Iterate all methods whose body was modified.
    pub fn modified_methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter())
            .filter(|method| method.is_modified())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("assembly", &self.assembly)
            .field("types", &self.types.len())
            .field("has_image", &self.image.is_some())
            .finish()
    }
}

/// Reads and writes modules.
pub trait ModuleStore {
    /// Load the module at `path`.
    ///
    /// # Errors
    /// Returns an error if the module cannot be read.
    fn read(&self, path: &Path) -> Result<Module>;

    /// Persist `module` at `path`.
    ///
    /// # Errors
    /// Returns an error if the module cannot be serialised or written.
    fn write(&self, module: &Module, path: &Path) -> Result<()>;
}

/// [`ModuleStore`] over PE files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeStore;

impl ModuleStore for PeStore {
    fn read(&self, path: &Path) -> Result<Module> {
        Module::from_file(path)
    }

    fn write(&self, module: &Module, path: &Path) -> Result<()> {
        let data = writer::write_image(module)?;
        writer::persist(&data, path)
    }
}
