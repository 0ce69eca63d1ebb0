//! Shared fixtures for unit tests.
//!
//! - [`build_image`] / [`build_image_with`] - A crafted .NET image with a `Starter.Awake` method
//! - [`MapResolver`] - A [`TokenResolver`] backed by hash maps
//! - [`MemoryStore`] - A [`ModuleStore`] that keeps modules in memory
//! - [`call`] - A `call` instruction to a named member


pub use image::*;

use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    assembly::{Instruction, MethodRef, OpCode, Operand, TokenResolver},
    metadata::token::Token,
    module::{Module, ModuleStore},
    Error, Result,
};

/// A `call` to `name` through MemberRef 1.
pub fn call(name: &str) -> Instruction {
    Instruction::with_operand(
        OpCode::CALL,
        Operand::Method(MethodRef {
            token: Token(0x0A00_0001),
            name: name.to_string(),
        }),
    )
}

/// Resolves tokens from fixed maps, failing on anything unknown.
#[derive(Default)]
pub struct MapResolver {
    methods: HashMap<Token, String>,
    strings: HashMap<Token, String>,
}

impl MapResolver {
    pub fn add_method(&mut self, token: Token, name: &str) {
        self.methods.insert(token, name.to_string());
    }

    pub fn add_string(&mut self, token: Token, value: &str) {
        self.strings.insert(token, value.to_string());
    }
}

impl TokenResolver for MapResolver {
    fn method_name(&self, token: Token) -> Result<String> {
        self.methods
            .get(&token)
            .cloned()
            .ok_or_else(|| malformed_error!("Unknown method token {}", token))
    }

    fn user_string(&self, token: Token) -> Result<String> {
        self.strings
            .get(&token)
            .cloned()
            .ok_or_else(|| malformed_error!("Unknown string token {}", token))
    }
}

/// Hands out pre-built modules and records where modules were written.
#[derive(Default)]
pub struct MemoryStore {
    modules: RefCell<HashMap<PathBuf, Module>>,
    written: RefCell<Vec<PathBuf>>,
}

impl MemoryStore {
    pub fn with_module(path: impl AsRef<Path>, module: Module) -> Self {
        let store = MemoryStore::default();
        store
            .modules
            .borrow_mut()
            .insert(path.as_ref().to_path_buf(), module);
        store
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.written.borrow().clone()
    }
}

impl ModuleStore for MemoryStore {
    fn read(&self, path: &Path) -> Result<Module> {
        self.modules
            .borrow_mut()
            .remove(path)
            .ok_or_else(|| Error::Error(format!("no module stored at {}", path.display())))
    }

    fn write(&self, _module: &Module, path: &Path) -> Result<()> {
        self.written.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}
