//! Module records.
//!
//! A module is a file (or a synthetic stand-in) identified by its canonical
//! path. The four kinds are a closed set; behavior differences between them
//! live in pattern matches at the call sites that need them rather than
//! behind dynamic dispatch.

use std::{path::Path, sync::Arc};

use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::docblock::Docblock;

/// Code for disabled or platform-absent dependencies.
pub const NULL_MODULE_CODE: &str = "module.exports = null;";

#[derive(Debug)]
pub struct Module {
    path: Box<Path>,
    kind: ModuleKind,
}

#[derive(Debug)]
pub enum ModuleKind {
    /// Ordinary source file: docblock id, extracted deps, transformed code.
    Source(SourceState),
    /// Binary asset file; no deps, no code body.
    Asset {
        /// Logical name with scale and platform qualifiers stripped,
        /// extension kept (`img@2x.ios.png` → `img.png`).
        name: String,
    },
    /// Placeholder for disabled or platform-absent dependencies.
    Null,
    /// Synthetic module with a caller-supplied id and fixed dep list.
    Polyfill { id: String, dependencies: Vec<String> },
}

#[derive(Debug, Default)]
pub struct SourceState {
    pub(crate) docblock: OnceCell<Docblock>,
    /// Transform results keyed by [crate::TransformOptions::cache_key];
    /// at most one transform per `(module, options)`.
    pub(crate) reads: FxHashMap<u64, Arc<ModuleContent>>,
}

/// The readable face of a module: docblock id, transformed code, and the
/// dependency specifiers in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContent {
    pub id: Option<String>,
    pub code: String,
    pub dependencies: Vec<String>,
}

impl Module {
    pub(crate) fn new_source(path: &Path) -> Self {
        Self { path: path.into(), kind: ModuleKind::Source(SourceState::default()) }
    }

    pub(crate) fn new_asset(path: &Path, name: String) -> Self {
        Self { path: path.into(), kind: ModuleKind::Asset { name } }
    }

    pub(crate) fn new_null(path: &Path) -> Self {
        Self { path: path.into(), kind: ModuleKind::Null }
    }

    pub(crate) fn new_polyfill(path: &Path, id: String, dependencies: Vec<String>) -> Self {
        Self { path: path.into(), kind: ModuleKind::Polyfill { id, dependencies } }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ModuleKind {
        &mut self.kind
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, ModuleKind::Source(_))
    }

    pub fn is_asset(&self) -> bool {
        matches!(self.kind, ModuleKind::Asset { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ModuleKind::Null)
    }

    pub fn is_polyfill(&self) -> bool {
        matches!(self.kind, ModuleKind::Polyfill { .. })
    }

    /// Drop every cached derivation. Called when the underlying file changed.
    pub(crate) fn invalidate(&mut self) {
        if let ModuleKind::Source(state) = &mut self.kind {
            state.docblock = OnceCell::new();
            state.reads.clear();
        }
    }
}
