//! Deduplicating registry of module and package records.
//!
//! The cache is the ownership root of the graph: every other container holds
//! [ModuleId]/[PackageId] handles into its slabs, which gives the cyclic
//! dependency graph well-defined lifetimes. Identity is canonical-path
//! equality; two records for the same path never coexist.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::{module::Module, package::Package};

/// Handle into the module slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

/// Handle into the package slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(u32);

#[derive(Debug)]
struct FoldEntry {
    path: Box<Path>,
    conflict: bool,
}

#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: Vec<Option<Module>>,
    free_modules: Vec<u32>,
    by_path: FxHashMap<Box<Path>, ModuleId>,

    packages: Vec<Option<Package>>,
    free_packages: Vec<u32>,
    packages_by_path: FxHashMap<Box<Path>, PackageId>,

    /// Module → owning package, resolved through `Fastfs::closest` by the
    /// graph and memoized here. `None` records a confirmed "no package".
    package_for_module: FxHashMap<ModuleId, Option<PackageId>>,

    /// Lower-cased path → first registered spelling. Detects identities that
    /// collide on case-insensitive filesystems.
    fold_table: FxHashMap<String, FoldEntry>,
}

impl ModuleCache {
    pub fn module(&self, id: ModuleId) -> &Module {
        self.modules[id.0 as usize].as_ref().expect("stale ModuleId")
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        self.modules[id.0 as usize].as_mut().expect("stale ModuleId")
    }

    pub fn module_id(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    pub fn package(&self, id: PackageId) -> &Package {
        self.packages[id.0 as usize].as_ref().expect("stale PackageId")
    }

    pub fn package_id(&self, path: &Path) -> Option<PackageId> {
        self.packages_by_path.get(path).copied()
    }

    /// Get or create the source module record for `path`.
    pub fn get_module(&mut self, path: &Path) -> ModuleId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        self.insert_module(Module::new_source(path))
    }

    /// Get or create the asset module record for `path`.
    pub fn get_asset_module(&mut self, path: &Path, name: String) -> ModuleId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        self.insert_module(Module::new_asset(path, name))
    }

    /// Get or create the null module for a disabled specifier. The record's
    /// path is the original specifier.
    pub fn get_null_module(&mut self, specifier: &str) -> ModuleId {
        let path = Path::new(specifier);
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        self.insert_module(Module::new_null(path))
    }

    pub fn create_polyfill(
        &mut self,
        path: &Path,
        id: String,
        dependencies: Vec<String>,
    ) -> ModuleId {
        if let Some(&existing) = self.by_path.get(path) {
            return existing;
        }
        self.insert_module(Module::new_polyfill(path, id, dependencies))
    }

    fn insert_module(&mut self, module: Module) -> ModuleId {
        let path: Box<Path> = module.path().into();
        let id = if let Some(slot) = self.free_modules.pop() {
            self.modules[slot as usize] = Some(module);
            ModuleId(slot)
        } else {
            self.modules.push(Some(module));
            ModuleId(u32::try_from(self.modules.len() - 1).unwrap())
        };
        self.record_fold(&path);
        self.by_path.insert(path, id);
        id
    }

    pub fn insert_package(&mut self, package: Package) -> PackageId {
        if let Some(&id) = self.packages_by_path.get(package.path()) {
            return id;
        }
        let path: Box<Path> = package.path().into();
        let id = if let Some(slot) = self.free_packages.pop() {
            self.packages[slot as usize] = Some(package);
            PackageId(slot)
        } else {
            self.packages.push(Some(package));
            PackageId(u32::try_from(self.packages.len() - 1).unwrap())
        };
        self.record_fold(&path);
        self.packages_by_path.insert(path, id);
        id
    }

    pub(crate) fn cached_package_for_module(&self, id: ModuleId) -> Option<Option<PackageId>> {
        self.package_for_module.get(&id).copied()
    }

    pub(crate) fn memoize_package_for_module(&mut self, id: ModuleId, package: Option<PackageId>) {
        self.package_for_module.insert(id, package);
    }

    /// Drop every memoized module → package mapping. Called when a
    /// `package.json` appears or disappears, which can change any module's
    /// closest ancestor manifest.
    pub(crate) fn clear_package_mappings(&mut self) {
        self.package_for_module.clear();
    }

    fn record_fold(&mut self, path: &Path) {
        let Some(lower) = path.to_str().map(str::to_lowercase) else {
            return;
        };
        if let Some(entry) = self.fold_table.get_mut(&lower) {
            if *entry.path != *path {
                entry.conflict = true;
            }
        } else {
            self.fold_table.insert(lower, FoldEntry { path: path.into(), conflict: false });
        }
    }

    /// Whether another registered path maps to the same case-insensitive
    /// identifier as `path`.
    pub fn has_conflict(&self, path: &Path) -> bool {
        path.to_str()
            .map(str::to_lowercase)
            .and_then(|lower| self.fold_table.get(&lower))
            .is_some_and(|entry| entry.conflict)
    }

    /// Evict the module record at `path`. Returns the freed handle.
    pub fn remove_module_at(&mut self, path: &Path) -> Option<ModuleId> {
        let id = self.by_path.remove(path)?;
        self.modules[id.0 as usize] = None;
        self.free_modules.push(id.0);
        self.package_for_module.remove(&id);
        Some(id)
    }

    /// Evict the package record at `path` (a `package.json` path).
    pub fn remove_package_at(&mut self, path: &Path) -> Option<PackageId> {
        let id = self.packages_by_path.remove(path)?;
        self.packages[id.0 as usize] = None;
        self.free_packages.push(id.0);
        self.package_for_module.retain(|_, package| *package != Some(id));
        Some(id)
    }
}
