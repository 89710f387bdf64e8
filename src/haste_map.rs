//! Haste name index.
//!
//! Maps a declared module name (`@providesModule Foo`, or a `package.json`
//! `name`) to concrete files, keyed by platform. The reserved platform keys
//! are `generic` for unqualified files and `native` for `.native.ext` files.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::{
    error::GraphError,
    module_cache::{ModuleId, PackageId},
    path::{GENERIC_PLATFORM, NATIVE_PLATFORM},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasteTarget {
    Module(ModuleId),
    Package(PackageId),
}

#[derive(Debug)]
pub struct HasteEntry {
    pub target: HasteTarget,
    pub path: Box<Path>,
}

#[derive(Debug, Default)]
pub struct HasteMap {
    map: FxHashMap<String, FxHashMap<String, HasteEntry>>,
}

impl HasteMap {
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Register `name` at `platform`.
    ///
    /// Collision rule: when the name already maps to a different path at the
    /// same platform, a module overrides an existing package; any other
    /// combination is a fatal [GraphError::HasteCollision].
    pub fn insert(
        &mut self,
        name: &str,
        platform: &str,
        target: HasteTarget,
        path: &Path,
    ) -> Result<(), GraphError> {
        let platforms = self.map.entry(name.to_string()).or_default();
        if let Some(existing) = platforms.get(platform) {
            if *existing.path != *path {
                match (target, existing.target) {
                    (HasteTarget::Module(_), HasteTarget::Package(_)) => {}
                    _ => {
                        return Err(GraphError::HasteCollision {
                            name: name.to_string(),
                            platform: platform.to_string(),
                            existing: existing.path.to_path_buf(),
                            incoming: path.to_path_buf(),
                        });
                    }
                }
            }
        }
        tracing::trace!(name, platform, path = ?path, "haste_insert");
        platforms.insert(platform.to_string(), HasteEntry { target, path: path.into() });
        Ok(())
    }

    /// Look up `name`: exact platform match, then `native` when preferred,
    /// then `generic`. First hit wins.
    pub fn get(
        &self,
        name: &str,
        platform: Option<&str>,
        prefer_native: bool,
    ) -> Option<&HasteEntry> {
        let platforms = self.map.get(name)?;
        if let Some(platform) = platform {
            if let Some(entry) = platforms.get(platform) {
                return Some(entry);
            }
        }
        if prefer_native {
            if let Some(entry) = platforms.get(NATIVE_PLATFORM) {
                return Some(entry);
            }
        }
        platforms.get(GENERIC_PLATFORM)
    }

    /// Remove every entry pointing at `path`, in one sweep. Returns whether
    /// anything was removed.
    pub fn remove_by_path(&mut self, path: &Path) -> bool {
        let mut removed = false;
        self.map.retain(|_, platforms| {
            platforms.retain(|_, entry| {
                let keep = *entry.path != *path;
                removed |= !keep;
                keep
            });
            !platforms.is_empty()
        });
        removed
    }

    /// All `(name, platform, entry)` rows, for the snapshot file.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &HasteEntry)> {
        self.map.iter().flat_map(|(name, platforms)| {
            platforms
                .iter()
                .map(move |(platform, entry)| (name.as_str(), platform.as_str(), entry))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_cache::ModuleCache;
    use crate::package::Package;

    fn module(cache: &mut ModuleCache, path: &str) -> (ModuleId, Box<Path>) {
        (cache.get_module(Path::new(path)), Path::new(path).into())
    }

    #[test]
    fn platform_preference() {
        let mut cache = ModuleCache::default();
        let mut haste = HasteMap::default();
        let (generic, generic_path) = module(&mut cache, "/r/foo.js");
        let (ios, ios_path) = module(&mut cache, "/r/foo.ios.js");
        let (native, native_path) = module(&mut cache, "/r/foo.native.js");
        haste.insert("Foo", GENERIC_PLATFORM, HasteTarget::Module(generic), &generic_path).unwrap();
        haste.insert("Foo", "ios", HasteTarget::Module(ios), &ios_path).unwrap();
        haste.insert("Foo", NATIVE_PLATFORM, HasteTarget::Module(native), &native_path).unwrap();

        let get = |platform, prefer_native| {
            haste.get("Foo", platform, prefer_native).map(|e| e.target)
        };
        assert_eq!(get(Some("ios"), false), Some(HasteTarget::Module(ios)));
        assert_eq!(get(Some("android"), false), Some(HasteTarget::Module(generic)));
        assert_eq!(get(Some("android"), true), Some(HasteTarget::Module(native)));
        assert_eq!(get(None, false), Some(HasteTarget::Module(generic)));
        assert_eq!(haste.get("Bar", None, false).map(|e| e.target), None);
    }

    #[test]
    fn collision_is_fatal() {
        let mut cache = ModuleCache::default();
        let mut haste = HasteMap::default();
        let (a, a_path) = module(&mut cache, "/r/a.js");
        let (b, b_path) = module(&mut cache, "/r/b.js");
        haste.insert("Foo", GENERIC_PLATFORM, HasteTarget::Module(a), &a_path).unwrap();
        let error =
            haste.insert("Foo", GENERIC_PLATFORM, HasteTarget::Module(b), &b_path).unwrap_err();
        assert!(matches!(error, GraphError::HasteCollision { .. }));
        // Same path re-registers without error.
        haste.insert("Foo", GENERIC_PLATFORM, HasteTarget::Module(a), &a_path).unwrap();
    }

    #[test]
    fn module_overrides_package() {
        let mut cache = ModuleCache::default();
        let mut haste = HasteMap::default();
        let package =
            Package::parse(Path::new("/r/foo/package.json"), r#"{"name": "Foo"}"#).unwrap();
        let package_id = cache.insert_package(package);
        haste
            .insert(
                "Foo",
                GENERIC_PLATFORM,
                HasteTarget::Package(package_id),
                Path::new("/r/foo/package.json"),
            )
            .unwrap();

        let (module_id, module_path) = module(&mut cache, "/r/foo-module.js");
        haste
            .insert("Foo", GENERIC_PLATFORM, HasteTarget::Module(module_id), &module_path)
            .unwrap();
        assert_eq!(
            haste.get("Foo", None, false).map(|e| e.target),
            Some(HasteTarget::Module(module_id))
        );

        // A package never overrides a module.
        let error = haste
            .insert(
                "Foo",
                GENERIC_PLATFORM,
                HasteTarget::Package(package_id),
                Path::new("/r/foo/package.json"),
            )
            .unwrap_err();
        assert!(matches!(error, GraphError::HasteCollision { .. }));
    }

    #[test]
    fn remove_by_path_restores_prior_state() {
        let mut cache = ModuleCache::default();
        let mut haste = HasteMap::default();
        let (a, a_path) = module(&mut cache, "/r/a.ios.js");
        haste.insert("Foo", "ios", HasteTarget::Module(a), &a_path).unwrap();
        assert!(haste.remove_by_path(&a_path));
        assert!(!haste.remove_by_path(&a_path));
        assert!(haste.get("Foo", Some("ios"), false).is_none());
        assert!(haste.is_empty());
    }
}
