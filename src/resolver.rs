//! Per-module specifier resolution.
//!
//! `require(X)` from module at path Y walks a fixed strategy order: redirect
//! → asset → haste → project path → installed package → builtin runtime.
//! Each strategy is attempted only when the previous one failed with
//! [GraphError::UnableToResolve]; every other error propagates immediately.

use std::path::{Path, PathBuf};

use crate::{
    asset_map::{AssetMap, asset_data_of},
    builtins::is_builtin,
    error::GraphError,
    fastfs::Fastfs,
    file_system::FileSystem,
    haste_map::{HasteMap, HasteTarget},
    module_cache::{ModuleCache, ModuleId, PackageId},
    options::{GraphOptions, RedirectValue},
    package::Redirected,
    path::{NATIVE_PLATFORM, PathUtil},
};

/// For avoiding infinite recursion through redirect chains, which would
/// cause stack overflow.
#[derive(Debug, Default, Clone)]
struct ResolveContext {
    depth: u8,
}

impl ResolveContext {
    fn test_for_infinite_recursion(&mut self) -> Result<(), GraphError> {
        self.depth += 1;
        // 64 should be more than enough for detecting infinite recursion.
        if self.depth > 64 {
            return Err(GraphError::Recursion);
        }
        Ok(())
    }
}

/// One resolution pass over the shared graph state. Constructed per request
/// with split borrows of the graph's components.
pub struct ResolutionRequest<'a, Fs> {
    pub fastfs: &'a mut Fastfs<Fs>,
    pub haste: &'a HasteMap,
    pub assets: &'a AssetMap,
    pub modules: &'a mut ModuleCache,
    pub options: &'a GraphOptions,
    pub platform: Option<&'a str>,
}

impl<Fs: FileSystem> ResolutionRequest<'_, Fs> {
    /// Resolve `specifier` required from the module `from`.
    ///
    /// # Errors
    ///
    /// * [GraphError::UnableToResolve] when every strategy failed.
    /// * Anything else (transform, I/O, malformed package) propagates.
    pub fn resolve(&mut self, from: ModuleId, specifier: &str) -> Result<ModuleId, GraphError> {
        let from_path = self.modules.module(from).path().to_path_buf();
        let span = tracing::debug_span!("resolve", from = ?from_path, specifier);
        let _enter = span.enter();
        let result = self.resolve_impl(from, &from_path, specifier, &mut ResolveContext::default());
        match &result {
            Ok(id) => {
                tracing::debug!(specifier, ret = ?self.modules.module(*id).path());
            }
            Err(err) => tracing::debug!(specifier, err = ?err),
        }
        result
    }

    fn resolve_impl(
        &mut self,
        from: ModuleId,
        from_path: &Path,
        specifier: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        ctx.test_for_infinite_recursion()?;

        // 1. Package-level then global redirection. Either can short-circuit
        // to a null module; a substitution is resolved normally.
        let mut target = specifier.to_string();
        if let Some(package) = self.package_for_module(from)? {
            match self.modules.package(package).redirect_require(&target, &self.options.project_exts)? {
                Redirected::Ignored => return Ok(self.modules.get_null_module(specifier)),
                Redirected::Path(path) => target = path.to_string_lossy().into_owned(),
                Redirected::Unchanged => {}
            }
        }
        match self.options.redirect.get(&target) {
            Some(RedirectValue::Ignore) => return Ok(self.modules.get_null_module(specifier)),
            Some(RedirectValue::Path(path)) => {
                target = path.to_string_lossy().into_owned();
            }
            None => {}
        }

        // 2. Asset lookup.
        match self.resolve_asset(from_path, specifier, &target) {
            Err(e) if e.is_unable_to_resolve() => {}
            other => return other,
        }

        let is_bare = !target.starts_with('.') && !Path::new(&target).is_absolute();

        // 3. Haste lookup.
        if is_bare {
            match self.resolve_haste(from_path, specifier, &target, ctx) {
                Err(e) if e.is_unable_to_resolve() => {}
                other => return other,
            }
        }

        // 4. Project-path lookup.
        if !is_bare {
            match self.resolve_project_path(from_path, specifier, &target, ctx) {
                Err(e) if e.is_unable_to_resolve() => {}
                other => return other,
            }
        }

        // 5. Installed-package lookup.
        if is_bare {
            match self.resolve_node_modules(from_path, specifier, &target, ctx) {
                Err(e) if e.is_unable_to_resolve() => {}
                other => return other,
            }

            // 6. Builtin runtime modules resolve to a null module unless an
            // earlier strategy provided a real implementation.
            if is_builtin(&target) {
                return Ok(self.modules.get_null_module(specifier));
            }
        }

        Err(GraphError::unable_to_resolve(
            from_path,
            specifier,
            "it did not match any file, haste name or installed package",
        ))
    }

    fn resolve_asset(
        &mut self,
        from_path: &Path,
        specifier: &str,
        target: &str,
    ) -> Result<ModuleId, GraphError> {
        if let Some(name) = target.strip_prefix("image!") {
            let found = self
                .assets
                .resolve_name(name, self.platform)
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    GraphError::unable_to_resolve(from_path, specifier, "no asset by that name")
                })?;
            return Ok(self.get_asset_module(&found));
        }

        let path = if target.starts_with('.') {
            let from_dir = from_path.parent().unwrap_or_else(|| Path::new("/"));
            from_dir.normalize_with(target)
        } else if Path::new(target).is_absolute() {
            Path::new(target).normalize()
        } else {
            return Err(GraphError::unable_to_resolve(from_path, specifier, "not an asset path"));
        };
        if !self.options.is_asset_ext(&path) {
            return Err(GraphError::unable_to_resolve(from_path, specifier, "not an asset path"));
        }
        let found = AssetMap::resolve_file(self.fastfs, &path, self.platform, self.options)
            .ok_or_else(|| {
                GraphError::unable_to_resolve(from_path, specifier, "no matching asset file")
            })?;
        Ok(self.get_asset_module(&found))
    }

    fn get_asset_module(&mut self, path: &Path) -> ModuleId {
        let name = asset_data_of(path, self.options)
            .map_or_else(|| path.display().to_string(), |data| data.name);
        self.modules.get_asset_module(path, name)
    }

    fn resolve_haste(
        &mut self,
        from_path: &Path,
        specifier: &str,
        target: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        let prefer_native = self.options.prefer_native_platform;
        if let Some(entry) = self.haste.get(target, self.platform, prefer_native) {
            match entry.target {
                HasteTarget::Module(id) => return Ok(id),
                HasteTarget::Package(package) => {
                    let root = self.modules.package(package).root().to_path_buf();
                    return self.load_as_file_or_dir(&root, from_path, specifier, ctx);
                }
            }
        }

        // A specifier like `pkg/sub/file` addresses a path inside the haste
        // package `pkg`.
        if let Some((head, rest)) = split_package_specifier(target) {
            if let Some(entry) = self.haste.get(head, self.platform, prefer_native) {
                if let HasteTarget::Package(package) = entry.target {
                    let path = self.modules.package(package).root().normalize_with(rest);
                    return self.load_as_file_or_dir(&path, from_path, specifier, ctx);
                }
            }
        }

        Err(GraphError::unable_to_resolve(from_path, specifier, "no haste module or package"))
    }

    fn resolve_project_path(
        &mut self,
        from_path: &Path,
        specifier: &str,
        target: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        let path = if target.starts_with('.') {
            let from_dir = from_path.parent().unwrap_or_else(|| Path::new("/"));
            from_dir.normalize_with(target)
        } else {
            Path::new(target).normalize()
        };
        self.load_as_file_or_dir(&path, from_path, specifier, ctx)
    }

    fn resolve_node_modules(
        &mut self,
        from_path: &Path,
        specifier: &str,
        target: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        let mut dir = from_path.parent();
        while let Some(d) = dir {
            // Already-nested `node_modules` directories are not search bases.
            let is_node_modules =
                d.file_name().is_some_and(|name| name.to_string_lossy().ends_with("node_modules"));
            if !is_node_modules {
                let candidate = d.join("node_modules").normalize_with(target);
                match self.load_as_file_or_dir(&candidate, from_path, specifier, ctx) {
                    Err(e) if e.is_unable_to_resolve() => {}
                    other => return other,
                }
            }
            dir = d.parent();
        }

        let (head, rest) = split_package_specifier(target).unwrap_or((target, ""));
        if let Some(base) = self.options.extra_node_modules.get(head) {
            let candidate = if rest.is_empty() { base.clone() } else { base.normalize_with(rest) };
            match self.load_as_file_or_dir(&candidate, from_path, specifier, ctx) {
                Err(e) if e.is_unable_to_resolve() => {}
                other => return other,
            }
        }

        Err(GraphError::unable_to_resolve(from_path, specifier, "not an installed package"))
    }

    fn load_as_file_or_dir(
        &mut self,
        path: &Path,
        from_path: &Path,
        specifier: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        match self.load_as_file(path, from_path, specifier, ctx) {
            Err(e) if e.is_unable_to_resolve() => {}
            other => return other,
        }
        self.load_as_dir(path, from_path, specifier, ctx)
    }

    /// Try `path` as a file via target-package redirection and the
    /// extension/platform fallback.
    fn load_as_file(
        &mut self,
        path: &Path,
        from_path: &Path,
        specifier: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        ctx.test_for_infinite_recursion()?;

        // The target package's own `browser`/`react-native` table redirects
        // files inside it, no matter where the request came from.
        if let Some(package) = self.owning_package(path)? {
            let request = path.to_string_lossy();
            match self
                .modules
                .package(package)
                .redirect_require(&request, &self.options.project_exts)?
            {
                Redirected::Ignored => return Ok(self.modules.get_null_module(specifier)),
                Redirected::Path(redirected) if redirected != path => {
                    return self.load_as_file(&redirected, from_path, specifier, ctx);
                }
                _ => {}
            }
        }

        for candidate in self.file_candidates(path) {
            if self.fastfs.file_exists(&candidate) {
                return Ok(self.modules.get_module(&candidate));
            }
        }
        Err(GraphError::unable_to_resolve(from_path, specifier, "no file by that name"))
    }

    /// Extension & platform fallback: a specifier carrying an extension is
    /// used as-is; otherwise, for each project extension in order, try the
    /// platform-qualified name, the `native` name when preferred, then the
    /// plain name.
    fn file_candidates(&self, path: &Path) -> Vec<PathBuf> {
        if path.extension().is_some() {
            return vec![path.to_path_buf()];
        }
        let mut candidates = vec![];
        let base = path.to_string_lossy();
        for ext in &self.options.project_exts {
            if let Some(platform) = self.platform {
                candidates.push(PathBuf::from(format!("{base}.{platform}.{ext}")));
            }
            if self.options.prefer_native_platform {
                candidates.push(PathBuf::from(format!("{base}.{NATIVE_PLATFORM}.{ext}")));
            }
            candidates.push(PathBuf::from(format!("{base}.{ext}")));
        }
        candidates
    }

    /// Requires the directory to exist; loads `package.json → main`, or
    /// `index` when there is no `package.json`.
    fn load_as_dir(
        &mut self,
        path: &Path,
        from_path: &Path,
        specifier: &str,
        ctx: &mut ResolveContext,
    ) -> Result<ModuleId, GraphError> {
        if !self.fastfs.dir_exists(path) {
            return Err(GraphError::unable_to_resolve(from_path, specifier, "no such directory"));
        }
        let manifest = path.join("package.json");
        if self.fastfs.file_exists(&manifest) {
            let package = self.get_or_parse_package(&manifest)?;
            let default_ext =
                self.options.project_exts.first().map_or("js", String::as_str);
            let main = self.modules.package(package).main(default_ext).to_path_buf();
            return self.load_as_file(&main, from_path, specifier, ctx);
        }
        self.load_as_file(&path.join("index"), from_path, specifier, ctx)
    }

    /// Closest `package.json` above `path`, parsed and cached.
    fn owning_package(&mut self, path: &Path) -> Result<Option<PackageId>, GraphError> {
        let Some(manifest) = self.fastfs.closest(path, "package.json") else {
            return Ok(None);
        };
        self.get_or_parse_package(&manifest).map(Some)
    }

    /// Closest `package.json` above the module, memoized per module.
    pub fn package_for_module(&mut self, id: ModuleId) -> Result<Option<PackageId>, GraphError> {
        if let Some(cached) = self.modules.cached_package_for_module(id) {
            return Ok(cached);
        }
        let path = self.modules.module(id).path().to_path_buf();
        let package = self.owning_package(&path)?;
        self.modules.memoize_package_for_module(id, package);
        Ok(package)
    }

    fn get_or_parse_package(&mut self, manifest: &Path) -> Result<PackageId, GraphError> {
        if let Some(id) = self.modules.package_id(manifest) {
            return Ok(id);
        }
        let json = self.fastfs.read_file(manifest)?;
        let package = crate::package::Package::parse(manifest, &json)?;
        Ok(self.modules.insert_package(package))
    }
}

/// Split `pkg/sub/path` into `("pkg", "sub/path")`; scoped names keep both
/// leading segments. Returns `None` when there is no remainder.
fn split_package_specifier(specifier: &str) -> Option<(&str, &str)> {
    let boundary = if specifier.starts_with('@') {
        let first = specifier.find('/')?;
        specifier[first + 1..].find('/').map(|i| first + 1 + i)?
    } else {
        specifier.find('/')?
    };
    Some((&specifier[..boundary], &specifier[boundary + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_specifiers() {
        assert_eq!(split_package_specifier("pkg/a"), Some(("pkg", "a")));
        assert_eq!(split_package_specifier("pkg/a/b"), Some(("pkg", "a/b")));
        assert_eq!(split_package_specifier("pkg"), None);
        assert_eq!(split_package_specifier("@scope/pkg/a"), Some(("@scope/pkg", "a")));
        assert_eq!(split_package_specifier("@scope/pkg"), None);
    }
}
