//! # Haste Graph
//!
//! Incremental dependency graph and module resolution for a React Native
//! style JavaScript bundler.
//!
//! Given an entry source file, a platform tag, and a set of project/asset
//! roots, [DependencyGraph::get_dependencies] produces the ordered,
//! deduplicated list of modules reachable from that entry. Modules are
//! discovered by extracting each file's `require(...)` specifiers (through
//! the [TransformCode]/[ExtractRequires] contracts), resolving every
//! specifier against a multi-strategy search order (asset → haste → project
//! path → installed package), and recursing. Filesystem change events
//! invalidate only the affected parts of the graph; the next request reloads
//! exactly those.
//!
//! ## References:
//!
//! * Resolution walks the [CommonJS Module Resolution Algorithm] extended
//!   with haste names, platform-qualified files and asset scales
//! * `browser` field handling follows the [package-browser-field-spec]
//!
//! [CommonJS Module Resolution Algorithm]: https://nodejs.org/api/modules.html#all-together
//! [package-browser-field-spec]: https://github.com/defunctzombie/package-browser-field-spec

mod asset_map;
mod builtins;
mod docblock;
mod error;
mod fastfs;
mod file_system;
mod haste_map;
mod meta_cache;
mod module;
mod module_cache;
mod options;
mod package;
mod path;
mod resolution;
mod resolver;
mod response;
mod transform;

use std::{path::{Path, PathBuf}, rc::Rc, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

pub use crate::{
    asset_map::{AssetData, AssetEntry, AssetMap, asset_data_of},
    builtins::NODE_BUILTINS,
    docblock::Docblock,
    error::{GraphError, IOError, JsonError},
    fastfs::{AppliedChange, ChangeKind, Fastfs},
    file_system::{DirEntry, FileMetadata, FileSystem, FileSystemOs, MemoryFileSystem},
    haste_map::{HasteEntry, HasteMap, HasteTarget},
    meta_cache::{CacheStore, FileStore, MemoryStore, MetaCache},
    module::{Module, ModuleContent, ModuleKind, NULL_MODULE_CODE},
    module_cache::{ModuleCache, ModuleId, PackageId},
    options::{GraphOptions, RedirectValue},
    package::{Package, Redirected},
    resolution::{Resolution, ResolutionCache},
    response::Response,
    transform::{
        ExtractRequires, ExtractedRequires, IdentityTransform, RequireScanner, TransformCode,
        TransformOptions, TransformedCode,
    },
};
use crate::{
    docblock::still_in_docblock,
    path::{GENERIC_PLATFORM, PathUtil, platform_of},
    resolver::ResolutionRequest,
    response::{ResponseState, SharedResponseState},
};

static PACKAGE_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[/\\])package\.json$").unwrap());

/// One `get_dependencies` request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub entry_file: PathBuf,
    pub platform: Option<String>,
    /// When false, only the entry module's own requires are resolved; the
    /// response contains just the entry.
    pub recursive: bool,
    pub transform_options: TransformOptions,
}

impl RequestOptions {
    pub fn new<P: AsRef<Path>>(entry_file: P) -> Self {
        Self {
            entry_file: entry_file.as_ref().to_path_buf(),
            platform: None,
            recursive: true,
            transform_options: TransformOptions::default(),
        }
    }

    #[must_use]
    pub fn with_platform<S: Into<String>>(mut self, platform: S) -> Self {
        self.platform = Some(platform.into());
        self
    }

    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// A synthetic module prepended to bundles.
#[derive(Debug, Clone)]
pub struct PolyfillSpec {
    pub file: PathBuf,
    pub id: String,
    pub dependencies: Vec<String>,
}

/// A change event from the external file watcher.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub root: PathBuf,
    pub rel_path: PathBuf,
    pub metadata: Option<FileMetadata>,
}

/// Request-scoped driver state threaded through traversal and reloads.
struct RequestRun<'a> {
    options: &'a RequestOptions,
    state: SharedResponseState,
    seen: FxHashSet<ModuleId>,
    progress: Option<&'a mut dyn FnMut(ModuleId, usize)>,
    resolved: usize,
}

impl RequestRun<'_> {
    fn report_progress(&mut self, module: ModuleId) {
        self.resolved += 1;
        if let Some(progress) = self.progress.as_mut() {
            progress(module, self.resolved);
        }
    }
}

/// Dependency graph with the current operating system as the file system.
pub type Graph = DependencyGraph<FileSystemOs>;

/// The graph core: virtual filesystem, haste/asset indices, module registry,
/// and the incremental resolution cache, driven from one logical executor.
pub struct DependencyGraph<Fs> {
    options: GraphOptions,
    fastfs: Fastfs<Fs>,
    haste: HasteMap,
    assets: AssetMap,
    modules: ModuleCache,
    resolutions: ResolutionCache,
    transformer: Box<dyn TransformCode>,
    extractor: Box<dyn ExtractRequires>,
    meta_cache: Option<MetaCache>,
    /// Set after a haste collision escaped to a request; the next file
    /// change triggers a full haste rebuild as recovery.
    haste_needs_rebuild: bool,
}

impl<Fs: FileSystem + Default> DependencyGraph<Fs> {
    /// Build a graph with the default transform contracts (identity
    /// transform, regex require-scanner).
    ///
    /// # Errors
    ///
    /// * I/O errors from the root crawl.
    /// * [GraphError::HasteCollision] from the initial haste build.
    pub fn new(options: GraphOptions) -> Result<Self, GraphError> {
        Self::with_file_system(Fs::default(), options)
    }
}

impl<Fs: FileSystem> DependencyGraph<Fs> {
    /// # Errors
    ///
    /// See [DependencyGraph::new].
    pub fn with_file_system(file_system: Fs, options: GraphOptions) -> Result<Self, GraphError> {
        Self::with_contracts(
            file_system,
            options,
            Box::new(IdentityTransform),
            Box::new(RequireScanner),
        )
    }

    /// # Errors
    ///
    /// See [DependencyGraph::new].
    pub fn with_contracts(
        file_system: Fs,
        options: GraphOptions,
        transformer: Box<dyn TransformCode>,
        extractor: Box<dyn ExtractRequires>,
    ) -> Result<Self, GraphError> {
        let options = options.sanitize();
        let mut fastfs = Fastfs::new(file_system, &options);
        fastfs.build(&options)?;
        let mut graph = Self {
            options,
            fastfs,
            haste: HasteMap::default(),
            assets: AssetMap::default(),
            modules: ModuleCache::default(),
            resolutions: ResolutionCache::default(),
            transformer,
            extractor,
            meta_cache: None,
            haste_needs_rebuild: false,
        };
        graph.assets.build(&graph.fastfs, &graph.options);
        graph.build_haste_map()?;
        Ok(graph)
    }

    /// Attach a persistent metadata cache for transform and docblock
    /// results.
    #[must_use]
    pub fn with_meta_cache(mut self, cache: MetaCache) -> Self {
        self.meta_cache = Some(cache);
        self
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.modules.module(id)
    }

    pub fn module_path(&self, id: ModuleId) -> &Path {
        self.modules.module(id).path()
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.resolutions
    }

    /// Whether another known path collides with `path` case-insensitively.
    pub fn has_conflict(&self, path: &Path) -> bool {
        self.modules.has_conflict(path)
    }

    pub fn match_files_by_pattern(&self, pattern: &Regex) -> Vec<PathBuf> {
        self.fastfs.match_files_by_pattern(pattern)
    }

    /// The ordered, deduplicated module list reachable from the request's
    /// entry file.
    ///
    /// # Errors
    ///
    /// * [GraphError::FileNotFound] when the entry does not exist.
    /// * Unresolved specifiers are collected on the response unless the
    ///   `throw_on_unresolved` predicate opts in to failing the request.
    /// * Transform and I/O errors propagate without recovery.
    pub fn get_dependencies(&mut self, request: &RequestOptions) -> Result<Response, GraphError> {
        self.get_dependencies_with_progress(request, None)
    }

    /// Like [DependencyGraph::get_dependencies], reporting each completed
    /// module reload to `on_progress` together with the number of modules
    /// finished so far.
    ///
    /// # Errors
    ///
    /// See [DependencyGraph::get_dependencies].
    pub fn get_dependencies_with_progress<'a>(
        &mut self,
        request: &'a RequestOptions,
        on_progress: Option<&'a mut dyn FnMut(ModuleId, usize)>,
    ) -> Result<Response, GraphError> {
        let span = tracing::debug_span!("get_dependencies", entry = ?request.entry_file);
        let _enter = span.enter();
        if let Some(platform) = request.platform.as_deref() {
            if !self.options.platforms.iter().any(|p| p == platform) {
                tracing::warn!(platform, "platform not in the configured platform set");
            }
        }

        let entry_path = request.entry_file.normalize();
        let entry = self.get_module_for_path(&entry_path)?;
        self.resolutions.pin_entry(entry);

        let state = ResponseState::shared();
        let subscription = self.resolutions.subscribe(Rc::clone(&state));
        let mut run = RequestRun {
            options: request,
            state: Rc::clone(&state),
            seen: FxHashSet::default(),
            progress: on_progress,
            resolved: 0,
        };
        let result = (|| {
            // Flush invalidations queued by file events since the last
            // request, then traverse, then settle whatever the traversal
            // dirtied. This is the `allResolved` barrier of the cooperative
            // model: nothing completes while a reload is pending.
            self.ensure_all_resolved(&mut run)?;
            self.traverse(entry, &mut run)?;
            self.ensure_all_resolved(&mut run)
        })();
        self.resolutions.unsubscribe(subscription);
        result?;

        let main_module_id = self.module_name(entry)?;
        let response = state.borrow_mut().finalize(main_module_id)?;
        if let Some(should_throw) = self.options.throw_on_unresolved {
            if let Some(error) = response.errors().first() {
                if should_throw(&entry_path, request.platform.as_deref()) {
                    return Err(error.clone());
                }
            }
        }
        Ok(response)
    }

    /// The raw specifier strings of the entry's own `require` calls.
    ///
    /// # Errors
    ///
    /// * [GraphError::FileNotFound] when the entry does not exist.
    pub fn get_shallow_dependencies(
        &mut self,
        entry_file: &Path,
        transform_options: &TransformOptions,
    ) -> Result<Vec<String>, GraphError> {
        let entry = self.get_module_for_path(&entry_file.normalize())?;
        self.read_dependencies(entry, transform_options)
    }

    /// The module record for an absolute path, created on first use.
    ///
    /// # Errors
    ///
    /// * [GraphError::FileNotFound] when no such file is indexed.
    pub fn get_module_for_path(&mut self, path: &Path) -> Result<ModuleId, GraphError> {
        let path = path.normalize();
        if !self.fastfs.file_exists(&path) {
            return Err(GraphError::FileNotFound(path));
        }
        if self.options.is_asset_ext(&path) {
            let name = asset_data_of(&path, &self.options)
                .map_or_else(|| path.display().to_string(), |data| data.name);
            return Ok(self.modules.get_asset_module(&path, name));
        }
        Ok(self.modules.get_module(&path))
    }

    pub fn create_polyfill(&mut self, spec: &PolyfillSpec) -> ModuleId {
        self.modules.create_polyfill(&spec.file, spec.id.clone(), spec.dependencies.clone())
    }

    /// Apply one watcher event: mutate the virtual filesystem, invalidate
    /// caches and indices, and mark affected resolutions dirty. The dirty
    /// set is flushed by the next request.
    ///
    /// # Errors
    ///
    /// * [GraphError::HasteCollision] when re-indexing the changed file
    ///   collides; the next event triggers a full haste rebuild.
    pub fn process_file_change(&mut self, event: &WatchEvent) -> Result<(), GraphError> {
        let path = event.root.join(&event.rel_path).normalize();
        let Some(applied) =
            self.fastfs.process_file_change(event.kind, &path, event.metadata.as_ref())
        else {
            return Ok(());
        };
        tracing::debug!(kind = ?applied.kind, path = ?applied.path, "file_change");
        if let Some(cache) = &mut self.meta_cache {
            cache.invalidate(&path);
        }
        // A collision that escaped to a request leaves the index suspect;
        // the event that (presumably) resolves it triggers a full rebuild.
        if self.haste_needs_rebuild {
            self.haste_needs_rebuild = false;
            self.build_haste_map()?;
        }
        let is_manifest = PACKAGE_JSON_RE.is_match(&path.to_string_lossy());

        match applied.kind {
            ChangeKind::Delete => {
                if is_manifest {
                    self.modules.remove_package_at(&path);
                    self.modules.clear_package_mappings();
                }
                self.haste.remove_by_path(&path);
                self.assets.remove_file(&path, &self.options);
                if let Some(id) = self.modules.module_id(&path) {
                    self.resolutions.mark_target_dirty(id);
                    self.resolutions.delete_resolution(id);
                    self.modules.remove_module_at(&path);
                }
                Ok(())
            }
            ChangeKind::Change => {
                if is_manifest {
                    // Reparsed on demand.
                    self.modules.remove_package_at(&path);
                    self.modules.clear_package_mappings();
                }
                if let Some(id) = self.modules.module_id(&path) {
                    self.modules.module_mut(id).invalidate();
                    self.resolutions.mark_dirty(id);
                    self.resolutions.mark_target_dirty(id);
                }
                self.haste.remove_by_path(&path);
                self.reindex_haste_path(&path)
            }
            ChangeKind::Add => {
                if is_manifest {
                    self.modules.clear_package_mappings();
                }
                if self.options.is_asset_ext(&path)
                    && self.options.asset_roots.iter().any(|root| path.starts_with(root))
                {
                    self.assets.index_file(&path, &self.options);
                }
                // Any unresolved slot may now resolve, and a platform
                // variant can shadow an existing resolution.
                self.resolutions.mark_all_dirty();
                self.reindex_haste_path(&path)
            }
        }
    }

    /// Flush the persistent metadata cache, bypassing the write debounce.
    pub fn flush_meta_cache(&mut self) {
        if let Some(cache) = &mut self.meta_cache {
            cache.flush();
        }
    }

    // --- request driving ---

    /// Depth-first traversal from `module`: insert in discovery order,
    /// reload records that have never loaded, recurse through resolved
    /// dependencies.
    fn traverse(&mut self, module: ModuleId, run: &mut RequestRun<'_>) -> Result<(), GraphError> {
        if !run.seen.insert(module) {
            return Ok(());
        }
        run.state.borrow_mut().insert(module);
        let current = self
            .resolutions
            .resolution(module)
            .is_some_and(|r| r.loaded && r.platform == run.options.platform);
        if !current {
            self.reload_requires(module, false, run)?;
        }
        if run.options.recursive {
            let dependencies = self
                .resolutions
                .resolution(module)
                .map(|r| r.resolved_modules().collect::<Vec<_>>())
                .unwrap_or_default();
            for dependency in dependencies {
                self.traverse(dependency, run)?;
            }
        }
        Ok(())
    }

    /// The cache-wide barrier: drain the dirty set with forced,
    /// non-recursive reloads until nothing is pending.
    fn ensure_all_resolved(&mut self, run: &mut RequestRun<'_>) -> Result<(), GraphError> {
        loop {
            let dirty = self.resolutions.take_dirty();
            if dirty.is_empty() {
                break;
            }
            for module in dirty {
                if self.resolutions.contains(module) {
                    self.reload_requires(module, true, run)?;
                }
            }
        }
        debug_assert!(self.resolutions.is_settled());
        Ok(())
    }

    /// Re-extract `module`'s requires and re-resolve its slots, keeping
    /// edge bookkeeping consistent. At most one reload per record runs at a
    /// time; a re-entrant call (dependency cycle) is a no-op.
    fn reload_requires(
        &mut self,
        module: ModuleId,
        force: bool,
        run: &mut RequestRun<'_>,
    ) -> Result<(), GraphError> {
        if !self.resolutions.mark_resolving(module) {
            return Ok(());
        }
        let result = self.reload_requires_inner(module, force, run);
        self.resolutions.mark_resolved(module);
        if result.is_ok() {
            run.report_progress(module);
        }
        result
    }

    fn reload_requires_inner(
        &mut self,
        module: ModuleId,
        force: bool,
        run: &mut RequestRun<'_>,
    ) -> Result<(), GraphError> {
        self.resolutions.ensure(module);
        let requires = self.read_dependencies(module, &run.options.transform_options)?;

        let (old_requires, old_resolved, loaded, old_platform) = {
            let resolution = self.resolutions.resolution(module).expect("ensured above");
            (
                resolution.requires.clone(),
                resolution.resolved.clone(),
                resolution.loaded,
                resolution.platform.clone(),
            )
        };
        let platform = run.options.platform.clone();
        let same_platform = old_platform == platform;
        if !force && loaded && same_platform && old_requires == requires {
            return Ok(());
        }

        let mut resolved: Vec<Option<ModuleId>> = Vec::with_capacity(requires.len());
        for (i, specifier) in requires.iter().enumerate() {
            // Prefix-stable reuse: an unchanged specifier at an unchanged
            // index keeps its settled slot instead of re-resolving.
            if !force
                && same_platform
                && old_requires.get(i) == Some(specifier)
                && old_resolved.get(i).copied().flatten().is_some()
            {
                resolved.push(old_resolved[i]);
                continue;
            }
            let mut resolver = ResolutionRequest {
                fastfs: &mut self.fastfs,
                haste: &self.haste,
                assets: &self.assets,
                modules: &mut self.modules,
                options: &self.options,
                platform: platform.as_deref(),
            };
            match resolver.resolve(module, specifier) {
                Ok(id) => resolved.push(Some(id)),
                Err(error) if error.is_unable_to_resolve() => {
                    // The slot stays empty and is retried on the next file
                    // event; the error is surfaced to the request.
                    run.state.borrow_mut().push_error(error);
                    resolved.push(None);
                }
                Err(error) => return Err(error),
            }
        }

        // Edge bookkeeping: stale targets lose this depender (and become
        // garbage when it was their last), new targets gain it.
        let old_targets =
            old_resolved.iter().copied().flatten().collect::<FxHashSet<_>>();
        let new_targets = resolved.iter().copied().flatten().collect::<FxHashSet<_>>();
        for &target in old_targets.difference(&new_targets) {
            if self.resolutions.remove_depender(target, module) {
                self.resolutions.delete_resolution(target);
            }
        }
        for &target in new_targets.difference(&old_targets) {
            self.resolutions.add_depender(target, module);
        }

        // The garbage cascade above can have collected this very record
        // (cycles whose last outside depender was a stale edge). The reload's
        // effects are discarded in that case, including the edges just added.
        if self.resolutions.contains(module) {
            let resolution = self.resolutions.resolution_mut(module).expect("checked above");
            resolution.requires = requires;
            resolution.resolved = resolved;
            resolution.loaded = true;
            resolution.platform = platform;
        } else {
            for &target in new_targets.difference(&old_targets) {
                if self.resolutions.remove_depender(target, module) {
                    self.resolutions.delete_resolution(target);
                }
            }
        }
        Ok(())
    }

    // --- module reading ---

    /// The specifier strings of `module`'s dependencies, in source order.
    fn read_dependencies(
        &mut self,
        module: ModuleId,
        transform_options: &TransformOptions,
    ) -> Result<Vec<String>, GraphError> {
        Ok(self.read_module(module, transform_options)?.dependencies.clone())
    }

    /// Read a module: docblock id, transformed code, dependency list. Cached
    /// per `(module, transform options)`; source modules additionally go
    /// through the persistent metadata cache.
    pub fn read_module(
        &mut self,
        module: ModuleId,
        transform_options: &TransformOptions,
    ) -> Result<Arc<ModuleContent>, GraphError> {
        let record = self.modules.module(module);
        let path = record.path().to_path_buf();
        match record.kind() {
            ModuleKind::Null => {
                return Ok(Arc::new(ModuleContent {
                    id: None,
                    code: NULL_MODULE_CODE.to_string(),
                    dependencies: vec![],
                }));
            }
            ModuleKind::Asset { name } => {
                return Ok(Arc::new(ModuleContent {
                    id: Some(name.clone()),
                    code: String::new(),
                    dependencies: vec![],
                }));
            }
            ModuleKind::Polyfill { id, dependencies } => {
                let (id, dependencies) = (id.clone(), dependencies.clone());
                let code = self.fastfs.read_file(&path)?.to_string();
                return Ok(Arc::new(ModuleContent { id: Some(id), code, dependencies }));
            }
            ModuleKind::Source(state) => {
                let key = transform_options.cache_key();
                if let Some(content) = state.reads.get(&key) {
                    return Ok(Arc::clone(content));
                }
            }
        }

        let key = transform_options.cache_key();
        let mtime = self.fastfs.fs().metadata(&path).ok().and_then(|m| m.modified());
        if let Some(cache) = &mut self.meta_cache {
            if let Some(stored) = cache.get(&path, "transform", key, mtime) {
                if let Ok(content) = serde_json::from_str::<ModuleContent>(&stored) {
                    let content = Arc::new(content);
                    self.cache_read(module, key, &content);
                    return Ok(content);
                }
            }
        }

        let source = self.fastfs.read_file(&path)?;
        let transformed = self.transformer.transform(&path, &source, transform_options)?;
        let dependencies = match transformed.dependencies {
            Some(dependencies) => dependencies,
            None => self.extractor.extract(&transformed.code).sync,
        };
        let id = self.module_docblock(module)?.provides_module().map(ToString::to_string);
        let content =
            Arc::new(ModuleContent { id, code: transformed.code, dependencies });
        if let Some(cache) = &mut self.meta_cache {
            if let Ok(serialized) = serde_json::to_string(content.as_ref()) {
                cache.set(&path, "transform", key, mtime, serialized);
            }
        }
        self.cache_read(module, key, &content);
        Ok(content)
    }

    fn cache_read(&mut self, module: ModuleId, key: u64, content: &Arc<ModuleContent>) {
        if let ModuleKind::Source(state) = self.modules.module_mut(module).kind_mut() {
            state.reads.insert(key, Arc::clone(content));
        }
    }

    /// The docblock of a source module, read through `read_while` so only
    /// the opening comment is consumed, and cached on the record.
    fn module_docblock(&mut self, module: ModuleId) -> Result<Docblock, GraphError> {
        let record = self.modules.module(module);
        let path = record.path().to_path_buf();
        let ModuleKind::Source(state) = record.kind() else {
            return Ok(Docblock::default());
        };
        if let Some(docblock) = state.docblock.get() {
            return Ok(docblock.clone());
        }

        let mtime = self.fastfs.fs().metadata(&path).ok().and_then(|m| m.modified());
        let prefix = match self
            .meta_cache
            .as_mut()
            .and_then(|cache| cache.get(&path, "docblock", 0, mtime))
        {
            Some(prefix) => prefix,
            None => {
                let prefix = self.fastfs.read_while(&path, still_in_docblock)?;
                if let Some(cache) = &mut self.meta_cache {
                    cache.set(&path, "docblock", 0, mtime, prefix.clone());
                }
                prefix
            }
        };
        let docblock = Docblock::parse(&prefix);
        if let ModuleKind::Source(state) = self.modules.module_mut(module).kind_mut() {
            let _ = state.docblock.set(docblock.clone());
        }
        Ok(docblock)
    }

    /// The module's bundle-facing name: its haste id, else
    /// `package-name/relative-path` when it lives inside a named package,
    /// else its absolute path.
    pub fn module_name(&mut self, module: ModuleId) -> Result<String, GraphError> {
        let record = self.modules.module(module);
        let path = record.path().to_path_buf();
        match record.kind() {
            ModuleKind::Null => return Ok(path.display().to_string()),
            ModuleKind::Asset { name } => return Ok(name.clone()),
            ModuleKind::Polyfill { id, .. } => return Ok(id.clone()),
            ModuleKind::Source(_) => {}
        }
        if let Some(id) = self.module_docblock(module)?.provides_module() {
            return Ok(id.to_string());
        }
        let mut resolver = ResolutionRequest {
            fastfs: &mut self.fastfs,
            haste: &self.haste,
            assets: &self.assets,
            modules: &mut self.modules,
            options: &self.options,
            platform: None,
        };
        if let Some(package) = resolver.package_for_module(module)? {
            let package = self.modules.package(package);
            if let (Some(name), Some(relative)) =
                (package.name(), path.relative_to(package.root()))
            {
                return Ok(format!("{}/{}", name, relative.display()));
            }
        }
        Ok(path.display().to_string())
    }

    // --- haste indexing ---

    fn build_haste_map(&mut self) -> Result<(), GraphError> {
        let span = tracing::debug_span!("haste_build");
        let _enter = span.enter();
        self.haste.clear();
        for file in self.fastfs.find_files_by_exts(&self.options.project_exts) {
            self.reindex_haste_path(&file)?;
        }
        for manifest in self.fastfs.match_files_by_pattern(&PACKAGE_JSON_RE) {
            self.index_haste_package(&manifest)?;
        }
        self.write_haste_snapshot();
        Ok(())
    }

    /// Index one path into the haste map, if it qualifies. Collisions set
    /// the rebuild flag and propagate.
    fn reindex_haste_path(&mut self, path: &Path) -> Result<(), GraphError> {
        let result = if PACKAGE_JSON_RE.is_match(&path.to_string_lossy()) {
            self.index_haste_package(path)
        } else if self.options.is_project_ext(path) {
            self.index_haste_file(path)
        } else {
            Ok(())
        };
        if matches!(result, Err(GraphError::HasteCollision { .. })) {
            self.haste_needs_rebuild = true;
        }
        result
    }

    fn index_haste_file(&mut self, path: &Path) -> Result<(), GraphError> {
        if !self.fastfs.file_exists(path)
            || self.options.is_blacklisted(path)
            || !self.haste_allowed(path)
        {
            return Ok(());
        }
        let module = self.modules.get_module(path);
        let Some(name) = self.module_docblock(module)?.provides_module().map(ToString::to_string)
        else {
            return Ok(());
        };
        let platform = platform_of(path, &self.options.platforms).to_string();
        self.haste.insert(&name, &platform, HasteTarget::Module(module), path)
    }

    fn index_haste_package(&mut self, manifest: &Path) -> Result<(), GraphError> {
        if !self.fastfs.file_exists(manifest)
            || self.options.is_blacklisted(manifest)
            || !self.haste_allowed(manifest)
        {
            return Ok(());
        }
        let json = self.fastfs.read_file(manifest)?;
        let package = match Package::parse(manifest, &json) {
            Ok(package) => package,
            Err(GraphError::Json(error)) => {
                // A broken manifest must not take the index down.
                tracing::debug!(path = ?manifest, error = ?error, "skipping malformed package.json");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        if !package.is_haste() {
            return Ok(());
        }
        let name = package.name().expect("is_haste checked").to_string();
        let id = self.modules.insert_package(package);
        self.haste.insert(&name, GENERIC_PLATFORM, HasteTarget::Package(id), manifest)
    }

    /// Files inside `node_modules` may not declare haste names unless their
    /// package root is itself one of the eager roots.
    fn haste_allowed(&mut self, path: &Path) -> bool {
        if !path.components().any(|c| c.as_os_str() == "node_modules") {
            return true;
        }
        let Some(manifest) = self.fastfs.closest(path, "package.json") else {
            return false;
        };
        let Some(package_root) = manifest.parent() else {
            return false;
        };
        self.options.eager_roots().any(|root| root.as_path() == package_root)
    }

    /// Informational `name → relative path` snapshot, written to the host
    /// filesystem after each full haste build. Never read back.
    fn write_haste_snapshot(&self) {
        let Some(snapshot_path) = &self.options.haste_snapshot_path else {
            return;
        };
        let base = self.options.project_roots.first();
        let mut snapshot = indexmap::IndexMap::new();
        let mut rows = self.haste.iter().collect::<Vec<_>>();
        rows.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (name, _platform, entry) in rows {
            let path = base
                .and_then(|root| entry.path.relative_to(root))
                .unwrap_or(&entry.path);
            snapshot.entry(name.to_string()).or_insert_with(|| path.display().to_string());
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(data) => {
                if let Err(e) = std::fs::write(snapshot_path, data) {
                    tracing::debug!(error = ?e, "haste snapshot write failed");
                }
            }
            Err(e) => tracing::debug!(error = ?e, "haste snapshot serialize failed"),
        }
    }
}
