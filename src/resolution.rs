//! Resolution records and the incremental resolution cache.
//!
//! One [Resolution] per source module: the ordered specifier list extracted
//! from its source and a parallel array of resolved module handles (`None`
//! while dirty or unresolvable). The cache owns the records exclusively and
//! tracks the inverse edges, the set of records currently reloading, and the
//! set needing reload. Everything runs on the single executor; the
//! `allResolved` barrier of the cooperative model is rendered as a drain
//! loop over the dirty set (see `DependencyGraph::ensure_all_resolved`).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    module_cache::ModuleId,
    response::SharedResponseState,
};

/// Per-module resolution state.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Specifier strings extracted from the module's source, in source order.
    pub requires: Vec<String>,
    /// Parallel to `requires`; `None` while dirty, in flight, or
    /// unresolvable.
    pub resolved: Vec<Option<ModuleId>>,
    /// Whether the record has completed at least one reload.
    pub loaded: bool,
    /// The platform tag the slots were resolved for. A request with a
    /// different platform re-resolves them.
    pub platform: Option<String>,
}

impl Resolution {
    /// Resolved dependency handles, in require order, skipping unresolved
    /// slots.
    pub fn resolved_modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.resolved.iter().filter_map(|slot| *slot)
    }
}

struct Listener {
    id: u64,
    sink: SharedResponseState,
}

#[derive(Default)]
pub struct ResolutionCache {
    resolutions: FxHashMap<ModuleId, Resolution>,
    /// Inverse of `Resolution::resolved`: which modules require the key.
    dependers: FxHashMap<ModuleId, FxHashSet<ModuleId>>,
    /// Records currently inside a reload; at most one per record.
    resolving: FxHashSet<ModuleId>,
    /// Records that need a forced reload before the next request completes.
    dirty: FxHashSet<ModuleId>,
    /// Request entry modules are never garbage collected.
    entries: FxHashSet<ModuleId>,
    listeners: Vec<Listener>,
    next_listener: u64,
}

impl ResolutionCache {
    pub fn contains(&self, module: ModuleId) -> bool {
        self.resolutions.contains_key(&module)
    }

    pub fn resolution(&self, module: ModuleId) -> Option<&Resolution> {
        self.resolutions.get(&module)
    }

    pub(crate) fn resolution_mut(&mut self, module: ModuleId) -> Option<&mut Resolution> {
        self.resolutions.get_mut(&module)
    }

    /// Create the record for `module` if absent, firing `did_create`.
    pub fn ensure(&mut self, module: ModuleId) {
        if self.resolutions.contains_key(&module) {
            return;
        }
        self.resolutions.insert(module, Resolution::default());
        tracing::trace!(module = ?module, "resolution_created");
        for listener in &self.listeners {
            listener.sink.borrow_mut().insert(module);
        }
    }

    /// Delete the record for `module`, removing its forward edges and firing
    /// `did_delete`. Dependency targets left without dependers are garbage
    /// and are deleted transitively.
    pub fn delete_resolution(&mut self, module: ModuleId) {
        let mut worklist = vec![module];
        while let Some(module) = worklist.pop() {
            let Some(resolution) = self.resolutions.remove(&module) else {
                continue;
            };
            self.resolving.remove(&module);
            self.dirty.remove(&module);
            tracing::trace!(module = ?module, "resolution_deleted");
            for listener in &self.listeners {
                listener.sink.borrow_mut().remove(module);
            }
            for target in resolution.resolved_modules() {
                if self.remove_depender(target, module) {
                    worklist.push(target);
                }
            }
        }
    }

    /// Record the forward edge `by → target`.
    pub fn add_depender(&mut self, target: ModuleId, by: ModuleId) {
        self.dependers.entry(target).or_default().insert(by);
    }

    /// Remove the edge `by → target`. Returns true when `target` became
    /// garbage: no dependers left and not a request entry.
    pub fn remove_depender(&mut self, target: ModuleId, by: ModuleId) -> bool {
        let Some(dependers) = self.dependers.get_mut(&target) else {
            return false;
        };
        dependers.remove(&by);
        if dependers.is_empty() {
            self.dependers.remove(&target);
            return !self.entries.contains(&target);
        }
        false
    }

    pub fn dependers_of(&self, target: ModuleId) -> Option<&FxHashSet<ModuleId>> {
        self.dependers.get(&target)
    }

    /// Pin a request entry so invariant "no dependers and not an entry"
    /// never collects it.
    pub fn pin_entry(&mut self, module: ModuleId) {
        self.entries.insert(module);
    }

    /// Enter a reload. False when a reload for `module` is already running;
    /// the caller must not start a second one.
    pub fn mark_resolving(&mut self, module: ModuleId) -> bool {
        self.resolving.insert(module)
    }

    pub fn mark_resolved(&mut self, module: ModuleId) {
        self.resolving.remove(&module);
    }

    pub fn is_settled(&self) -> bool {
        self.resolving.is_empty() && self.dirty.is_empty()
    }

    /// Queue `module` for a forced reload.
    pub fn mark_dirty(&mut self, module: ModuleId) {
        if self.resolutions.contains_key(&module) {
            self.dirty.insert(module);
        }
    }

    /// A previously-resolved file changed or disappeared: queue every record
    /// holding an edge to it. The stale slot values stay in place until the
    /// forced reload rewrites them, so its edge bookkeeping still sees which
    /// targets to disconnect.
    pub fn mark_target_dirty(&mut self, target: ModuleId) {
        let Some(dependers) = self.dependers.get(&target) else {
            return;
        };
        for depender in dependers.iter().copied().collect::<Vec<_>>() {
            if self.resolutions.contains_key(&depender) {
                self.dirty.insert(depender);
            }
        }
    }

    /// Queue every record. Used when a file appears: any specifier might now
    /// resolve differently (a platform variant can shadow an existing file).
    pub fn mark_all_dirty(&mut self) {
        self.dirty.extend(self.resolutions.keys().copied());
    }

    /// Drain the dirty set, sorted for deterministic reload order.
    pub fn take_dirty(&mut self) -> Vec<ModuleId> {
        let mut drained = self.dirty.drain().collect::<Vec<_>>();
        drained.sort_unstable();
        drained
    }

    pub(crate) fn subscribe(&mut self, sink: SharedResponseState) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push(Listener { id, sink });
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: u64) {
        self.listeners.retain(|listener| listener.id != id);
    }
}
