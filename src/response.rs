//! Per-request response.
//!
//! A response accumulates the modules discovered by one `get_dependencies`
//! request, in depth-first discovery order with duplicates suppressed. While
//! the request is live its state is also fed by the resolution cache's
//! create/delete events, so graph mutations that land mid-request are
//! reflected. Finalization is single-shot; a finalized response is read-only.

use std::{cell::RefCell, rc::Rc};

use rustc_hash::FxHashSet;

use crate::{error::GraphError, module_cache::ModuleId};

/// Mutable request-scoped state, shared between the request driver and the
/// resolution cache's listener list.
#[derive(Debug, Default)]
pub(crate) struct ResponseState {
    dependencies: Vec<ModuleId>,
    seen: FxHashSet<ModuleId>,
    main_module: Option<ModuleId>,
    errors: Vec<GraphError>,
    finalized: bool,
}

pub(crate) type SharedResponseState = Rc<RefCell<ResponseState>>;

impl ResponseState {
    pub fn shared() -> SharedResponseState {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Append a module in discovery order. The first insertion fixes the
    /// main module; duplicates are suppressed (first occurrence wins).
    pub fn insert(&mut self, module: ModuleId) {
        debug_assert!(!self.finalized, "insert into finalized response");
        if self.finalized || !self.seen.insert(module) {
            return;
        }
        if self.main_module.is_none() {
            self.main_module = Some(module);
        }
        self.dependencies.push(module);
    }

    /// Drop a deleted module. The main module stays stable.
    pub fn remove(&mut self, module: ModuleId) {
        debug_assert!(!self.finalized, "remove from finalized response");
        if self.finalized || !self.seen.remove(&module) {
            return;
        }
        self.dependencies.retain(|&m| m != module);
    }

    pub fn push_error(&mut self, error: GraphError) {
        self.errors.push(error);
    }

    pub fn main_module(&self) -> Option<ModuleId> {
        self.main_module
    }

    /// Freeze the state into a [Response].
    ///
    /// # Errors
    ///
    /// * [GraphError::ResponseFinalized] when already finalized.
    /// * [GraphError::NoDependencies] when nothing was discovered.
    pub fn finalize(&mut self, main_module_id: String) -> Result<Response, GraphError> {
        if self.finalized {
            return Err(GraphError::ResponseFinalized);
        }
        let main_module = self.main_module.ok_or(GraphError::NoDependencies)?;
        self.finalized = true;
        Ok(Response {
            dependencies: std::mem::take(&mut self.dependencies),
            main_module,
            main_module_id,
            errors: std::mem::take(&mut self.errors),
            num_prepended: 0,
        })
    }
}

/// The finalized, read-only result of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    dependencies: Vec<ModuleId>,
    main_module: ModuleId,
    main_module_id: String,
    errors: Vec<GraphError>,
    num_prepended: usize,
}

impl Response {
    /// Reachable modules in depth-first discovery order, each exactly once.
    pub fn dependencies(&self) -> &[ModuleId] {
        &self.dependencies
    }

    pub fn main_module(&self) -> ModuleId {
        self.main_module
    }

    /// The haste name (or path) of the entry module.
    pub fn main_module_id(&self) -> &str {
        &self.main_module_id
    }

    /// Unresolved-specifier errors surfaced during the request.
    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    /// How many modules were prepended by [Response::copy_with_prepended].
    pub fn num_prepended(&self) -> usize {
        self.num_prepended
    }

    /// A view with `prepended` (typically polyfills) injected ahead of the
    /// real modules.
    #[must_use]
    pub fn copy_with_prepended(&self, prepended: Vec<ModuleId>) -> Self {
        let num_prepended = prepended.len();
        let mut dependencies = prepended;
        dependencies.extend(self.dependencies.iter().copied());
        Self {
            dependencies,
            main_module: self.main_module,
            main_module_id: self.main_module_id.clone(),
            errors: self.errors.clone(),
            num_prepended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_cache::ModuleCache;
    use std::path::Path;

    fn modules(n: usize) -> Vec<ModuleId> {
        let mut cache = ModuleCache::default();
        (0..n).map(|i| cache.get_module(Path::new(&format!("/r/m{i}.js")))).collect()
    }

    #[test]
    fn discovery_order_with_dedup() {
        let ids = modules(3);
        let mut state = ResponseState::default();
        state.insert(ids[0]);
        state.insert(ids[1]);
        state.insert(ids[0]);
        state.insert(ids[2]);
        assert_eq!(state.main_module(), Some(ids[0]));

        let response = state.finalize("m0".to_string()).unwrap();
        assert_eq!(response.dependencies(), &[ids[0], ids[1], ids[2]]);
        assert_eq!(response.main_module_id(), "m0");
    }

    #[test]
    fn remove_keeps_main_stable() {
        let ids = modules(2);
        let mut state = ResponseState::default();
        state.insert(ids[0]);
        state.insert(ids[1]);
        state.remove(ids[0]);
        assert_eq!(state.main_module(), Some(ids[0]));
        let response = state.finalize("m0".to_string()).unwrap();
        assert_eq!(response.dependencies(), &[ids[1]]);
    }

    #[test]
    fn finalize_is_single_shot() {
        let ids = modules(1);
        let mut state = ResponseState::default();
        state.insert(ids[0]);
        state.finalize("m0".to_string()).unwrap();
        assert_eq!(state.finalize("m0".to_string()), Err(GraphError::ResponseFinalized));
    }

    #[test]
    fn empty_response_is_an_error() {
        let mut state = ResponseState::default();
        assert_eq!(state.finalize("m0".to_string()), Err(GraphError::NoDependencies));
    }

    #[test]
    fn prepended_modules() {
        let ids = modules(3);
        let mut state = ResponseState::default();
        state.insert(ids[0]);
        let response = state.finalize("m0".to_string()).unwrap();
        let copied = response.copy_with_prepended(vec![ids[1], ids[2]]);
        assert_eq!(copied.dependencies(), &[ids[1], ids[2], ids[0]]);
        assert_eq!(copied.num_prepended(), 2);
        assert_eq!(copied.main_module(), ids[0]);
    }
}
