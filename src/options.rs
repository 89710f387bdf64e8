use std::{
    fmt,
    path::{Path, PathBuf},
};

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::path::PathUtil;

/// Dependency Graph Options
///
/// Everything here is plain data; the code contracts of the graph
/// (transformer, require extractor) are passed to
/// [crate::DependencyGraph::new] separately so the options stay `Clone`.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Directories crawled eagerly at build time. Source files are looked up
    /// relative to these and indexed for haste names.
    ///
    /// Default `[]`
    pub project_roots: Vec<PathBuf>,

    /// Directories whose files are indexed by logical asset name.
    ///
    /// Default `[]`
    pub asset_roots: Vec<PathBuf>,

    /// Directories whose file nodes are materialized on first access rather
    /// than crawled at build time.
    ///
    /// Default `[]`
    pub lazy_roots: Vec<PathBuf>,

    /// Source extensions in fallback order, without the leading dot.
    ///
    /// Default `["js", "json"]`
    pub project_exts: Vec<String>,

    /// Asset extensions, without the leading dot.
    ///
    /// Default `["png", "jpg", "jpeg", "gif", "webp", "bmp", "psd", "svg"]`
    pub asset_exts: Vec<String>,

    /// Recognized platform tags. Files named `{base}.{platform}.{ext}` are
    /// indexed under the matching tag.
    ///
    /// Default `["ios", "android"]`
    pub platforms: Vec<String>,

    /// Try `{base}.native.{ext}` between the platform-qualified and the
    /// unqualified file name.
    ///
    /// Default `false`
    pub prefer_native_platform: bool,

    /// Files whose path matches are ignored by the crawl and by haste
    /// indexing.
    ///
    /// Default `None`
    pub blacklist: Option<Regex>,

    /// Fallback bases for installed-package lookup: when the first path
    /// component of a bare specifier matches a key, `{value}/{specifier}` is
    /// tried after the `node_modules` walk fails.
    ///
    /// Default `{}`
    pub extra_node_modules: FxHashMap<String, PathBuf>,

    /// Global redirect table, applied after package-level redirection.
    /// [RedirectValue::Ignore] nullifies the request; a path substitutes it,
    /// and the substitute is then resolved normally.
    ///
    /// Default `{}`
    pub redirect: FxHashMap<String, RedirectValue>,

    /// Where to write the informational haste snapshot after each full haste
    /// build. Never read back.
    ///
    /// Default `None`
    pub haste_snapshot_path: Option<PathBuf>,

    /// Decides whether unresolved specifiers fail the whole request after
    /// completion, per `(entry path, platform)`.
    ///
    /// Default `None` (collect only)
    pub throw_on_unresolved: Option<fn(&Path, Option<&str>) -> bool>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            project_roots: vec![],
            asset_roots: vec![],
            lazy_roots: vec![],
            project_exts: vec!["js".into(), "json".into()],
            asset_exts: vec![
                "png".into(),
                "jpg".into(),
                "jpeg".into(),
                "gif".into(),
                "webp".into(),
                "bmp".into(),
                "psd".into(),
                "svg".into(),
            ],
            platforms: vec!["ios".into(), "android".into()],
            prefer_native_platform: false,
            blacklist: None,
            extra_node_modules: FxHashMap::default(),
            redirect: FxHashMap::default(),
            haste_snapshot_path: None,
            throw_on_unresolved: None,
        }
    }
}

impl GraphOptions {
    #[must_use]
    pub fn with_project_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.project_roots.push(root.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_asset_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.asset_roots.push(root.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_lazy_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.lazy_roots.push(root.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_platform<S: Into<String>>(mut self, platform: S) -> Self {
        self.platforms.push(platform.into());
        self
    }

    #[must_use]
    pub const fn with_prefer_native_platform(mut self, flag: bool) -> Self {
        self.prefer_native_platform = flag;
        self
    }

    /// Normalize roots and strip leading dots from extension lists.
    /// Called once on construction.
    #[must_use]
    pub(crate) fn sanitize(mut self) -> Self {
        for roots in [&mut self.project_roots, &mut self.asset_roots, &mut self.lazy_roots] {
            for root in roots.iter_mut() {
                *root = root.normalize();
            }
        }
        for exts in [&mut self.project_exts, &mut self.asset_exts] {
            for ext in exts.iter_mut() {
                if let Some(stripped) = ext.strip_prefix('.') {
                    *ext = stripped.to_string();
                }
            }
        }
        self
    }

    /// Eager roots, in configuration order. These double as the whitelist of
    /// package roots allowed to declare haste names from inside
    /// `node_modules`.
    pub(crate) fn eager_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.project_roots.iter().chain(self.asset_roots.iter())
    }

    pub(crate) fn is_blacklisted(&self, path: &Path) -> bool {
        self.blacklist
            .as_ref()
            .is_some_and(|re| path.to_str().is_some_and(|p| re.is_match(p)))
    }

    pub(crate) fn is_asset_ext(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.asset_exts.iter().any(|e| e == ext))
    }

    pub(crate) fn is_project_ext(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.project_exts.iter().any(|e| e == ext))
    }
}

/// Value of an entry in the global redirect table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectValue {
    /// Substitute the request with this path and resolve it normally.
    Path(PathBuf),
    /// The request is disabled; it resolves to a null module.
    Ignore,
}

impl fmt::Display for RedirectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => path.display().fmt(f),
            Self::Ignore => f.write_str("false"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize() {
        let options = GraphOptions {
            project_roots: vec![PathBuf::from("/r/./sub/..")],
            project_exts: vec![".js".into(), "json".into()],
            ..GraphOptions::default()
        }
        .sanitize();
        assert_eq!(options.project_roots, vec![PathBuf::from("/r")]);
        assert_eq!(options.project_exts, vec!["js".to_string(), "json".to_string()]);
    }

    #[test]
    fn builders() {
        let options = GraphOptions::default()
            .with_project_root("/r")
            .with_asset_root("/assets")
            .with_platform("web")
            .with_prefer_native_platform(true);
        assert_eq!(options.project_roots, vec![PathBuf::from("/r")]);
        assert_eq!(options.eager_roots().count(), 2);
        assert!(options.platforms.contains(&"web".to_string()));
        assert!(options.prefer_native_platform);
    }

    #[test]
    fn blacklist() {
        let options = GraphOptions {
            blacklist: Some(Regex::new(r"__tests__").unwrap()),
            ..GraphOptions::default()
        };
        assert!(options.is_blacklisted(Path::new("/r/__tests__/a.js")));
        assert!(!options.is_blacklisted(Path::new("/r/a.js")));
    }
}
