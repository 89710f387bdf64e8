//! Asset index.
//!
//! Assets are resolved by logical name: `img@2x.ios.png` and `img.png` are
//! the same asset at different scales and platforms. The index is built from
//! every file under the asset roots whose extension is in the configured
//! asset-extension set; scale selection is left to the client, and the
//! resolver takes the smallest scale by convention.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::{fastfs::Fastfs, file_system::FileSystem, options::GraphOptions};

static SCALE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)@([\d.]+)x$").unwrap());

/// Parsed asset file name.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetData {
    /// Base name without scale, platform, or extension (`img`).
    pub base: String,
    /// Logical name: base plus extension (`img.png`).
    pub name: String,
    pub platform: Option<String>,
    pub scale: f64,
}

/// Parse `{base}(@{scale}x)?(.{platform})?.{ext}`. Returns `None` when the
/// extension is not an asset extension.
pub fn asset_data_of(path: &Path, options: &GraphOptions) -> Option<AssetData> {
    let ext = path.extension()?.to_str()?;
    if !options.asset_exts.iter().any(|e| e == ext) {
        return None;
    }
    let mut stem = path.file_stem()?.to_str()?;

    let mut platform = None;
    if let Some((rest, qualifier)) = stem.rsplit_once('.') {
        if options.platforms.iter().any(|p| p == qualifier) {
            platform = Some(qualifier.to_string());
            stem = rest;
        }
    }

    let mut scale = 1.0;
    if let Some(captures) = SCALE_RE.captures(stem) {
        if let Ok(parsed) = captures[2].parse::<f64>() {
            scale = parsed;
            stem = captures.get(1).unwrap().as_str();
        }
    }

    Some(AssetData {
        base: stem.to_string(),
        name: format!("{stem}.{ext}"),
        platform,
        scale,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AssetKey {
    base: String,
    platform: Option<String>,
}

/// Files for one `(name, platform)` key, parallel arrays sorted by ascending
/// scale.
#[derive(Debug, Default, Clone)]
pub struct AssetEntry {
    pub scales: Vec<f64>,
    pub files: Vec<PathBuf>,
}

impl AssetEntry {
    fn insert(&mut self, scale: f64, file: PathBuf) {
        if self.files.contains(&file) {
            return;
        }
        let at = self
            .scales
            .iter()
            .position(|s| s.partial_cmp(&scale) == Some(Ordering::Greater))
            .unwrap_or(self.scales.len());
        self.scales.insert(at, scale);
        self.files.insert(at, file);
    }

    fn remove(&mut self, file: &Path) -> bool {
        if let Some(at) = self.files.iter().position(|f| f == file) {
            self.scales.remove(at);
            self.files.remove(at);
        }
        self.files.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AssetMap {
    assets: FxHashMap<AssetKey, AssetEntry>,
}

impl AssetMap {
    pub fn build<Fs: FileSystem>(&mut self, fastfs: &Fastfs<Fs>, options: &GraphOptions) {
        self.assets.clear();
        for file in fastfs.find_files_by_exts(&options.asset_exts) {
            if options.asset_roots.iter().any(|root| file.starts_with(root)) {
                self.index_file(&file, options);
            }
        }
        tracing::debug!(entries = self.assets.len(), "asset_map_built");
    }

    pub fn index_file(&mut self, path: &Path, options: &GraphOptions) {
        let Some(data) = asset_data_of(path, options) else {
            return;
        };
        let key = AssetKey { base: data.base, platform: data.platform };
        self.assets.entry(key).or_default().insert(data.scale, path.to_path_buf());
    }

    pub fn remove_file(&mut self, path: &Path, options: &GraphOptions) {
        let Some(data) = asset_data_of(path, options) else {
            return;
        };
        let key = AssetKey { base: data.base, platform: data.platform };
        if let Some(entry) = self.assets.get_mut(&key) {
            if entry.remove(path) {
                self.assets.remove(&key);
            }
        }
    }

    /// Look up the legacy `image!name` form: by logical name, falling back to
    /// the platform-less key. Returns the first (smallest) scale.
    pub fn resolve_name(&self, name: &str, platform: Option<&str>) -> Option<&Path> {
        let entry = platform
            .and_then(|p| {
                self.assets
                    .get(&AssetKey { base: name.to_string(), platform: Some(p.to_string()) })
            })
            .or_else(|| self.assets.get(&AssetKey { base: name.to_string(), platform: None }))?;
        entry.files.first().map(PathBuf::as_path)
    }

    /// Resolve an absolute asset path to the best concrete sibling:
    /// the file in the same directory matching
    /// `^{name}(@[\d.]+x)?(\.{platform})?\.{type}$`, preferring a
    /// platform-qualified match and the smallest scale.
    pub fn resolve_file<Fs: FileSystem>(
        fastfs: &Fastfs<Fs>,
        path: &Path,
        platform: Option<&str>,
        options: &GraphOptions,
    ) -> Option<PathBuf> {
        let data = asset_data_of(path, options)?;
        let dir = path.parent()?;
        let ext = path.extension()?.to_str()?;
        let pattern = Regex::new(&format!(
            r"^{}[/\\]{}(@[\d.]+x)?(\.({}))?\.{}$",
            regex::escape(dir.to_str()?),
            regex::escape(&data.base),
            options.platforms.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join("|"),
            regex::escape(ext),
        ))
        .ok()?;

        let mut best: Option<(bool, f64, PathBuf)> = None;
        for candidate in fastfs.matches(dir, &pattern) {
            let Some(candidate_data) = asset_data_of(&candidate, options) else {
                continue;
            };
            let platform_match = match (&candidate_data.platform, platform) {
                // A file qualified for another platform is not a candidate.
                (Some(p), Some(requested)) if p == requested => true,
                (Some(_), _) => continue,
                (None, _) => false,
            };
            let better = match &best {
                None => true,
                Some((best_platform, best_scale, _)) => {
                    platform_match > *best_platform
                        || (platform_match == *best_platform && candidate_data.scale < *best_scale)
                }
            };
            if better {
                best = Some((platform_match, candidate_data.scale, candidate));
            }
        }
        best.map(|(_, _, path)| path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::MemoryFileSystem;
    use pretty_assertions::assert_eq;

    fn options() -> GraphOptions {
        GraphOptions::default()
            .with_project_root("/r")
            .with_asset_root("/r/assets")
            .sanitize()
    }

    fn build(files: &[&str]) -> (Fastfs<MemoryFileSystem>, AssetMap, GraphOptions) {
        let options = options();
        let fs =
            MemoryFileSystem::new(&files.iter().map(|f| (*f, "")).collect::<Vec<_>>());
        let mut fastfs = Fastfs::new(fs, &options);
        fastfs.build(&options).unwrap();
        let mut assets = AssetMap::default();
        assets.build(&fastfs, &options);
        (fastfs, assets, options)
    }

    #[test]
    fn parse_asset_names() {
        let options = options();
        let data = asset_data_of(Path::new("/r/assets/img@2x.ios.png"), &options).unwrap();
        assert_eq!(data.base, "img");
        assert_eq!(data.name, "img.png");
        assert_eq!(data.platform, Some("ios".to_string()));
        assert_eq!(data.scale, 2.0);

        let data = asset_data_of(Path::new("/r/assets/img.png"), &options).unwrap();
        assert_eq!(data.platform, None);
        assert_eq!(data.scale, 1.0);

        assert_eq!(asset_data_of(Path::new("/r/a.js"), &options), None);
    }

    #[test]
    fn name_lookup_prefers_platform_then_falls_back() {
        let (_, assets, _) = build(&[
            "/r/assets/icon.png",
            "/r/assets/icon.ios.png",
            "/r/assets/other@3x.png",
        ]);
        assert_eq!(
            assets.resolve_name("icon", Some("ios")),
            Some(Path::new("/r/assets/icon.ios.png"))
        );
        assert_eq!(
            assets.resolve_name("icon", Some("android")),
            Some(Path::new("/r/assets/icon.png"))
        );
        assert_eq!(assets.resolve_name("other", None), Some(Path::new("/r/assets/other@3x.png")));
        assert_eq!(assets.resolve_name("missing", None), None);
    }

    #[test]
    fn smallest_scale_wins() {
        let (_, assets, _) = build(&[
            "/r/assets/img@3x.png",
            "/r/assets/img.png",
            "/r/assets/img@2x.png",
        ]);
        assert_eq!(assets.resolve_name("img", None), Some(Path::new("/r/assets/img.png")));
    }

    #[test]
    fn file_lookup_matches_siblings() {
        let (fastfs, _, options) = build(&[
            "/r/img.png",
            "/r/img@2x.png",
            "/r/img.ios.png",
        ]);
        assert_eq!(
            AssetMap::resolve_file(&fastfs, Path::new("/r/img.png"), Some("ios"), &options),
            Some(PathBuf::from("/r/img.ios.png"))
        );
        assert_eq!(
            AssetMap::resolve_file(&fastfs, Path::new("/r/img.png"), Some("android"), &options),
            Some(PathBuf::from("/r/img.png"))
        );
        assert_eq!(
            AssetMap::resolve_file(&fastfs, Path::new("/r/missing.png"), None, &options),
            None
        );
    }

    #[test]
    fn change_events_update_the_index() {
        let (_, mut assets, options) = build(&["/r/assets/icon.png"]);
        assets.remove_file(Path::new("/r/assets/icon.png"), &options);
        assert_eq!(assets.resolve_name("icon", None), None);
        assets.index_file(Path::new("/r/assets/icon@2x.png"), &options);
        assert_eq!(
            assets.resolve_name("icon", None),
            Some(Path::new("/r/assets/icon@2x.png"))
        );
    }
}
