//! Path Utilities
//!
//! Code adapted from the following libraries
//! * [path-absolutize](https://docs.rs/path-absolutize)
//! * [normalize_path](https://docs.rs/normalize-path)
use std::path::{Component, Path, PathBuf};

/// Reserved platform key for files without a platform qualifier.
pub const GENERIC_PLATFORM: &str = "generic";

/// Reserved platform key for `.native.ext` files.
pub const NATIVE_PLATFORM: &str = "native";

/// Extension trait to add path normalization to std's [`Path`].
pub trait PathUtil {
    /// Normalize this path without performing I/O.
    ///
    /// All redundant separator and up-level references are collapsed.
    ///
    /// However, this does not resolve links.
    fn normalize(&self) -> PathBuf;

    /// Normalize with subpath assuming this path is normalized without performing I/O.
    ///
    /// All redundant separator and up-level references are collapsed.
    ///
    /// However, this does not resolve links.
    fn normalize_with<P: AsRef<Path>>(&self, subpath: P) -> PathBuf;

    /// The path relative to `base`, where `base` is an ancestor of this path.
    /// Returns `None` when `base` is not an ancestor.
    fn relative_to(&self, base: &Path) -> Option<&Path>;
}

impl PathUtil for Path {
    fn normalize(&self) -> PathBuf {
        let mut components = self.components().peekable();
        let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek() {
            let buf = PathBuf::from(c.as_os_str());
            components.next();
            buf
        } else {
            PathBuf::new()
        };

        for component in components {
            match component {
                Component::Prefix(..) => unreachable!("Path {:?}", self),
                Component::RootDir => {
                    ret.push(component.as_os_str());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    ret.pop();
                }
                Component::Normal(c) => {
                    ret.push(c);
                }
            }
        }

        ret
    }

    fn normalize_with<B: AsRef<Self>>(&self, subpath: B) -> PathBuf {
        let subpath = subpath.as_ref();

        let mut components = subpath.components();

        let Some(head) = components.next() else { return subpath.to_path_buf() };

        if matches!(head, Component::Prefix(..) | Component::RootDir) {
            return subpath.to_path_buf();
        }

        let mut ret = self.to_path_buf();
        for component in std::iter::once(head).chain(components) {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    ret.pop();
                }
                Component::Normal(c) => {
                    ret.push(c);
                }
                Component::Prefix(..) | Component::RootDir => {
                    unreachable!("Path {:?} Subpath {:?}", self, subpath)
                }
            }
        }

        ret
    }

    fn relative_to(&self, base: &Path) -> Option<&Path> {
        self.strip_prefix(base).ok()
    }
}

/// The platform qualifier of a file name, e.g. `ios` for `b.ios.js`.
///
/// Only qualifiers found in `platforms` are recognized; `native` is always
/// recognized. Files without a qualifier map to [GENERIC_PLATFORM].
pub fn platform_of<'a>(path: &'a Path, platforms: &[String]) -> &'a str {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return GENERIC_PLATFORM;
    };
    let Some((_, qualifier)) = stem.rsplit_once('.') else {
        return GENERIC_PLATFORM;
    };
    if qualifier == NATIVE_PLATFORM || platforms.iter().any(|p| p == qualifier) {
        return &stem[stem.len() - qualifier.len()..];
    }
    GENERIC_PLATFORM
}

#[test]
fn normalize() {
    assert_eq!(Path::new("/foo/.././foo/").normalize(), Path::new("/foo"));
    assert_eq!(Path::new("/r/a/../b.js").normalize(), Path::new("/r/b.js"));
}

#[test]
fn normalize_with() {
    assert_eq!(Path::new("/r/sub").normalize_with("../b"), Path::new("/r/b"));
    assert_eq!(Path::new("/r").normalize_with("./a/b"), Path::new("/r/a/b"));
    assert_eq!(Path::new("/r").normalize_with("/abs"), Path::new("/abs"));
}

#[test]
fn platforms() {
    let platforms = vec!["ios".to_string(), "android".to_string()];
    assert_eq!(platform_of(Path::new("/r/b.ios.js"), &platforms), "ios");
    assert_eq!(platform_of(Path::new("/r/b.native.js"), &platforms), "native");
    assert_eq!(platform_of(Path::new("/r/b.js"), &platforms), "generic");
    assert_eq!(platform_of(Path::new("/r/b.web.js"), &platforms), "generic");
    assert_eq!(platform_of(Path::new("/r/jquery.min.js"), &platforms), "generic");
}
