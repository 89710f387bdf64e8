use std::{
    io,
    path::PathBuf,
    sync::Arc,
};

use thiserror::Error;

/// All dependency graph errors
///
/// `thiserror` is used to display meaningful error messages.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// A `require` specifier that no resolution strategy could satisfy.
    ///
    /// Recoverable at strategy boundaries: each resolution strategy is tried
    /// only when the previous one failed with this error. When it escapes all
    /// strategies it is surfaced to the request's error sink and the slot is
    /// retried on the next file event.
    #[error("Unable to resolve module `{specifier}` from `{from}`: {reason}")]
    UnableToResolve {
        from: PathBuf,
        specifier: String,
        reason: String,
    },

    /// A path that is not a descendant of any configured root.
    #[error("`{0}` not found in any of the roots")]
    NotFoundInRoots(PathBuf),

    /// `read_file` on a path with no file node.
    #[error("file not found: `{0}`")]
    FileNotFound(PathBuf),

    /// Two files declared the same haste name at the same platform.
    ///
    /// Fatal: propagates to the pending request. The next file change
    /// triggers a full haste map rebuild as recovery.
    #[error("@providesModule naming collision: `{name}` ({platform}) maps to both `{existing}` and `{incoming}`")]
    HasteCollision {
        name: String,
        platform: String,
        existing: PathBuf,
        incoming: PathBuf,
    },

    /// Malformed `package.json`.
    ///
    /// Swallowed on the haste indexing path, propagated everywhere else.
    #[error("{0:?}")]
    Json(JsonError),

    /// A `browser`/`react-native` redirection value that is an absolute path.
    /// Redirections must be relative to the package root.
    #[error("redirection for `{key}` must be relative, got `{value}`")]
    InvalidRedirect { key: String, value: String },

    /// Occurs when redirections reference each other.
    #[error("Recursion in resolving")]
    Recursion,

    /// A finalized `Response` was mutated or finalized twice.
    #[error("Response is no longer mutable")]
    ResponseFinalized,

    /// A `Response` finalized without a single dependency.
    #[error("Expected at least one dependency")]
    NoDependencies,

    #[error("{0}")]
    IOError(IOError),
}

impl GraphError {
    /// Construct an [GraphError::UnableToResolve] for `specifier` required
    /// from the module at `from`.
    pub(crate) fn unable_to_resolve(
        from: &std::path::Path,
        specifier: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnableToResolve {
            from: from.to_path_buf(),
            specifier: specifier.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_unable_to_resolve(&self) -> bool {
        matches!(self, Self::UnableToResolve { .. })
    }

    #[must_use]
    pub const fn is_not_found_in_roots(&self) -> bool {
        matches!(self, Self::NotFoundInRoots(_))
    }

    #[must_use]
    pub fn from_serde_json_error(path: PathBuf, error: &serde_json::Error) -> Self {
        Self::Json(JsonError {
            path,
            message: error.to_string(),
            line: error.line(),
            column: error.column(),
        })
    }
}

/// JSON error from [serde_json::Error]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JsonError {
    pub path: PathBuf,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct IOError(Arc<io::Error>);

impl PartialEq for IOError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<IOError> for io::Error {
    fn from(error: IOError) -> Self {
        let io_error = error.0.as_ref();
        Self::new(io_error.kind(), io_error.to_string())
    }
}

impl From<io::Error> for GraphError {
    fn from(err: io::Error) -> Self {
        Self::IOError(IOError(Arc::new(err)))
    }
}

#[test]
fn test_into_io_error() {
    use std::io::ErrorKind;
    let error_string = "IOError occurred";
    let string_error = io::Error::new(ErrorKind::Interrupted, error_string.to_string());
    let string_error2 = io::Error::new(ErrorKind::Interrupted, error_string.to_string());
    let graph_io_error: GraphError = GraphError::from(string_error2);

    assert_eq!(graph_io_error, GraphError::from(string_error));
    assert_eq!(graph_io_error.clone(), graph_io_error);
    let GraphError::IOError(io_error) = graph_io_error else { unreachable!() };
    let std_io_error: io::Error = io_error.into();
    assert_eq!(std_io_error.kind(), ErrorKind::Interrupted);
    assert_eq!(std_io_error.to_string(), error_string);
}

#[test]
fn test_coverage() {
    let error = GraphError::FileNotFound(PathBuf::from("/x"));
    assert_eq!(format!("{error:?}"), r#"FileNotFound("/x")"#);
    assert_eq!(error.clone(), error);

    let error = GraphError::unable_to_resolve(std::path::Path::new("/a.js"), "./b", "file missing");
    assert!(error.is_unable_to_resolve());
    assert_eq!(
        error.to_string(),
        "Unable to resolve module `./b` from `/a.js`: file missing"
    );
}
