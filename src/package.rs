//! `package.json` wrapper.
//!
//! Parses the handful of fields the resolver cares about: `name`, `main`,
//! and the `browser`/`react-native` redirection tables. The rest of the
//! manifest is dropped at parse time.

use std::path::{Path, PathBuf};

use once_cell::unsync::OnceCell;
use serde_json::Value as JsonValue;

use crate::{error::GraphError, path::PathUtil};

/// Result of a redirection table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirected {
    /// The request was rewritten to this absolute path.
    Path(PathBuf),
    /// The request is disabled and resolves to a null module.
    Ignored,
    /// No table entry matched.
    Unchanged,
}

#[derive(Debug)]
pub struct Package {
    path: Box<Path>,
    root: Box<Path>,
    name: Option<String>,
    main_field: Option<String>,
    /// `browser` and `react-native` objects merged, `react-native` winning.
    redirects: Option<serde_json::Map<String, JsonValue>>,
    main: OnceCell<PathBuf>,
}

impl Package {
    /// Parse a `package.json`.
    ///
    /// # Errors
    ///
    /// * [GraphError::Json] when `json` is malformed.
    pub fn parse(path: &Path, json: &str) -> Result<Self, GraphError> {
        let raw: JsonValue = serde_json::from_str(json)
            .map_err(|error| GraphError::from_serde_json_error(path.to_path_buf(), &error))?;
        let root: Box<Path> = path.parent().unwrap_or_else(|| Path::new("/")).into();

        let mut name = None;
        let mut main_field = None;
        let mut redirects: Option<serde_json::Map<String, JsonValue>> = None;

        if let Some(object) = raw.as_object() {
            name = object.get("name").and_then(JsonValue::as_str).map(ToString::to_string);
            main_field = object.get("main").and_then(JsonValue::as_str).map(ToString::to_string);

            // A string `react-native` (or `browser`) field replaces `main`;
            // object forms merge into the redirection table with
            // `react-native` as the override.
            for field in ["browser", "react-native"] {
                match object.get(field) {
                    Some(JsonValue::String(replacement)) => {
                        main_field = Some(replacement.clone());
                    }
                    Some(JsonValue::Object(table)) => {
                        let merged = redirects.get_or_insert_with(serde_json::Map::new);
                        for (key, value) in table {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            path: path.into(),
            root,
            name,
            main_field,
            redirects,
            main: OnceCell::new(),
        })
    }

    /// Path to the `package.json` file itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the `package.json`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// A package takes part in haste resolution iff it declares a name.
    pub fn is_haste(&self) -> bool {
        self.name.is_some()
    }

    /// The package entry point as an absolute path.
    ///
    /// `main` is normalized: the leading `./` and a trailing `.js`/`.json`
    /// are stripped, then `.{default_ext}` is appended, then the result is
    /// joined against the package root. Missing `main` defaults to `index`.
    pub fn main(&self, default_ext: &str) -> &Path {
        self.main.get_or_init(|| {
            let main = self.main_field.as_deref().unwrap_or("index");
            let main = main.strip_prefix("./").unwrap_or(main);
            let main = main
                .strip_suffix(".js")
                .or_else(|| main.strip_suffix(".json"))
                .unwrap_or(main);
            self.root.normalize_with(format!("{main}.{default_ext}"))
        })
    }

    /// Apply the merged `browser`/`react-native` redirection table.
    ///
    /// `request` is either an absolute path into this package or a bare
    /// specifier. Absolute requests are keyed relative to the package root
    /// with a leading `./`; since table keys usually carry an extension while
    /// requests usually do not, each `project_exts` entry is tried as a key
    /// suffix after the exact key misses.
    ///
    /// # Errors
    ///
    /// * [GraphError::InvalidRedirect] for an absolute redirection value.
    pub fn redirect_require(
        &self,
        request: &str,
        project_exts: &[String],
    ) -> Result<Redirected, GraphError> {
        let Some(redirects) = &self.redirects else {
            return Ok(Redirected::Unchanged);
        };
        let key = if Path::new(request).is_absolute() {
            match Path::new(request).relative_to(&self.root) {
                Some(relative) => format!("./{}", relative.display()),
                None => return Ok(Redirected::Unchanged),
            }
        } else {
            request.to_string()
        };

        let mut candidates = vec![key.clone()];
        for ext in project_exts {
            candidates.push(format!("{key}.{ext}"));
        }
        for candidate in &candidates {
            let Some(value) = redirects.get(candidate) else {
                continue;
            };
            match value {
                JsonValue::Bool(false) => return Ok(Redirected::Ignored),
                JsonValue::String(replacement) => {
                    if Path::new(replacement).is_absolute() {
                        return Err(GraphError::InvalidRedirect {
                            key: candidate.clone(),
                            value: replacement.clone(),
                        });
                    }
                    return Ok(Redirected::Path(self.root.normalize_with(replacement)));
                }
                // Only `false` and strings are valid, all other types are
                // skipped.
                _ => {}
            }
        }
        Ok(Redirected::Unchanged)
    }
}
