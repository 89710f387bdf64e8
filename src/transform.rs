//! Code transform and require extraction contracts.
//!
//! The graph core never rewrites or parses source itself; both concerns are
//! behind object-safe traits supplied at construction time. The default
//! implementations here are deliberately small: an identity transform and a
//! regex require-scanner, enough for JSON-free pipelines and for tests.

use std::{
    hash::{Hash, Hasher},
    path::Path,
};

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Options forwarded to the transformer; part of every read cache key.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub dev: bool,
    pub hot: bool,
    pub minify: bool,
}

impl TransformOptions {
    /// Stable key for the per-module read cache and the persistent metadata
    /// cache.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Result of a code transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedCode {
    pub code: String,
    /// When the transform pipeline already extracted dependencies, the
    /// extractor is skipped.
    pub dependencies: Option<Vec<String>>,
    pub map: Option<serde_json::Value>,
}

/// Contract: rewrite module source.
pub trait TransformCode {
    /// # Errors
    ///
    /// Transform errors propagate to the request without recovery.
    fn transform(
        &self,
        path: &Path,
        source: &str,
        options: &TransformOptions,
    ) -> Result<TransformedCode, GraphError>;
}

/// Contract: parse dependency specifiers out of (transformed) source.
pub trait ExtractRequires {
    fn extract(&self, code: &str) -> ExtractedRequires;
}

/// Extracted specifiers, in source order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedRequires {
    pub sync: Vec<String>,
}

/// Passes source through untouched.
#[derive(Debug, Default)]
pub struct IdentityTransform;

impl TransformCode for IdentityTransform {
    fn transform(
        &self,
        _path: &Path,
        source: &str,
        _options: &TransformOptions,
    ) -> Result<TransformedCode, GraphError> {
        Ok(TransformedCode { code: source.to_string(), dependencies: None, map: None })
    }
}

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)//[^\n]*|/\*(?s:.*?)\*/").unwrap());

static REQUIRE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        \brequire\s*\(\s*["']([^"']+)["']\s*\)
        | \bimport\s+(?:[\w$*{}\s,]+\bfrom\s+)?["']([^"']+)["']
        | \bexport\s+[\w$*{}\s,]+\bfrom\s+["']([^"']+)["']
        "#,
    )
    .unwrap()
});

/// Default require extractor: a comment-stripping regex scan for
/// `require(...)` calls and static `import`/`export ... from` declarations.
#[derive(Debug, Default)]
pub struct RequireScanner;

impl ExtractRequires for RequireScanner {
    fn extract(&self, code: &str) -> ExtractedRequires {
        let stripped = COMMENT_RE.replace_all(code, "");
        let mut sync = vec![];
        for captures in REQUIRE_RE.captures_iter(&stripped) {
            let specifier = captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
                .map(|m| m.as_str());
            if let Some(specifier) = specifier {
                if !sync.iter().any(|s| s == specifier) {
                    sync.push(specifier.to_string());
                }
            }
        }
        ExtractedRequires { sync }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(code: &str) -> Vec<String> {
        RequireScanner.extract(code).sync
    }

    #[test]
    fn requires_in_source_order() {
        let code = "const b = require('./b');\nconst c = require(\"c\");";
        assert_eq!(extract(code), vec!["./b".to_string(), "c".to_string()]);
    }

    #[test]
    fn imports_and_exports() {
        let code = "import a from './a';\nimport './side-effect';\nexport { x } from './x';";
        assert_eq!(
            extract(code),
            vec!["./a".to_string(), "./side-effect".to_string(), "./x".to_string()]
        );
    }

    #[test]
    fn comments_are_ignored() {
        let code = "// require('./nope')\n/* require('./also-nope') */\nrequire('./yes');";
        assert_eq!(extract(code), vec!["./yes".to_string()]);
    }

    #[test]
    fn duplicates_collapse_to_first() {
        let code = "require('./a'); require('./b'); require('./a');";
        assert_eq!(extract(code), vec!["./a".to_string(), "./b".to_string()]);
    }

    #[test]
    fn cache_key_is_stable() {
        let a = TransformOptions { dev: true, ..TransformOptions::default() };
        let b = TransformOptions { dev: true, ..TransformOptions::default() };
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), TransformOptions::default().cache_key());
    }
}
