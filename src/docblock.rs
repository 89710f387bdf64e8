//! Leading docblock parsing.
//!
//! A docblock is a `/** ... */` comment at the very top of a source file.
//! Its `@directive value` lines carry module metadata; the one this crate
//! cares about is `@providesModule` (with `@provides` as its legacy alias),
//! which declares a globally unique haste name.

use once_cell::sync::Lazy;
use regex::Regex;

static DOCBLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(/\*\*(?s:.*?)\*/)").unwrap());

static DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(\S+)[ \t]*([^\n@]*)").unwrap());

#[derive(Debug, Default, Clone)]
pub struct Docblock {
    directives: Vec<(String, String)>,
}

impl Docblock {
    /// Parse the docblock out of the leading bytes of a source file.
    ///
    /// `source` does not need to be the complete file; any prefix that fully
    /// contains the comment works (see [crate::Fastfs::read_while]).
    pub fn parse(source: &str) -> Self {
        let Some(captures) = DOCBLOCK_RE.captures(source) else {
            return Self::default();
        };
        let block = &captures[1];
        let directives = DIRECTIVE_RE
            .captures_iter(block)
            .map(|c| (c[1].to_string(), c[2].trim().trim_end_matches("*/").trim().to_string()))
            .collect();
        Self { directives }
    }

    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The declared haste name, from `@providesModule` or `@provides`.
    pub fn provides_module(&self) -> Option<&str> {
        self.directive("providesModule")
            .or_else(|| self.directive("provides"))
            .filter(|name| !name.is_empty())
    }
}

/// `read_while` predicate: keep reading while the docblock is still open.
///
/// Stops as soon as the accumulated prefix either closes the comment or
/// reveals that the file does not start with one.
pub fn still_in_docblock(_chunk: &str, _index: usize, acc: &str) -> bool {
    let trimmed = acc.trim_start();
    if trimmed.is_empty() {
        return true;
    }
    if !trimmed.starts_with("/*") {
        // Tolerate a partially read `/` at a chunk boundary.
        return trimmed.len() < 2;
    }
    !trimmed.contains("*/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provides_module() {
        let docblock = Docblock::parse("/**\n * @providesModule Foo\n */\nlet x;");
        assert_eq!(docblock.provides_module(), Some("Foo"));
    }

    #[test]
    fn provides_alias() {
        let docblock = Docblock::parse("/** @provides Bar */");
        assert_eq!(docblock.provides_module(), Some("Bar"));
    }

    #[test]
    fn no_docblock() {
        assert_eq!(Docblock::parse("let x;").provides_module(), None);
        assert_eq!(Docblock::parse("// @providesModule Nope").provides_module(), None);
        // An ordinary block comment is not a docblock.
        assert_eq!(Docblock::parse("/* @providesModule Nope */").provides_module(), None);
    }

    #[test]
    fn multiple_directives() {
        let docblock = Docblock::parse("/**\n * @providesModule Foo\n * @flow\n */");
        assert_eq!(docblock.provides_module(), Some("Foo"));
        assert_eq!(docblock.directive("flow"), Some(""));
    }

    #[test]
    fn predicate() {
        assert!(still_in_docblock("", 0, "  \n"));
        assert!(still_in_docblock("", 0, "/** @providesModule"));
        assert!(!still_in_docblock("", 1, "/** @providesModule Foo */"));
        assert!(!still_in_docblock("", 0, "let x;"));
    }
}
