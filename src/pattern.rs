//! Named, compiled text patterns.
//!
//! A [`Pattern`] is immutable once built and cheap to clone (the compiled
//! regex is reference counted), so product tables and topologies can hand
//! copies to every session.

use std::fmt;

use regex::Regex;

use crate::error::ConsoleError;

#[derive(Clone)]
pub struct Pattern {
    name: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles `regex` under a symbolic name.
    pub fn new(name: impl Into<String>, regex: &str) -> Result<Self, ConsoleError> {
        let name = name.into();
        let regex = Regex::new(regex).map_err(|e| {
            ConsoleError::InvalidConfig(format!("invalid pattern '{name}': {e}"))
        })?;
        Ok(Self { name, regex })
    }

    /// Matches `text` literally anywhere in the buffer.
    pub fn literal(name: impl Into<String>, text: &str) -> Self {
        let name = name.into();
        // An escaped literal always compiles.
        match Regex::new(&regex::escape(text)) {
            Ok(regex) => Self { name, regex },
            Err(err) => unreachable!("escaped literal failed to compile: {err}"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text of the compiled expression.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Byte range of the leftmost match.
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        self.regex.find(text).map(|m| (m.start(), m.end()))
    }

    /// First capture group of the leftmost match.
    pub fn capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.regex.as_str() == other.regex.as_str()
    }
}

impl Eq for Pattern {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_regex_is_a_config_error() {
        let err = Pattern::new("broken", "(unclosed").expect_err("must fail");
        assert!(matches!(err, ConsoleError::InvalidConfig(msg) if msg.contains("broken")));
    }

    #[test]
    fn literal_escapes_metacharacters() {
        let pattern = Pattern::literal("refused", "Request refused. Exiting ...");
        assert!(pattern.is_match("\r\nRequest refused. Exiting ...\r\n"));
        assert!(!pattern.is_match("Request refused! Exiting ..."));
    }

    #[test]
    fn find_and_capture_report_leftmost_match() {
        let pattern = Pattern::new("state", r"State: (\w+)").expect("pattern");
        let text = "    State: Downloading\n    State: Downloaded";
        assert_eq!(pattern.capture(text), Some("Downloading"));
        let (start, end) = pattern.find(text).expect("match");
        assert_eq!(&text[start..end], "State: Downloading");
    }
}
