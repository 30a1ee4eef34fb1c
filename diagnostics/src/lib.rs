//! Structured, source-mapped diagnostics shared by every decode stage.
//!
//! A [`Diagnostic`] carries a severity, a terse summary, optional detail
//! prose, an optional source range and an optional code snippet with
//! expression-value annotations. Decoders accumulate diagnostics instead of
//! returning errors so that sibling entities keep decoding and users see
//! every problem at once.

mod engine;
mod render;
mod source;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use engine::{EngineDiagnostic, from_engine_json, from_engine_slice};
pub use render::{UiSettings, diagnostic_to_string, diagnostics_to_string};
pub use source::{ByteSpan, SourceFiles, compact_value_str, expression_values, traversal_str};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Unknown => f.write_str("unknown"),
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A position within a source file. Lines and columns are 1-based, the byte
/// offset is 0-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

/// The dynamic value of one expression variable at the point of evaluation,
/// rendered for display next to a snippet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionValue {
    pub traversal: String,
    pub statement: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub code: String,
    pub start_line: usize,
    pub highlight_start_offset: usize,
    pub highlight_end_offset: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ExpressionValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub fn with_snippet(mut self, snippet: Snippet) -> Self {
        self.snippet = Some(snippet);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// An ordered accumulator of diagnostics.
///
/// Within one decode pass diagnostics are appended in arrival order. Callers
/// must not rely on inter-worker ordering from the concurrent expander; tests
/// compare as a set or sort first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds diagnostics from a plain error value: one error-severity
    /// diagnostic whose summary is the error message, with no range.
    pub fn from_err(err: &dyn std::error::Error) -> Self {
        Self(vec![Diagnostic::error(err.to_string())])
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Combines any number of diagnostic sets into one, preserving order.
    pub fn concat<I: IntoIterator<Item = Diagnostics>>(sets: I) -> Self {
        let mut combined = Diagnostics::new();
        for set in sets {
            combined.extend(set);
        }
        combined
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_err_is_error_severity_with_message_summary() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such flight plan");
        let diags = Diagnostics::from_err(&err);

        assert_eq!(diags.len(), 1);
        let diag = &diags.as_slice()[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.summary, "no such flight plan");
        assert!(diag.range.is_none());
    }

    #[test]
    fn has_errors_and_warnings() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());

        diags.push(Diagnostic::warning("slow decode"));
        assert!(!diags.has_errors());
        assert!(diags.has_warnings());

        diags.push(Diagnostic::error("bad reference"));
        assert!(diags.has_errors());
    }

    #[test]
    fn concat_preserves_order() {
        let a = Diagnostics::from(Diagnostic::error("first"));
        let b = Diagnostics::from(vec![
            Diagnostic::error("second"),
            Diagnostic::warning("third"),
        ]);

        let combined = Diagnostics::concat([a, b]);
        let summaries: Vec<_> = combined.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, ["first", "second", "third"]);
    }

    #[test]
    fn wire_shape_round_trips() {
        let diag = Diagnostic::error("unknown module")
            .with_detail("module.not_real is not a declared module")
            .with_range(Range {
                filename: "plan.hcl".to_string(),
                start: Pos {
                    line: 3,
                    column: 5,
                    byte: 41,
                },
                end: Pos {
                    line: 3,
                    column: 26,
                    byte: 62,
                },
            })
            .with_snippet(Snippet {
                context: Some("scenario \"basic\"".to_string()),
                code: "    module = module.not_real".to_string(),
                start_line: 3,
                highlight_start_offset: 13,
                highlight_end_offset: 28,
                values: Vec::new(),
            });

        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["range"]["start"]["line"], 3);
        assert_eq!(json["snippet"]["highlight_start_offset"], 13);

        let back: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(back, diag);
    }
}
