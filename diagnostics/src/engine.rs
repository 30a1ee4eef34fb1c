//! Ingestion of the external engine's structured JSON diagnostics.
//!
//! The engine is invoked as a subprocess and reports problems as JSON
//! objects. Translation is structural: severity is mapped, snippet fields
//! are preserved verbatim.

use serde::Deserialize;

use crate::{Diagnostic, Diagnostics, ExpressionValue, Pos, Range, Severity, Snippet};

#[derive(Clone, Debug, Deserialize)]
pub struct EngineDiagnostic {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub range: Option<EngineRange>,
    #[serde(default)]
    pub snippet: Option<EngineSnippet>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineRange {
    #[serde(default)]
    pub filename: String,
    pub start: EnginePos,
    pub end: EnginePos,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnginePos {
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub column: usize,
    #[serde(default)]
    pub byte: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineSnippet {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub highlight_start_offset: usize,
    #[serde(default)]
    pub highlight_end_offset: usize,
    #[serde(default)]
    pub values: Vec<EngineExpressionValue>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineExpressionValue {
    #[serde(default)]
    pub traversal: String,
    #[serde(default)]
    pub statement: String,
}

impl From<EngineDiagnostic> for Diagnostic {
    fn from(din: EngineDiagnostic) -> Self {
        let severity = match din.severity.as_str() {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Unknown,
        };

        Diagnostic {
            severity,
            summary: din.summary,
            detail: din.detail,
            range: din.range.map(|r| Range {
                filename: r.filename,
                start: Pos {
                    line: r.start.line,
                    column: r.start.column,
                    byte: r.start.byte,
                },
                end: Pos {
                    line: r.end.line,
                    column: r.end.column,
                    byte: r.end.byte,
                },
            }),
            snippet: din.snippet.map(|s| Snippet {
                context: s.context,
                code: s.code,
                start_line: s.start_line,
                highlight_start_offset: s.highlight_start_offset,
                highlight_end_offset: s.highlight_end_offset,
                values: s
                    .values
                    .into_iter()
                    .map(|v| ExpressionValue {
                        traversal: v.traversal,
                        statement: v.statement,
                    })
                    .collect(),
            }),
        }
    }
}

/// Translates a slice of already-deserialized engine diagnostics.
pub fn from_engine_slice(input: Vec<EngineDiagnostic>) -> Diagnostics {
    input.into_iter().map(Diagnostic::from).collect()
}

/// Parses engine diagnostics from raw JSON bytes. The payload is either one
/// diagnostic object or an array of them.
pub fn from_engine_json(raw: &[u8]) -> Result<Diagnostics, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<EngineDiagnostic>),
        One(EngineDiagnostic),
    }

    let parsed: OneOrMany = serde_json::from_slice(raw)?;
    Ok(match parsed {
        OneOrMany::Many(diags) => from_engine_slice(diags),
        OneOrMany::One(diag) => from_engine_slice(vec![diag]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_json_translates_structurally() {
        let raw = br#"{
            "severity": "error",
            "summary": "Unsupported argument",
            "detail": "An argument named \"driver\" is not expected here.",
            "range": {
                "filename": "main.tf.json",
                "start": {"line": 4, "column": 3, "byte": 52},
                "end": {"line": 4, "column": 9, "byte": 58}
            },
            "snippet": {
                "context": "module \"backend\"",
                "code": "  driver = \"postgres\"",
                "start_line": 4,
                "highlight_start_offset": 2,
                "highlight_end_offset": 8,
                "values": [
                    {"traversal": "var.driver", "statement": "will be known only after apply"}
                ]
            }
        }"#;

        let diags = from_engine_json(raw).unwrap();
        assert_eq!(diags.len(), 1);

        let diag = &diags.as_slice()[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.summary, "Unsupported argument");

        let range = diag.range.as_ref().unwrap();
        assert_eq!(range.filename, "main.tf.json");
        assert_eq!(range.start.line, 4);
        assert_eq!(range.end.byte, 58);

        let snippet = diag.snippet.as_ref().unwrap();
        assert_eq!(snippet.context.as_deref(), Some("module \"backend\""));
        assert_eq!(snippet.highlight_end_offset, 8);
        assert_eq!(snippet.values[0].statement, "will be known only after apply");
    }

    #[test]
    fn unknown_severity_maps_to_unknown() {
        let raw = br#"[{"severity": "info", "summary": "something"}]"#;
        let diags = from_engine_json(raw).unwrap();
        assert_eq!(diags.as_slice()[0].severity, Severity::Unknown);
    }
}
