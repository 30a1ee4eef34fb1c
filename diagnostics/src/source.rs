//! Source-file bookkeeping and snippet synthesis.
//!
//! Parsed file buffers are retained here so that diagnostics raised later in
//! the decode pipeline can be mapped back to line/column positions and carry
//! a rendered code snippet.

use hcl::Value;
use hcl::eval::{Context, Evaluate};
use hcl::expr::{Expression, Traversal, TraversalOperator};
use std::collections::BTreeMap;

use crate::{Diagnostic, ExpressionValue, Pos, Range, Snippet};

/// A byte span within a single source buffer.
pub type ByteSpan = std::ops::Range<usize>;

/// The set of configuration source buffers for one decode pass, keyed by
/// filename. Shared read-only after construction.
#[derive(Clone, Debug, Default)]
pub struct SourceFiles {
    files: BTreeMap<String, String>,
}

impl SourceFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filename: impl Into<String>, source: impl Into<String>) {
        self.files.insert(filename.into(), source.into());
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.files.get(filename).map(String::as_str)
    }

    /// Iterates files in filename order, which keeps multi-file decode
    /// deterministic.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Maps a byte offset to a 1-based line/column position, clamping the
    /// offset into the buffer.
    pub fn pos_at(&self, filename: &str, byte: usize) -> Pos {
        let Some(source) = self.get(filename) else {
            return Pos::default();
        };
        pos_at(source, byte)
    }

    pub fn range_for(&self, filename: &str, span: &ByteSpan) -> Range {
        Range {
            filename: filename.to_string(),
            start: self.pos_at(filename, span.start),
            end: self.pos_at(filename, span.end),
        }
    }

    /// Attaches a source range and synthesized snippet to a diagnostic.
    ///
    /// `highlight` is the subject byte span; `context` optionally widens the
    /// snippet (typically to the enclosing block definition).
    pub fn attach_snippet(
        &self,
        diag: Diagnostic,
        filename: &str,
        highlight: &ByteSpan,
        context: Option<&ByteSpan>,
    ) -> Diagnostic {
        let Some(source) = self.get(filename) else {
            return diag;
        };

        let mut highlight = highlight.clone();
        if highlight.end < highlight.start {
            highlight.end = highlight.start;
        }
        // Never let the highlight be empty.
        if highlight.is_empty() {
            highlight.end = (highlight.start + 1).min(source.len().max(1));
        }

        let mut snip = match context {
            Some(ctx) => ctx.start.min(highlight.start)..ctx.end.max(highlight.end),
            None => highlight.clone(),
        };
        if snip.is_empty() {
            snip.end = snip.start + 1;
        }

        let diag = diag.with_range(self.range_for(filename, &highlight));
        let Some(snippet) = synthesize_snippet(source, &snip, &highlight) else {
            return diag;
        };
        diag.with_snippet(snippet)
    }

    /// Like [`SourceFiles::attach_snippet`], additionally deriving
    /// expression-value annotations for the variables referenced by `expr`
    /// at the point of evaluation.
    pub fn attach_snippet_with_values(
        &self,
        diag: Diagnostic,
        filename: &str,
        highlight: &ByteSpan,
        context: Option<&ByteSpan>,
        expr: &Expression,
        ctx: &Context,
    ) -> Diagnostic {
        let mut diag = self.attach_snippet(diag, filename, highlight, context);
        if let Some(snippet) = diag.snippet.as_mut() {
            snippet.values = expression_values(expr, ctx);
        }
        diag
    }
}

fn pos_at(source: &str, byte: usize) -> Pos {
    let byte = byte.min(source.len());
    let mut line = 1usize;
    let mut line_start = 0usize;

    for (idx, c) in source.char_indices() {
        if idx >= byte {
            break;
        }
        if c == '\n' {
            line += 1;
            line_start = idx + 1;
        }
    }

    let column = source[line_start..byte].chars().count() + 1;
    Pos { line, column, byte }
}

/// Lines of `source` as (start byte, end byte including the newline, text
/// without the newline).
fn line_spans(source: &str) -> Vec<(usize, usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (idx, c) in source.char_indices() {
        if c == '\n' {
            out.push((start, idx + 1, &source[start..idx]));
            start = idx + 1;
        }
    }
    if start <= source.len() {
        out.push((start, source.len(), &source[start..]));
    }
    out
}

fn synthesize_snippet(source: &str, snip: &ByteSpan, highlight: &ByteSpan) -> Option<Snippet> {
    let mut code = String::new();
    let mut code_start_byte = None;
    let mut start_line = 0usize;

    for (line_no, (line_start, line_end, text)) in line_spans(source).iter().enumerate() {
        let overlaps = *line_start < snip.end && snip.start < *line_end;
        if !overlaps {
            continue;
        }
        if code_start_byte.is_none() {
            code_start_byte = Some(*line_start);
            start_line = line_no + 1;
        }
        if !code.is_empty() {
            code.push('\n');
        }
        code.push_str(text);
    }

    let code_start_byte = code_start_byte?;

    let start = highlight.start.saturating_sub(code_start_byte).min(code.len());
    let end = (start + (highlight.end - highlight.start)).min(code.len());

    Some(Snippet {
        context: enclosing_block_header(source, highlight.start),
        code,
        start_line,
        highlight_start_offset: start,
        highlight_end_offset: end,
        values: Vec::new(),
    })
}

/// Finds the innermost block header enclosing `byte`, e.g. `scenario "basic"`
/// for a diagnostic inside that block. Tracks brace depth outside of quoted
/// strings and comments.
fn enclosing_block_header(source: &str, byte: usize) -> Option<String> {
    let byte = byte.min(source.len());
    let mut headers: Vec<String> = Vec::new();
    let mut line_start = 0usize;
    let mut in_string = false;
    let mut in_comment = false;

    let mut chars = source[..byte].char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\n' => {
                line_start = idx + 1;
                in_comment = false;
            }
            '"' if !in_comment => in_string = !in_string,
            '#' if !in_string => in_comment = true,
            '/' if !in_string && !in_comment => {
                if matches!(chars.peek(), Some((_, '/'))) {
                    in_comment = true;
                }
            }
            '{' if !in_string && !in_comment => {
                let header = source[line_start..idx].trim();
                headers.push(header.to_string());
            }
            '}' if !in_string && !in_comment => {
                headers.pop();
            }
            _ => {}
        }
    }

    headers
        .into_iter()
        .rev()
        .find(|h| !h.is_empty())
        .map(|h| h.trim_end_matches('=').trim().to_string())
}

/// Derives expression-value annotations for every variable referenced by
/// `expr`: each traversal is evaluated from full depth down to its root and
/// the first prefix that evaluates cleanly contributes one annotation.
/// Annotations are deduplicated by traversal string and sorted.
pub fn expression_values(expr: &Expression, ctx: &Context) -> Vec<ExpressionValue> {
    let mut traversals = Vec::new();
    collect_traversals(expr, &mut traversals);

    let mut seen = BTreeMap::new();
    for (root, operators) in traversals {
        for depth in (0..=operators.len()).rev() {
            let prefix = &operators[..depth];
            let candidate = if prefix.is_empty() {
                Expression::Variable(root.clone())
            } else {
                Expression::Traversal(Box::new(Traversal {
                    expr: Expression::Variable(root.clone()),
                    operators: prefix.to_vec(),
                }))
            };

            let Ok(val) = candidate.evaluate(ctx) else {
                // An error here is already in the diagnostic set; try a
                // shorter prefix.
                continue;
            };

            let traversal = prefix_str(root.as_str(), prefix);
            seen.entry(traversal)
                .or_insert_with(|| format!("is {}", compact_value_str(&val)));
            break;
        }
    }

    seen.into_iter()
        .map(|(traversal, statement)| ExpressionValue {
            traversal,
            statement,
        })
        .collect()
}

fn collect_traversals(
    expr: &Expression,
    out: &mut Vec<(hcl::expr::Variable, Vec<TraversalOperator>)>,
) {
    match expr {
        Expression::Variable(var) => out.push((var.clone(), Vec::new())),
        Expression::Traversal(traversal) => {
            if let Expression::Variable(var) = &traversal.expr {
                out.push((var.clone(), traversal.operators.clone()));
            } else {
                collect_traversals(&traversal.expr, out);
            }
            for op in &traversal.operators {
                if let TraversalOperator::Index(idx) = op {
                    collect_traversals(idx, out);
                }
            }
        }
        Expression::Array(items) => {
            for item in items {
                collect_traversals(item, out);
            }
        }
        Expression::Object(object) => {
            for (key, value) in object {
                if let hcl::expr::ObjectKey::Expression(key_expr) = key {
                    collect_traversals(key_expr, out);
                }
                collect_traversals(value, out);
            }
        }
        Expression::Parenthesis(inner) => collect_traversals(inner, out),
        Expression::Conditional(cond) => {
            collect_traversals(&cond.cond_expr, out);
            collect_traversals(&cond.true_expr, out);
            collect_traversals(&cond.false_expr, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            hcl::expr::Operation::Unary(unary) => collect_traversals(&unary.expr, out),
            hcl::expr::Operation::Binary(binary) => {
                collect_traversals(&binary.lhs_expr, out);
                collect_traversals(&binary.rhs_expr, out);
            }
        },
        Expression::FuncCall(call) => {
            for arg in &call.args {
                collect_traversals(arg, out);
            }
        }
        _ => {}
    }
}

fn prefix_str(root: &str, operators: &[TraversalOperator]) -> String {
    let mut out = root.to_string();
    for op in operators {
        match op {
            TraversalOperator::GetAttr(name) => {
                out.push('.');
                out.push_str(name.as_str());
            }
            TraversalOperator::Index(expr) => {
                out.push('[');
                match expr {
                    Expression::Number(n) => out.push_str(&n.to_string()),
                    Expression::String(s) => out.push_str(&format!("{s:?}")),
                    Expression::Bool(b) => out.push_str(&b.to_string()),
                    _ => out.push_str("..."),
                }
                out.push(']');
            }
            TraversalOperator::LegacyIndex(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
            TraversalOperator::AttrSplat => out.push_str(".*"),
            TraversalOperator::FullSplat => out.push_str("[*]"),
        }
    }
    out
}

/// Renders an HCL traversal compactly for display, e.g. `matrix.distro` or
/// `var.ports[0]`.
pub fn traversal_str(traversal: &Traversal) -> String {
    let root = match &traversal.expr {
        Expression::Variable(var) => var.as_str().to_string(),
        other => compact_expression_str(other),
    };
    prefix_str(&root, &traversal.operators)
}

fn compact_expression_str(expr: &Expression) -> String {
    match expr {
        Expression::String(s) => format!("{s:?}"),
        Expression::Number(n) => n.to_string(),
        Expression::Bool(b) => b.to_string(),
        _ => "...".to_string(),
    }
}

/// Produces a compact, single-line summary of a value for display in
/// diagnostics: primitives verbatim, strings quoted, collections and objects
/// summarized by size.
pub fn compact_value_str(val: &Value) -> String {
    match val {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Array(items) => match items.len() {
            0 => "empty tuple".to_string(),
            1 => "tuple with 1 element".to_string(),
            n => format!("tuple with {n} elements"),
        },
        Value::Object(attrs) => match attrs.len() {
            0 => "object with no attributes".to_string(),
            1 => {
                let name = attrs.keys().next().expect("one attribute");
                format!("object with 1 attribute {name:?}")
            }
            n => format!("object with {n} attributes"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "module \"backend\" {\n  source = \"./mods/backend\"\n}\n\nscenario \"basic\" {\n  step \"first\" {\n    module = module.not_real\n  }\n}\n";

    fn sources() -> SourceFiles {
        let mut files = SourceFiles::new();
        files.add("plan.hcl", SOURCE);
        files
    }

    #[test]
    fn pos_at_maps_lines_and_columns() {
        let files = sources();
        let pos = files.pos_at("plan.hcl", 0);
        assert_eq!((pos.line, pos.column, pos.byte), (1, 1, 0));

        let offset = SOURCE.find("source").unwrap();
        let pos = files.pos_at("plan.hcl", offset);
        assert_eq!((pos.line, pos.column), (2, 3));
    }

    #[test]
    fn snippet_covers_highlight_and_clamps_offsets() {
        let files = sources();
        let start = SOURCE.find("module.not_real").unwrap();
        let span = start..start + "module.not_real".len();

        let diag = files.attach_snippet(
            Diagnostic::error("unknown module"),
            "plan.hcl",
            &span,
            None,
        );

        let range = diag.range.as_ref().unwrap();
        assert_eq!(range.start.line, 7);

        let snippet = diag.snippet.as_ref().unwrap();
        assert_eq!(snippet.code, "    module = module.not_real");
        assert_eq!(snippet.start_line, 7);
        assert_eq!(
            &snippet.code[snippet.highlight_start_offset..snippet.highlight_end_offset],
            "module.not_real"
        );
        assert!(snippet.highlight_end_offset >= snippet.highlight_start_offset);
        assert!(snippet.highlight_end_offset <= snippet.code.len());
    }

    #[test]
    fn snippet_context_names_enclosing_block() {
        let files = sources();
        let start = SOURCE.find("module.not_real").unwrap();
        let span = start..start + 6;

        let diag =
            files.attach_snippet(Diagnostic::error("unknown module"), "plan.hcl", &span, None);
        let snippet = diag.snippet.unwrap();
        assert_eq!(snippet.context.as_deref(), Some("step \"first\""));
    }

    #[test]
    fn empty_highlight_is_widened() {
        let files = sources();
        let span = 0..0;
        let diag = files.attach_snippet(Diagnostic::error("boom"), "plan.hcl", &span, None);
        let snippet = diag.snippet.unwrap();
        assert!(snippet.highlight_end_offset > snippet.highlight_start_offset);
    }

    #[test]
    fn compact_values() {
        assert_eq!(compact_value_str(&Value::Null), "null");
        assert_eq!(compact_value_str(&Value::Bool(true)), "true");
        assert_eq!(
            compact_value_str(&Value::String("postgres".into())),
            "\"postgres\""
        );
        assert_eq!(compact_value_str(&Value::Array(Vec::new())), "empty tuple");
        assert_eq!(
            compact_value_str(&Value::Array(vec![Value::Null, Value::Null])),
            "tuple with 2 elements"
        );

        let mut attrs = hcl::value::Map::new();
        attrs.insert("driver".to_string(), Value::from("postgres"));
        assert_eq!(
            compact_value_str(&Value::Object(attrs)),
            "object with 1 attribute \"driver\""
        );
    }

    #[test]
    fn expression_values_walk_prefixes_and_sort() {
        let mut vector = hcl::value::Map::new();
        vector.insert("distro".to_string(), Value::from("ubuntu"));

        let mut ctx = Context::new();
        ctx.declare_var("matrix", Value::Object(vector));

        let body = hcl::parse("x = matrix.distro\n").unwrap();
        let attr = body.attributes().next().unwrap();

        let values = expression_values(&attr.expr, &ctx);
        assert!(!values.is_empty());
        assert_eq!(values[0].traversal, "matrix.distro");
        assert_eq!(values[0].statement, "is \"ubuntu\"");
    }

    #[test]
    fn expression_values_fall_back_to_shorter_prefixes() {
        let mut vector = hcl::value::Map::new();
        vector.insert("distro".to_string(), Value::from("ubuntu"));

        let mut ctx = Context::new();
        ctx.declare_var("matrix", Value::Object(vector));

        // `matrix.nope` fails to evaluate; the root still annotates.
        let body = hcl::parse("x = matrix.nope\n").unwrap();
        let attr = body.attributes().next().unwrap();

        let values = expression_values(&attr.expr, &ctx);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].traversal, "matrix");
        assert_eq!(values[0].statement, "is object with 1 attribute \"distro\"");
    }
}
