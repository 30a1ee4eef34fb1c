//! Textual rendering of diagnostics.
//!
//! Output is a bordered block with the severity heading, an optional source
//! snippet with highlight underline and expression values, and word-wrapped
//! detail prose. Color and width are governed by [`UiSettings`].

use std::fmt::Write as _;

use crate::{Diagnostic, Diagnostics, Severity};

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DARK_GRAY: &str = "\x1b[90m";
const UNDERLINE: &str = "\x1b[4m";
const RESET: &str = "\x1b[0m";

/// Terminal presentation settings supplied by the UI collaborator.
#[derive(Clone, Copy, Debug, Default)]
pub struct UiSettings {
    /// Total width available; 0 disables wrapping.
    pub width: usize,
    pub use_color: bool,
}

impl UiSettings {
    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

/// Renders every diagnostic in order, one block per diagnostic.
pub fn diagnostics_to_string(diags: &Diagnostics, settings: &UiSettings) -> String {
    diags
        .iter()
        .map(|diag| diagnostic_to_string(diag, settings))
        .collect()
}

pub fn diagnostic_to_string(diag: &Diagnostic, settings: &UiSettings) -> String {
    let mut body = String::new();

    let (heading, rule_color) = match diag.severity {
        Severity::Error => (Some("Error: "), RED),
        Severity::Warning => (Some("Warning: "), YELLOW),
        Severity::Unknown => (None, ""),
    };

    match heading {
        Some(heading) => {
            let painted = if settings.use_color {
                format!("{BOLD}{rule_color}{heading}{RESET}")
            } else {
                heading.to_string()
            };
            body.push_str(&painted);
        }
        None => body.push('\n'),
    }

    // The summary is terse and may carry native error text, so it is never
    // wrapped.
    let _ = writeln!(body, "{}\n", settings.paint(BOLD, &diag.summary));

    append_source_snippet(&mut body, diag, settings);

    if !diag.detail.is_empty() {
        // Leave room for the left rule.
        let para_width = settings.width.saturating_sub(3);
        for line in diag.detail.split('\n') {
            if para_width > 0 && !line.starts_with(' ') {
                for wrapped in word_wrap(line, para_width) {
                    let _ = writeln!(body, "{wrapped}");
                }
            } else {
                let _ = writeln!(body, "{line}");
            }
        }
    }

    // Delimit the whole message visually with a left rule.
    let (rule_start, rule_line, rule_end) = match diag.severity {
        Severity::Unknown => (String::new(), String::new(), String::new()),
        _ => (
            settings.paint(rule_color, "\u{2577}"),
            format!("{} ", settings.paint(rule_color, "\u{2502}")),
            settings.paint(rule_color, "\u{2575}"),
        ),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{rule_start}");
    for line in body.lines() {
        let prefix = if line.is_empty() {
            rule_line.trim_end()
        } else {
            rule_line.as_str()
        };
        let _ = writeln!(out, "{prefix}{line}");
    }
    let _ = writeln!(out, "{rule_end}");
    out
}

fn append_source_snippet(buf: &mut String, diag: &Diagnostic, settings: &UiSettings) {
    let Some(range) = diag.range.as_ref() else {
        return;
    };

    let Some(snippet) = diag.snippet.as_ref() else {
        let _ = writeln!(
            buf,
            "  on {} line {}:\n  (source code not available)",
            range.filename, range.start.line
        );
        buf.push('\n');
        return;
    };

    let context = match snippet.context.as_deref() {
        Some(context) if !context.is_empty() => format!(", in {context}"),
        _ => String::new(),
    };
    let _ = writeln!(
        buf,
        "  on {} line {}{}:",
        range.filename, range.start.line, context
    );

    let code = snippet.code.as_str();
    let mut start = snippet.highlight_start_offset.min(code.len());
    let mut end = snippet.highlight_end_offset.min(code.len());
    // Only buggy snippets have an inverted range, but never crash on one.
    if end < start {
        end = (start + 1).min(code.len());
    }
    start = floor_char_boundary(code, start);
    end = floor_char_boundary(code, end);

    let highlighted = if settings.use_color {
        format!(
            "{}{UNDERLINE}{}{RESET}{}",
            &code[..start],
            &code[start..end],
            &code[end..]
        )
    } else {
        code.to_string()
    };

    for (i, line) in highlighted.split('\n').enumerate() {
        let _ = writeln!(buf, "{:4}: {line}", snippet.start_line + i);
    }

    if !snippet.values.is_empty() {
        let mut values = snippet.values.clone();
        values.sort_by(|a, b| a.traversal.cmp(&b.traversal));

        let _ = writeln!(
            buf,
            "    {}",
            settings.paint(DARK_GRAY, "\u{251c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}")
        );
        for value in &values {
            let _ = writeln!(
                buf,
                "    {} {} {}",
                settings.paint(DARK_GRAY, "\u{2502}"),
                settings.paint(BOLD, &value.traversal),
                value.statement
            );
        }
    }

    buf.push('\n');
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Greedy word wrap. Words longer than the width are kept whole on their own
/// line rather than broken.
fn word_wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split(' ') {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        if current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    lines.push(current);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExpressionValue, Pos, Range, Snippet};

    fn sample_diag() -> Diagnostic {
        Diagnostic::error("unknown module")
            .with_detail("module.not_real is not a declared module in this flight plan")
            .with_range(Range {
                filename: "plan.hcl".to_string(),
                start: Pos {
                    line: 7,
                    column: 14,
                    byte: 110,
                },
                end: Pos {
                    line: 7,
                    column: 29,
                    byte: 125,
                },
            })
            .with_snippet(Snippet {
                context: Some("step \"first\"".to_string()),
                code: "    module = module.not_real".to_string(),
                start_line: 7,
                highlight_start_offset: 13,
                highlight_end_offset: 28,
                values: vec![ExpressionValue {
                    traversal: "matrix.distro".to_string(),
                    statement: "is \"ubuntu\"".to_string(),
                }],
            })
    }

    #[test]
    fn renders_bordered_error_block() {
        let out = diagnostic_to_string(&sample_diag(), &UiSettings::default());
        let expected = "\u{2577}\n\
            \u{2502} Error: unknown module\n\
            \u{2502}\n\
            \u{2502}   on plan.hcl line 7, in step \"first\":\n\
            \u{2502}    7:     module = module.not_real\n\
            \u{2502}     \u{251c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\n\
            \u{2502}     \u{2502} matrix.distro is \"ubuntu\"\n\
            \u{2502}\n\
            \u{2502} module.not_real is not a declared module in this flight plan\n\
            \u{2575}\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn wraps_detail_but_not_preformatted_lines() {
        let diag = Diagnostic::error("boom")
            .with_detail("one two three four five six seven\n preformatted stays put");
        let settings = UiSettings {
            width: 18,
            use_color: false,
        };
        let out = diagnostic_to_string(&diag, &settings);

        assert!(out.contains("\u{2502} one two three\n"));
        assert!(out.contains("\u{2502}  preformatted stays put\n"));
    }

    #[test]
    fn warning_uses_warning_heading() {
        let diag = Diagnostic::warning("no scenarios matched");
        let out = diagnostic_to_string(&diag, &UiSettings::default());
        assert!(out.starts_with("\u{2577}\n\u{2502} Warning: no scenarios matched\n"));
    }

    #[test]
    fn color_underlines_highlight() {
        let settings = UiSettings {
            width: 0,
            use_color: true,
        };
        let out = diagnostic_to_string(&sample_diag(), &settings);
        assert!(out.contains("\x1b[4mmodule.not_real\x1b[0m"));
    }
}
