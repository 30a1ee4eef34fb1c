//! Identifier rules shared by every labeled block.

use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};

use crate::schema::{block_type_span, label_span, label_str};

/// `[A-Za-z_][A-Za-z0-9_-]*`
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validates every label of a block against identifier rules, reporting with
/// the block's type range as the subject.
pub(crate) fn verify_block_labels(
    block: &Block,
    sources: &SourceFiles,
    filename: &str,
) -> Diagnostics {
    let mut diags = Diagnostics::new();

    for label in &block.labels {
        let name = label_str(label);
        if is_valid_identifier(name) {
            continue;
        }

        let diag = Diagnostic::error(format!("invalid {} name", block.ident.as_str()))
            .with_detail(format!(
                "block label {name:?} is not a valid identifier; identifiers start with a letter \
                 or underscore and contain only letters, digits, underscores and dashes"
            ));
        diags.push(sources.attach_snippet(
            diag,
            filename,
            &label_span(label),
            Some(&block_type_span(block)),
        ));
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("backend"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("front-end_2"));

        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("hascolon:"));
        assert!(!is_valid_identifier("dotted.name"));
        assert!(!is_valid_identifier("-leading-dash"));
    }
}
