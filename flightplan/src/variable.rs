//! The `variable` block decoder.

use hcl::Value;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};

use crate::ident::verify_block_labels;
use crate::schema::{
    BlockSchema, attr_value_span, block_type_span, eval_error_diag, evaluate, get_attr,
};
use crate::scope::EvalScope;

const SCHEMA: BlockSchema = BlockSchema {
    attrs: &["description", "type", "default", "sensitive"],
    blocks: &[],
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Variable {
    pub name: String,
    pub description: Option<String>,
    /// The declared type expression, kept as source text. Type expressions
    /// are not value-evaluable and are not interpreted here.
    pub type_source: Option<String>,
    pub default: Option<Value>,
    pub sensitive: bool,
}

impl Variable {
    pub(crate) fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("variable blocks require a name label");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return (None, diags);
        };

        diags.extend(SCHEMA.verify(block, sources, filename, false));

        let ctx = scope.context();
        let mut variable = Variable {
            name: name.to_string(),
            ..Variable::default()
        };

        if let Some(attr) = get_attr(&block.body, "description") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(description)) => variable.description = Some(description),
                Ok(_) => {
                    let diag = Diagnostic::error("variable description must be a string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        if let Some(attr) = get_attr(&block.body, "type") {
            variable.type_source = Some(attr.value.to_string().trim().to_string());
        }

        if let Some(attr) = get_attr(&block.body, "default") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(value) => variable.default = Some(value),
            }
        }

        if let Some(attr) = get_attr(&block.body, "sensitive") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::Bool(sensitive)) => variable.sensitive = sensitive,
                Ok(_) => {
                    let diag = Diagnostic::error("variable sensitive must be a bool");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        (Some(variable), diags)
    }

    /// The value bound under the `var` namespace.
    pub fn value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}
