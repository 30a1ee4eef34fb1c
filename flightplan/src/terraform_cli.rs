//! The `terraform_cli` block decoder.

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};

use crate::ident::verify_block_labels;
use crate::schema::{
    BlockSchema, attr_value_span, block_type_span, eval_error_diag, evaluate, get_attr,
};
use crate::scope::EvalScope;

const SCHEMA: BlockSchema = BlockSchema {
    attrs: &["path", "env"],
    blocks: &[],
};

pub const DEFAULT_CLI_NAME: &str = "terraform";

/// A named external-engine binary and the environment it runs with.
#[derive(Clone, Debug, PartialEq)]
pub struct TerraformCli {
    pub name: String,
    pub path: String,
    pub env: Map<String, String>,
}

impl Default for TerraformCli {
    /// The implicit `terraform` CLI resolved from `$PATH`, present in every
    /// flight plan unless overridden by a declaration of the same name.
    fn default() -> Self {
        Self {
            name: DEFAULT_CLI_NAME.to_string(),
            path: DEFAULT_CLI_NAME.to_string(),
            env: Map::new(),
        }
    }
}

impl TerraformCli {
    pub(crate) fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("terraform_cli blocks require a name label");
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
        let mut cli = TerraformCli {
            name: name.to_string(),
            ..TerraformCli::default()
        };

        if let Some(attr) = get_attr(&block.body, "path") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(path)) if !path.is_empty() => cli.path = path,
                Ok(_) => {
                    let diag =
                        Diagnostic::error("terraform_cli path must be a non-empty string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        if let Some(attr) = get_attr(&block.body, "env") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::Object(map)) => {
                    for (key, value) in map {
                        match value {
                            Value::String(s) => {
                                cli.env.insert(key, s);
                            }
                            other => {
                                let diag = Diagnostic::error(
                                    "terraform_cli env values must be strings",
                                )
                                .with_detail(format!(
                                    "env var {key:?} is {}",
                                    peregrine_diagnostics::compact_value_str(&other)
                                ));
                                diags.push(sources.attach_snippet(
                                    diag,
                                    filename,
                                    &attr_value_span(attr),
                                    None,
                                ));
                            }
                        }
                    }
                }
                Ok(_) => {
                    let diag = Diagnostic::error("terraform_cli env must be an object");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        (Some(cli), diags)
    }
}
