//! The `scenario` block and its body decoder.

use std::fmt;

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};
use sha2::{Digest as _, Sha256};

use crate::decoder::DecodeTarget;
use crate::ident::verify_block_labels;
use crate::matrix::Vector;
use crate::schema::{
    BlockSchema, attr_value_span, attributes, block_type_span, blocks_of_type, eval_error_diag,
    evaluate, get_attr, label_span, missing_attr_diag,
};
use crate::scope::EvalScope;
use crate::step::ScenarioStep;
use crate::terraform_cli::{DEFAULT_CLI_NAME, TerraformCli};

const SCHEMA: BlockSchema = BlockSchema {
    attrs: &["description", "terraform_cli", "providers"],
    blocks: &["step", "matrix", "locals", "output"],
};

const OUTPUT_SCHEMA: BlockSchema = BlockSchema {
    attrs: &["description", "sensitive", "value"],
    blocks: &[],
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioOutput {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: bool,
    pub value: Value,
}

/// A named, parameterized, ordered sequence of steps against the external
/// engine. One scenario exists per (scenario block, matrix vector).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub variants: Option<Vector>,
    pub terraform_cli: TerraformCli,
    pub steps: Vec<ScenarioStep>,
    pub outputs: Vec<ScenarioOutput>,
    pub providers: Option<Value>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The stable identity used on disk: lowercase-hex SHA-256 of the
    /// canonical string form.
    pub fn uid(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Decodes the scenario body against `scope` at the requested target
    /// depth. Name and variants are set by the expander before this runs.
    pub(crate) fn decode(
        &mut self,
        block: &Block,
        scope: &EvalScope,
        target: DecodeTarget,
        sources: &SourceFiles,
        filename: &str,
        clis: &[TerraformCli],
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();

        if target < DecodeTarget::ScenariosComplete {
            return diags;
        }

        diags.extend(SCHEMA.verify(block, sources, filename, false));

        let ctx = scope.context();

        if let Some(attr) = get_attr(&block.body, "description") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(description)) => self.description = Some(description),
                Ok(_) => {
                    let diag = Diagnostic::error("scenario description must be a string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        match get_attr(&block.body, "terraform_cli") {
            None => {
                self.terraform_cli = clis
                    .iter()
                    .find(|cli| cli.name == DEFAULT_CLI_NAME)
                    .cloned()
                    .unwrap_or_default();
            }
            Some(attr) => match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(name)) => match clis.iter().find(|cli| cli.name == name) {
                    Some(cli) => self.terraform_cli = cli.clone(),
                    None => {
                        let diag =
                            Diagnostic::error(format!("unknown terraform_cli {name:?}"))
                                .with_detail(format!(
                                    "{name:?} does not reference a terraform_cli declared in \
                                     this flight plan"
                                ));
                        diags.push(sources.attach_snippet(
                            diag,
                            filename,
                            &attr_value_span(attr),
                            None,
                        ));
                    }
                },
                Ok(_) => {
                    let diag =
                        Diagnostic::error("scenario terraform_cli must be a name string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            },
        }

        if let Some(attr) = get_attr(&block.body, "providers") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(value) => self.providers = Some(value),
            }
        }

        // Locals evaluate in declaration order; each binding is visible to
        // the ones after it and to step decoding.
        let mut local_scope = scope.clone();
        let mut locals = Map::new();
        for locals_block in blocks_of_type(&block.body, "locals") {
            for attr in attributes(&locals_block.body) {
                let local_ctx = local_scope.context();
                match evaluate(&attr.value, &local_ctx) {
                    Err(err) => {
                        diags.push(eval_error_diag(&err, attr, sources, filename, &local_ctx));
                    }
                    Ok(value) => {
                        locals.insert(attr.key.as_str().to_string(), value);
                        local_scope.declare("local", Value::Object(locals.clone()));
                    }
                }
            }
        }

        let mut seen_steps: Vec<String> = Vec::new();
        for step_block in blocks_of_type(&block.body, "step") {
            let (step, step_diags) =
                ScenarioStep::decode(step_block, &local_scope, sources, filename);
            diags.extend(step_diags);
            let Some(step) = step else {
                continue;
            };

            if seen_steps.contains(&step.name) {
                let diag = Diagnostic::error(format!(
                    "a step named {:?} has already been declared",
                    step.name
                ))
                .with_detail("step names must be unique within a scenario");
                let span = step_block
                    .labels
                    .first()
                    .map(label_span)
                    .unwrap_or_else(|| block_type_span(step_block));
                diags.push(sources.attach_snippet(diag, filename, &span, None));
                continue;
            }

            seen_steps.push(step.name.clone());
            self.steps.push(step);
        }

        if self.steps.is_empty() && !diags.has_errors() {
            let diag = Diagnostic::error("scenario has no steps")
                .with_detail("a scenario must declare one or more steps");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
        }

        for output_block in blocks_of_type(&block.body, "output") {
            diags.extend(self.decode_output(output_block, &local_scope, sources, filename));
        }

        diags
    }

    fn decode_output(
        &mut self,
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> Diagnostics {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("output blocks require a name label");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return diags;
        };

        diags.extend(OUTPUT_SCHEMA.verify(block, sources, filename, false));

        let ctx = scope.context();
        let mut output = ScenarioOutput {
            name: name.to_string(),
            ..ScenarioOutput::default()
        };

        if let Some(attr) = get_attr(&block.body, "description") {
            if let Ok(Value::String(description)) = evaluate(&attr.value, &ctx) {
                output.description = Some(description);
            }
        }
        if let Some(attr) = get_attr(&block.body, "sensitive") {
            if let Ok(Value::Bool(sensitive)) = evaluate(&attr.value, &ctx) {
                output.sensitive = sensitive;
            }
        }

        match get_attr(&block.body, "value") {
            None => {
                diags.push(missing_attr_diag(block, "value", sources, filename));
                return diags;
            }
            Some(attr) => match evaluate(&attr.value, &ctx) {
                Err(err) => {
                    diags.push(eval_error_diag(&err, attr, sources, filename, &ctx));
                    return diags;
                }
                Ok(value) => output.value = value,
            },
        }

        self.outputs.push(output);
        diags
    }
}

/// `"name [key1:v1 key2:v2 ...]"` with variant pairs sorted by key: the
/// canonical, stable identity used for sorting, equality and hash IDs.
impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(variants) = &self.variants {
            if !variants.is_empty() {
                write!(f, " {}", variants.sorted_by_key())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Element;

    fn with_variants(name: &str, pairs: &[(&str, &str)]) -> Scenario {
        let mut scenario = Scenario::new(name);
        scenario.variants = Some(
            pairs
                .iter()
                .map(|(k, v)| Element::new(*k, *v))
                .collect(),
        );
        scenario
    }

    #[test]
    fn string_form_sorts_variant_pairs_by_key() {
        let scenario = with_variants("test", &[("foo", "matrixbar"), ("bar", "one")]);
        assert_eq!(scenario.to_string(), "test [bar:one foo:matrixbar]");
    }

    #[test]
    fn string_form_without_variants_is_the_name() {
        assert_eq!(Scenario::new("basic").to_string(), "basic");
    }

    #[test]
    fn uid_is_sha256_of_string_form() {
        let scenario = with_variants("test", &[("foo", "matrixfoo")]);
        assert_eq!(scenario.to_string(), "test [foo:matrixfoo]");

        // Stable across runs and equal for equal string forms.
        let again = with_variants("test", &[("foo", "matrixfoo")]);
        assert_eq!(scenario.uid(), again.uid());
        assert_eq!(scenario.uid().len(), 64);
        assert!(scenario.uid().chars().all(|c| c.is_ascii_hexdigit()));

        let other = with_variants("test", &[("foo", "matrixbar")]);
        assert_ne!(scenario.uid(), other.uid());
    }
}
