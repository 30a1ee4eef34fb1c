//! The `step` block decoder.

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};

use crate::ident::verify_block_labels;
use crate::module::Module;
use crate::schema::{
    BlockSchema, attr_value_span, block_type_span, evaluate, get_attr, missing_attr_diag,
    to_expression,
};
use crate::scope::EvalScope;

const SCHEMA: BlockSchema = BlockSchema {
    attrs: &["module", "variables"],
    blocks: &[],
};

/// Names with engine-level meaning that user variables may never shadow.
const RESERVED_META_ARGS: &[&str] = &["count", "for_each", "depends_on"];

/// An ordered scenario step. The step holds a bound copy of its source
/// module, with step variables overriding the module's inputs, so mutating a
/// step never touches the module entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioStep {
    pub name: String,
    pub module: Module,
    pub variables: Map<String, Value>,
}

impl ScenarioStep {
    pub(crate) fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("step blocks require a name label");
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
        let mut step = ScenarioStep {
            name: name.to_string(),
            ..ScenarioStep::default()
        };

        let Some(attr) = get_attr(&block.body, "module") else {
            diags.push(missing_attr_diag(block, "module", sources, filename));
            return (None, diags);
        };

        let expr = to_expression(&attr.value);
        let Some(module_name) = single_level_module_reference(&expr) else {
            let diag = Diagnostic::error("step module must be a module reference")
                .with_detail("declare the step module as `module = module.<name>`");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &attr_value_span(attr),
                None,
            ));
            return (None, diags);
        };

        match evaluate(&attr.value, &ctx) {
            Err(_) => {
                let diag = Diagnostic::error(format!("unknown module module.{module_name}"))
                    .with_detail(format!(
                        "module.{module_name} does not reference a module declared in this \
                         flight plan"
                    ));
                diags.push(sources.attach_snippet_with_values(
                    diag,
                    filename,
                    &attr_value_span(attr),
                    None,
                    &expr,
                    &ctx,
                ));
                return (None, diags);
            }
            Ok(Value::Object(map)) => step.module = Module::from_flattened(&module_name, &map),
            Ok(_) => {
                let diag = Diagnostic::error(format!("unknown module module.{module_name}"));
                diags.push(sources.attach_snippet(
                    diag,
                    filename,
                    &attr_value_span(attr),
                    None,
                ));
                return (None, diags);
            }
        }

        if let Some(attr) = get_attr(&block.body, "variables") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(crate::schema::eval_error_diag(
                    &err, attr, sources, filename, &ctx,
                )),
                Ok(Value::Object(map)) => {
                    for (key, value) in map {
                        if RESERVED_META_ARGS.contains(&key.as_str()) {
                            let diag = Diagnostic::error(format!(
                                "variables cannot use the reserved meta-argument {key:?}"
                            ))
                            .with_detail(format!(
                                "{key:?} has engine-level meaning and cannot be passed as a \
                                 step variable"
                            ));
                            diags.push(sources.attach_snippet(
                                diag,
                                filename,
                                &attr_value_span(attr),
                                None,
                            ));
                            continue;
                        }
                        // The bound module copy sees the override too.
                        step.module.attrs.insert(key.clone(), value.clone());
                        step.variables.insert(key, value);
                    }
                }
                Ok(_) => {
                    let diag = Diagnostic::error("step variables must be an object");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        (Some(step), diags)
    }
}

/// Accepts exactly `module.<name>`: a traversal rooted at the `module`
/// namespace with a single attribute access.
fn single_level_module_reference(expr: &hcl::Expression) -> Option<String> {
    let hcl::Expression::Traversal(traversal) = expr else {
        return None;
    };
    let hcl::Expression::Variable(root) = &traversal.expr else {
        return None;
    };
    if root.as_str() != "module" {
        return None;
    }
    match traversal.operators.as_slice() {
        [hcl::expr::TraversalOperator::GetAttr(name)] => Some(name.as_str().to_string()),
        _ => None,
    }
}
