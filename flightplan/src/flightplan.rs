//! The flight-plan root: top-level schema, multi-pass decoding and
//! reference resolution.
//!
//! Decoding is staged: engine CLIs, variables, globals and modules decode
//! first and are bound into the root evaluation scope under their
//! namespaces, then scenario blocks expand against that scope, then samples.
//! Decoders accumulate diagnostics and keep going so one pass surfaces every
//! problem.

use std::sync::Arc;

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::{Block, Body};
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::decoder::{
    DecodeTarget, DecodedScenarioBlocks, ScenarioDecoder, SourcedBlock,
};
use crate::filter::ScenarioFilter;
use crate::module::Module;
use crate::sample::{Sample, SampleFilter, SampleFrame};
use crate::scenario::Scenario;
use crate::schema::{
    attr_key_span, attributes, block_type_span, blocks, eval_error_diag, evaluate, label_span,
};
use crate::scope::EvalScope;
use crate::terraform_cli::{DEFAULT_CLI_NAME, TerraformCli};
use crate::variable::Variable;

const TOP_LEVEL_BLOCKS: &[&str] = &[
    "module",
    "variable",
    "scenario",
    "sample",
    "terraform_cli",
    "globals",
];

/// The root aggregate of one decode pass. Immutable after decoding
/// completes.
#[derive(Clone, Debug, Default)]
pub struct FlightPlan {
    pub modules: Vec<Module>,
    pub variables: Vec<Variable>,
    pub globals: Map<String, Value>,
    pub terraform_clis: Vec<TerraformCli>,
    pub samples: Vec<Sample>,
    pub scenario_blocks: DecodedScenarioBlocks,
}

impl FlightPlan {
    /// Every expanded scenario, ordered by block name then canonical
    /// scenario string.
    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenario_blocks.scenarios()
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn sample(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// Frames the named sample against this flight plan.
    pub fn sample_frame(
        &self,
        name: &str,
        filter: &SampleFilter,
    ) -> (Option<SampleFrame>, Diagnostics) {
        let Some(sample) = self.sample(name) else {
            return (
                None,
                Diagnostics::from(Diagnostic::error(format!(
                    "failed to find sample {name:?} in the flight plan"
                ))),
            );
        };
        sample.frame(self, filter)
    }
}

/// Decodes a [`FlightPlan`] from a set of sources at a target level.
#[derive(Clone, Debug)]
pub struct FlightPlanDecoder {
    target: DecodeTarget,
    filter: Option<ScenarioFilter>,
}

impl FlightPlanDecoder {
    pub fn new(target: DecodeTarget, filter: Option<ScenarioFilter>) -> Result<Self, Error> {
        // Target validation lives with the scenario decoder.
        ScenarioDecoder::new(target, None)?;
        Ok(Self { target, filter })
    }

    /// Runs the full decode pipeline. User-configuration problems surface as
    /// diagnostics next to the best-effort partial flight plan; an error
    /// diagnostic anywhere means the overall operation failed.
    pub async fn decode(
        &self,
        token: &CancellationToken,
        sources: SourceFiles,
    ) -> (FlightPlan, Diagnostics) {
        let sources = Arc::new(sources);
        let mut diags = Diagnostics::new();
        let mut plan = FlightPlan::default();
        let mut scope = EvalScope::new();

        let parsed = parse_files(&sources, &mut diags);

        let mut module_blocks = Vec::new();
        let mut variable_blocks = Vec::new();
        let mut scenario_blocks = Vec::new();
        let mut sample_blocks = Vec::new();
        let mut cli_blocks = Vec::new();
        let mut globals_blocks = Vec::new();

        for (filename, body) in &parsed {
            for attr in attributes(body) {
                let diag = Diagnostic::error("unexpected top-level argument").with_detail(
                    "only module, variable, scenario, sample, terraform_cli and globals blocks \
                     may appear at the top level",
                );
                diags.push(sources.attach_snippet(
                    diag,
                    filename,
                    &attr_key_span(attr),
                    None,
                ));
            }

            for block in blocks(body) {
                let sourced = SourcedBlock {
                    filename: filename.clone(),
                    block: Arc::new(block.clone()),
                };
                match block.ident.as_str() {
                    "module" => module_blocks.push(sourced),
                    "variable" => variable_blocks.push(sourced),
                    "scenario" => scenario_blocks.push(sourced),
                    "sample" => sample_blocks.push(sourced),
                    "terraform_cli" => cli_blocks.push(sourced),
                    "globals" => globals_blocks.push(sourced),
                    other => {
                        let diag = Diagnostic::error("unsupported block").with_detail(format!(
                            "a block of type {other:?} is not expected at the top level; \
                             expected one of {TOP_LEVEL_BLOCKS:?}",
                        ));
                        diags.push(sources.attach_snippet(
                            diag,
                            filename,
                            &block_type_span(block),
                            None,
                        ));
                    }
                }
            }
        }

        self.decode_terraform_clis(&cli_blocks, &scope, &sources, &mut plan, &mut diags);
        self.decode_variables(&variable_blocks, &scope, &sources, &mut plan, &mut diags);
        scope.declare("var", namespace_value(plan.variables.iter().map(|v| (v.name.clone(), v.value()))));

        self.decode_globals(&globals_blocks, &mut scope, &sources, &mut plan, &mut diags);

        self.decode_modules(&module_blocks, &scope, &sources, &mut plan, &mut diags);
        scope.declare(
            "module",
            namespace_value(plan.modules.iter().map(|m| (m.name.clone(), m.to_value()))),
        );

        debug!(
            modules = plan.modules.len(),
            variables = plan.variables.len(),
            scenario_blocks = scenario_blocks.len(),
            "decoded flight plan skeleton"
        );

        let clis = Arc::new(plan.terraform_clis.clone());
        let scenario_decoder = ScenarioDecoder::new(self.target, self.filter.clone())
            .expect("target was validated at construction");
        plan.scenario_blocks = scenario_decoder
            .decode_scenario_blocks(token, &scope, &sources, &clis, scenario_blocks)
            .await;
        diags.extend(plan.scenario_blocks.diagnostics());

        if let Some(filter) = &self.filter {
            let expanded = self.target >= DecodeTarget::ScenariosNamesExpandVariants;
            if expanded && !diags.has_errors() && plan.scenarios().next().is_none() {
                diags.push(Diagnostic::warning(format!(
                    "no scenarios matched the filter {:?}",
                    filter.to_string()
                )));
            }
        }

        if self.target >= DecodeTarget::All {
            self.decode_samples(&sample_blocks, &scope, &sources, &mut plan, &mut diags);
        }

        (plan, diags)
    }

    fn decode_terraform_clis(
        &self,
        blocks: &[SourcedBlock],
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        plan: &mut FlightPlan,
        diags: &mut Diagnostics,
    ) {
        for sourced in blocks {
            let (cli, cli_diags) =
                TerraformCli::decode(&sourced.block, scope, sources, &sourced.filename);
            diags.extend(cli_diags);
            let Some(cli) = cli else {
                continue;
            };
            if check_duplicate(
                "terraform_cli",
                &cli.name,
                plan.terraform_clis.iter().map(|c| c.name.as_str()),
                &sourced.block,
                sources,
                &sourced.filename,
                diags,
            ) {
                continue;
            }
            plan.terraform_clis.push(cli);
        }

        if !plan
            .terraform_clis
            .iter()
            .any(|cli| cli.name == DEFAULT_CLI_NAME)
        {
            plan.terraform_clis.push(TerraformCli::default());
        }
    }

    fn decode_variables(
        &self,
        blocks: &[SourcedBlock],
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        plan: &mut FlightPlan,
        diags: &mut Diagnostics,
    ) {
        for sourced in blocks {
            let (variable, var_diags) =
                Variable::decode(&sourced.block, scope, sources, &sourced.filename);
            diags.extend(var_diags);
            let Some(variable) = variable else {
                continue;
            };
            if check_duplicate(
                "variable",
                &variable.name,
                plan.variables.iter().map(|v| v.name.as_str()),
                &sourced.block,
                sources,
                &sourced.filename,
                diags,
            ) {
                continue;
            }
            plan.variables.push(variable);
        }
    }

    fn decode_globals(
        &self,
        blocks: &[SourcedBlock],
        scope: &mut EvalScope,
        sources: &Arc<SourceFiles>,
        plan: &mut FlightPlan,
        diags: &mut Diagnostics,
    ) {
        for sourced in blocks {
            for attr in attributes(&sourced.block.body) {
                let name = attr.key.as_str();
                if plan.globals.contains_key(name) {
                    let diag = Diagnostic::error(format!(
                        "a global named {name:?} has already been declared"
                    ));
                    diags.push(sources.attach_snippet(
                        diag,
                        &sourced.filename,
                        &attr_key_span(attr),
                        None,
                    ));
                    continue;
                }

                let ctx = scope.context();
                match evaluate(&attr.value, &ctx) {
                    Err(err) => diags.push(eval_error_diag(
                        &err,
                        attr,
                        sources,
                        &sourced.filename,
                        &ctx,
                    )),
                    Ok(value) => {
                        plan.globals.insert(name.to_string(), value);
                        // Later globals see the ones declared before them.
                        scope.declare("global", Value::Object(plan.globals.clone()));
                    }
                }
            }
        }
    }

    fn decode_modules(
        &self,
        blocks: &[SourcedBlock],
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        plan: &mut FlightPlan,
        diags: &mut Diagnostics,
    ) {
        for sourced in blocks {
            let (module, module_diags) =
                Module::decode(&sourced.block, scope, sources, &sourced.filename);
            diags.extend(module_diags);
            let Some(module) = module else {
                continue;
            };
            if check_duplicate(
                "module",
                &module.name,
                plan.modules.iter().map(|m| m.name.as_str()),
                &sourced.block,
                sources,
                &sourced.filename,
                diags,
            ) {
                continue;
            }
            plan.modules.push(module);
        }
    }

    fn decode_samples(
        &self,
        blocks: &[SourcedBlock],
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        plan: &mut FlightPlan,
        diags: &mut Diagnostics,
    ) {
        for sourced in blocks {
            let (sample, sample_diags) =
                Sample::decode(&sourced.block, scope, sources, &sourced.filename);
            diags.extend(sample_diags);
            let Some(sample) = sample else {
                continue;
            };
            if check_duplicate(
                "sample",
                &sample.name,
                plan.samples.iter().map(|s| s.name.as_str()),
                &sourced.block,
                sources,
                &sourced.filename,
                diags,
            ) {
                continue;
            }
            plan.samples.push(sample);
        }
    }
}

fn parse_files(sources: &SourceFiles, diags: &mut Diagnostics) -> Vec<(String, Body)> {
    let mut parsed = Vec::new();
    for (filename, source) in sources.iter() {
        match hcl_edit::parser::parse_body(source) {
            Ok(body) => parsed.push((filename.to_string(), body)),
            Err(err) => {
                // Syntax errors are fatal for this file only; siblings keep
                // decoding.
                diags.push(
                    Diagnostic::error(format!("failed to parse {filename}"))
                        .with_detail(err.to_string()),
                );
            }
        }
    }
    parsed
}

fn namespace_value<I: IntoIterator<Item = (String, Value)>>(entries: I) -> Value {
    let mut map = Map::new();
    for (name, value) in entries {
        map.insert(name, value);
    }
    Value::Object(map)
}

/// Duplicate declarations of the same kind and name are errors attached to
/// the second occurrence.
fn check_duplicate<'a>(
    kind: &str,
    name: &str,
    mut existing: impl Iterator<Item = &'a str>,
    block: &Block,
    sources: &SourceFiles,
    filename: &str,
    diags: &mut Diagnostics,
) -> bool {
    if !existing.any(|n| n == name) {
        return false;
    }

    let diag = Diagnostic::error(format!("a {kind} named {name:?} has already been declared"))
        .with_detail(format!("{kind} names must be unique within a flight plan"));
    let span = block
        .labels
        .first()
        .map(label_span)
        .unwrap_or_else(|| block_type_span(block));
    diags.push(sources.attach_snippet(diag, filename, &span, None));
    true
}
