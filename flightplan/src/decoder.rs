//! The scenario expander and decode orchestrator.
//!
//! Callers pick a [`DecodeTarget`] and the engine stops at that level. Per
//! scenario block the expander decodes the matrix, applies the active
//! scenario filter, then expands one scenario per surviving vector, either
//! serially or fanned out across blocking workers when vector counts cross
//! the concurrency thresholds.

use std::sync::Arc;

use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::filter::ScenarioFilter;
use crate::ident::verify_block_labels;
use crate::matrix::{Matrix, Vector, decode_matrix};
use crate::scenario::Scenario;
use crate::schema::first_label;
use crate::scope::EvalScope;
use crate::terraform_cli::TerraformCli;

/// How deep the decoder descends. Levels are ordered; each one produces
/// everything the previous level does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecodeTarget {
    #[default]
    Unset,
    /// Scenario block names only.
    ScenariosNamesNoVariants,
    /// Plus the fully computed matrix per scenario block.
    ScenariosMatrixOnly,
    /// Plus one scenario per matrix vector, names only.
    ScenariosNamesExpandVariants,
    /// Plus full step decode per scenario.
    ScenariosComplete,
    /// Plus samples, CLIs and reference resolution.
    All,
}

/// Vector counts at which expansion moves onto the blocking worker pool.
/// Names-only expansion is cheap enough that fan-out only pays off for very
/// large matrices; full decode pays off much sooner.
const NAMES_CONCURRENCY_THRESHOLD: usize = 8_000;
const COMPLETE_CONCURRENCY_THRESHOLD: usize = 100;

/// A scenario block paired with the file it was parsed from.
#[derive(Clone, Debug)]
pub(crate) struct SourcedBlock {
    pub filename: String,
    pub block: Arc<Block>,
}

/// One decoded scenario block: its computed matrix, the scenarios expanded
/// from it and every diagnostic raised along the way.
#[derive(Clone, Debug)]
pub struct DecodedScenarioBlock {
    pub name: String,
    pub filename: String,
    pub matrix: Option<Matrix>,
    pub scenarios: Vec<Scenario>,
    pub diagnostics: Diagnostics,
    block: Arc<Block>,
}

#[derive(Clone, Debug, Default)]
pub struct DecodedScenarioBlocks(Vec<DecodedScenarioBlock>);

impl DecodedScenarioBlocks {
    pub fn iter(&self) -> std::slice::Iter<'_, DecodedScenarioBlock> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::concat(self.0.iter().map(|b| b.diagnostics.clone()))
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.0.iter().flat_map(|b| b.scenarios.iter())
    }

    /// The union of every block's matrix, deduplicated by value.
    pub fn combined_matrix(&self) -> Option<Matrix> {
        let mut combined: Option<Matrix> = None;
        for block in &self.0 {
            let Some(matrix) = &block.matrix else {
                continue;
            };
            match combined.as_mut() {
                None => combined = Some(matrix.clone()),
                Some(m) => {
                    for vector in matrix.vectors() {
                        m.add_vector(vector.clone());
                    }
                }
            }
        }
        combined.map(|m| m.unique_values())
    }
}

impl IntoIterator for DecodedScenarioBlocks {
    type Item = DecodedScenarioBlock;
    type IntoIter = std::vec::IntoIter<DecodedScenarioBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Decodes scenario blocks to a desired target level, applying the active
/// scenario filter as early as possible.
#[derive(Clone, Debug)]
pub struct ScenarioDecoder {
    target: DecodeTarget,
    filter: Option<ScenarioFilter>,
}

impl ScenarioDecoder {
    pub fn new(target: DecodeTarget, filter: Option<ScenarioFilter>) -> Result<Self, Error> {
        if target == DecodeTarget::Unset {
            return Err(Error::InvalidDecodeTarget("unset"));
        }
        Ok(Self { target, filter })
    }

    pub fn target(&self) -> DecodeTarget {
        self.target
    }

    pub(crate) async fn decode_scenario_blocks(
        &self,
        token: &CancellationToken,
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        clis: &Arc<Vec<TerraformCli>>,
        blocks: Vec<SourcedBlock>,
    ) -> DecodedScenarioBlocks {
        let mut scenario_blocks = self.filter_scenario_blocks(sources.as_ref(), blocks);

        for sb in &mut scenario_blocks {
            if self.target >= DecodeTarget::ScenariosMatrixOnly {
                let (matrix, diags) =
                    decode_matrix(&sb.block, scope, sources.as_ref(), &sb.filename);
                sb.diagnostics.extend(diags);
                sb.matrix = matrix;

                // The filter applies whenever one is set, even to
                // single-vector matrices.
                if let (Some(matrix), Some(filter)) = (&sb.matrix, &self.filter) {
                    let filtered = matrix.filter(filter);
                    let emptied = filtered.is_empty() && !matrix.is_empty();
                    sb.matrix = Some(filtered);
                    if emptied {
                        // Nothing survives the filter; no need to expand.
                        continue;
                    }
                }
            }

            if self.target < DecodeTarget::ScenariosNamesExpandVariants {
                continue;
            }
            if sb.diagnostics.has_errors() {
                // Matrix decode failed; do not advance this block to the
                // next level.
                continue;
            }

            let vector_count = sb.matrix.as_ref().map_or(0, Matrix::len);
            let concurrent = match self.target {
                DecodeTarget::ScenariosNamesExpandVariants => {
                    vector_count >= NAMES_CONCURRENCY_THRESHOLD
                }
                DecodeTarget::ScenariosComplete | DecodeTarget::All => {
                    vector_count >= COMPLETE_CONCURRENCY_THRESHOLD
                }
                _ => false,
            };

            debug!(
                block = %sb.name,
                vectors = vector_count,
                concurrent,
                "expanding scenario block"
            );

            if concurrent {
                self.decode_scenarios_concurrent(token, scope, sources, clis, sb)
                    .await;
            } else {
                self.decode_scenarios_serial(token, scope, sources.as_ref(), clis.as_slice(), sb);
            }

            // Serial and concurrent paths converge on the same deterministic
            // order.
            sb.scenarios
                .sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        }

        scenario_blocks.sort_by(|a, b| a.name.cmp(&b.name));
        DecodedScenarioBlocks(scenario_blocks)
    }

    /// Drops blocks the name constraint rejects and label-validates the
    /// rest.
    fn filter_scenario_blocks(
        &self,
        sources: &SourceFiles,
        blocks: Vec<SourcedBlock>,
    ) -> Vec<DecodedScenarioBlock> {
        let mut out = Vec::with_capacity(blocks.len());

        for sourced in blocks {
            let Some(name) = first_label(&sourced.block) else {
                let diag = Diagnostic::error("scenario blocks require a name label");
                out.push(DecodedScenarioBlock {
                    name: String::new(),
                    filename: sourced.filename.clone(),
                    matrix: None,
                    scenarios: Vec::new(),
                    diagnostics: sources
                        .attach_snippet(
                            diag,
                            &sourced.filename,
                            &crate::schema::block_type_span(&sourced.block),
                            None,
                        )
                        .into(),
                    block: sourced.block,
                });
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.matches_name(name) {
                    continue;
                }
            }

            out.push(DecodedScenarioBlock {
                name: name.to_string(),
                filename: sourced.filename.clone(),
                matrix: None,
                scenarios: Vec::new(),
                diagnostics: verify_block_labels(&sourced.block, sources, &sourced.filename),
                block: sourced.block,
            });
        }

        out
    }

    fn decode_scenarios_serial(
        &self,
        token: &CancellationToken,
        scope: &EvalScope,
        sources: &SourceFiles,
        clis: &[TerraformCli],
        sb: &mut DecodedScenarioBlock,
    ) {
        let vectors: Vec<Vector> = match &sb.matrix {
            Some(matrix) if !matrix.is_empty() => matrix.vectors().to_vec(),
            _ => {
                let (keep, scenario, diags) = decode_scenario(
                    None, &sb.block, scope, self.target, sources, &sb.filename, clis, &sb.name,
                );
                sb.diagnostics.extend(diags);
                if keep {
                    sb.scenarios.push(scenario);
                }
                return;
            }
        };

        for vector in &vectors {
            if token.is_cancelled() {
                sb.diagnostics.push(cancelled_diag(&sb.name));
                return;
            }
            let (keep, scenario, diags) = decode_scenario(
                Some(vector),
                &sb.block,
                scope,
                self.target,
                sources,
                &sb.filename,
                clis,
                &sb.name,
            );
            sb.diagnostics.extend(diags);
            if keep {
                sb.scenarios.push(scenario);
            }
        }
    }

    /// One blocking worker per vector; fan-in over a diagnostic stream and a
    /// scenario stream drained by a collector task. The collector terminates
    /// when every worker has finished and the channel senders close. Results
    /// arrive in completion order; the caller's final sort restores
    /// determinism.
    async fn decode_scenarios_concurrent(
        &self,
        token: &CancellationToken,
        scope: &EvalScope,
        sources: &Arc<SourceFiles>,
        clis: &Arc<Vec<TerraformCli>>,
        sb: &mut DecodedScenarioBlock,
    ) {
        let vectors: Vec<Vector> = match &sb.matrix {
            Some(matrix) if !matrix.is_empty() => matrix.vectors().to_vec(),
            _ => {
                self.decode_scenarios_serial(token, scope, sources.as_ref(), clis.as_slice(), sb);
                return;
            }
        };

        let (diag_tx, mut diag_rx) = mpsc::unbounded_channel::<Diagnostics>();
        let (scenario_tx, mut scenario_rx) = mpsc::unbounded_channel::<Scenario>();

        let collector = tokio::spawn(async move {
            let mut scenarios = Vec::new();
            let mut diags = Diagnostics::new();
            let mut diags_open = true;
            let mut scenarios_open = true;
            while diags_open || scenarios_open {
                tokio::select! {
                    received = diag_rx.recv(), if diags_open => match received {
                        Some(received) => diags.extend(received),
                        None => diags_open = false,
                    },
                    received = scenario_rx.recv(), if scenarios_open => match received {
                        Some(received) => scenarios.push(received),
                        None => scenarios_open = false,
                    },
                }
            }
            (scenarios, diags)
        });

        let mut workers = Vec::with_capacity(vectors.len());
        for vector in vectors {
            let token = token.clone();
            let scope = scope.clone();
            let sources = Arc::clone(sources);
            let clis = Arc::clone(clis);
            let block = Arc::clone(&sb.block);
            let filename = sb.filename.clone();
            let name = sb.name.clone();
            let target = self.target;
            let diag_tx = diag_tx.clone();
            let scenario_tx = scenario_tx.clone();

            workers.push(tokio::task::spawn_blocking(move || {
                // Abandon in-flight work promptly on cancellation.
                if token.is_cancelled() {
                    return;
                }
                let (keep, scenario, diags) = decode_scenario(
                    Some(&vector),
                    &block,
                    &scope,
                    target,
                    &sources,
                    &filename,
                    &clis,
                    &name,
                );
                let _ = diag_tx.send(diags);
                if keep {
                    let _ = scenario_tx.send(scenario);
                }
            }));
        }

        // Dropping our sender halves lets the collector observe completion
        // once every worker is done.
        drop(diag_tx);
        drop(scenario_tx);

        // All workers must join before return, even when cancelled: the
        // collector keeps draining so no message is stranded.
        futures::future::join_all(workers).await;

        match collector.await {
            Ok((scenarios, diags)) => {
                sb.scenarios.extend(scenarios);
                sb.diagnostics.extend(diags);
            }
            Err(_) => {
                sb.diagnostics
                    .push(Diagnostic::error("scenario decode collector failed"));
            }
        }

        if token.is_cancelled() {
            sb.diagnostics.push(cancelled_diag(&sb.name));
        }
    }
}

fn cancelled_diag(block_name: &str) -> Diagnostic {
    Diagnostic::error("scenario decoding was cancelled").with_detail(format!(
        "decoding of scenario block {block_name:?} was interrupted before every variant was \
         expanded"
    ))
}

/// Decodes one scenario, constructing a child scope with the `matrix`
/// variable bound to the vector's value when expanding a variant.
#[allow(clippy::too_many_arguments)]
fn decode_scenario(
    vector: Option<&Vector>,
    block: &Block,
    scope: &EvalScope,
    target: DecodeTarget,
    sources: &SourceFiles,
    filename: &str,
    clis: &[TerraformCli],
    name: &str,
) -> (bool, Scenario, Diagnostics) {
    let mut scenario = Scenario::new(name);

    let child_scope;
    let scope = match vector {
        Some(vector) => {
            scenario.variants = Some(vector.clone());
            child_scope = scope.child_with("matrix", vector.value());
            &child_scope
        }
        None => scope,
    };

    let diags = scenario.decode(block, scope, target, sources, filename, clis);
    (!diags.has_errors(), scenario, diags)
}
