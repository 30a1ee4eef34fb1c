//! The `sample` block decoder and the sample framer.
//!
//! A sample is a named collection of subsets over the expanded scenario
//! space. Framing filters the subsets, matches each one against the decoded
//! flight plan and materializes a per-subset view for downstream sampling.

use std::collections::BTreeMap;
use std::fmt;

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles, compact_value_str};

use crate::filter::ScenarioFilter;
use crate::flightplan::FlightPlan;
use crate::ident::verify_block_labels;
use crate::matrix::{Matrix, decode_matrix};
use crate::schema::{
    BlockSchema, attr_value_span, block_type_span, blocks_of_type, eval_error_diag, evaluate,
    get_attr, label_span,
};
use crate::scope::EvalScope;

const SAMPLE_SCHEMA: BlockSchema = BlockSchema {
    attrs: &["attributes"],
    blocks: &["subset"],
};

const SUBSET_SCHEMA: BlockSchema = BlockSchema {
    attrs: &["scenario_name", "scenario_filter", "attributes"],
    blocks: &["matrix"],
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub name: String,
    pub attributes: Option<Value>,
    pub subsets: Vec<SampleSubset>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSubset {
    pub name: String,
    pub scenario_name: Option<String>,
    pub scenario_filter: Option<String>,
    pub attributes: Option<Value>,
    pub matrix: Option<Matrix>,
}

/// Narrowing applied when framing a sample: keep only the named subsets
/// (in the given order), then drop the excluded ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleFilter {
    pub subsets: Vec<String>,
    pub exclude_subsets: Vec<String>,
}

impl fmt::Display for SampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<String> = self.subsets.clone();
        tokens.extend(self.exclude_subsets.iter().map(|s| format!("!{s}")));
        f.write_str(&tokens.join(" "))
    }
}

/// A materialized per-subset view: the scenarios the subset matched and the
/// attributes pre-bound for them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSubsetFrame {
    pub sample_name: String,
    pub subset_name: String,
    pub scenario_filter: ScenarioFilter,
    pub scenarios: Vec<String>,
    pub matrix: Option<Matrix>,
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleFrame {
    pub sample: Sample,
    pub filter: SampleFilter,
    pub subset_frames: BTreeMap<String, SampleSubsetFrame>,
}

impl Sample {
    pub(crate) fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("sample blocks require a name label");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return (None, diags);
        };

        diags.extend(SAMPLE_SCHEMA.verify(block, sources, filename, false));

        let ctx = scope.context();
        let mut sample = Sample {
            name: name.to_string(),
            ..Sample::default()
        };

        if let Some(attr) = get_attr(&block.body, "attributes") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::Null) => {}
                Ok(value @ Value::Object(_)) => sample.attributes = Some(value),
                Ok(other) => {
                    let diag = Diagnostic::error("sample attributes must be an object or map")
                        .with_detail(format!(
                            "cannot iterate elements of {}",
                            compact_value_str(&other)
                        ));
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                    return (None, diags);
                }
            }
        }

        let mut seen: Vec<String> = Vec::new();
        for subset_block in blocks_of_type(&block.body, "subset") {
            let (subset, subset_diags) =
                SampleSubset::decode(subset_block, scope, sources, filename);
            diags.extend(subset_diags);
            let Some(subset) = subset else {
                continue;
            };

            if seen.contains(&subset.name) {
                let diag = Diagnostic::error(format!(
                    "a subset named {:?} has already been declared",
                    subset.name
                ))
                .with_detail("subset names must be unique within a sample");
                let span = subset_block
                    .labels
                    .first()
                    .map(label_span)
                    .unwrap_or_else(|| block_type_span(subset_block));
                diags.push(sources.attach_snippet(diag, filename, &span, None));
                continue;
            }

            seen.push(subset.name.clone());
            sample.subsets.push(subset);
        }

        if sample.subsets.is_empty() {
            let diag = Diagnostic::error("sample does not contain any defined subsets")
                .with_detail("a sample must contain one or more subsets");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return (None, diags);
        }

        (Some(sample), diags)
    }

    /// Frames the sample against a decoded flight plan.
    pub fn frame(
        &self,
        plan: &FlightPlan,
        filter: &SampleFilter,
    ) -> (Option<SampleFrame>, Diagnostics) {
        let mut diags = Diagnostics::new();

        let subsets = self.filter_subsets(filter);
        if subsets.is_empty() {
            diags.push(Diagnostic::error(format!(
                "no subsets matched the given filter: {filter}"
            )));
            return (None, diags);
        }

        let mut frame = SampleFrame {
            sample: self.clone(),
            filter: filter.clone(),
            subset_frames: BTreeMap::new(),
        };

        for subset in subsets {
            let (subset_frame, frame_diags) = subset.frame(self, plan);
            diags.extend(frame_diags);
            let Some(subset_frame) = subset_frame else {
                continue;
            };
            frame
                .subset_frames
                .insert(subset.name.clone(), subset_frame);
        }

        if frame.subset_frames.is_empty() {
            return (None, diags);
        }

        (Some(frame), diags)
    }

    fn filter_subsets(&self, filter: &SampleFilter) -> Vec<&SampleSubset> {
        let mut subsets: Vec<&SampleSubset> = if filter.subsets.is_empty() {
            self.subsets.iter().collect()
        } else {
            filter
                .subsets
                .iter()
                .filter_map(|name| self.subsets.iter().find(|s| &s.name == name))
                .collect()
        };

        subsets.retain(|s| !filter.exclude_subsets.contains(&s.name));
        subsets
    }
}

impl SampleSubset {
    fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("subset blocks require a name label");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return (None, diags);
        };

        diags.extend(SUBSET_SCHEMA.verify(block, sources, filename, false));

        let ctx = scope.context();
        let mut subset = SampleSubset {
            name: name.to_string(),
            ..SampleSubset::default()
        };

        for (attr_name, target) in [
            ("scenario_name", &mut subset.scenario_name),
            ("scenario_filter", &mut subset.scenario_filter),
        ] {
            let Some(attr) = get_attr(&block.body, attr_name) else {
                continue;
            };
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(s)) => *target = Some(s),
                Ok(_) => {
                    let diag =
                        Diagnostic::error(format!("subset {attr_name} must be a string"));
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        // Malformed filters are decode-time errors, not framing surprises.
        if let Some(filter) = &subset.scenario_filter {
            if let Err(err) = ScenarioFilter::parse(filter) {
                let diag = Diagnostic::error("invalid subset scenario_filter")
                    .with_detail(err.to_string());
                let span = get_attr(&block.body, "scenario_filter")
                    .map(attr_value_span)
                    .unwrap_or_else(|| block_type_span(block));
                diags.push(sources.attach_snippet(diag, filename, &span, None));
                return (None, diags);
            }
        }

        if let Some(attr) = get_attr(&block.body, "attributes") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::Null) => {}
                Ok(value @ Value::Object(_)) => subset.attributes = Some(value),
                Ok(other) => {
                    let diag = Diagnostic::error("subset attributes must be an object or map")
                        .with_detail(format!(
                            "cannot iterate elements of {}",
                            compact_value_str(&other)
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

        let (matrix, matrix_diags) = decode_matrix(block, scope, sources, filename);
        diags.extend(matrix_diags);
        subset.matrix = matrix;

        (Some(subset), diags)
    }

    /// The scenario filter this subset selects with: an explicit
    /// `scenario_filter`, defaulting its name constraint to the subset's
    /// target scenario.
    pub fn filter(&self) -> ScenarioFilter {
        let target = self
            .scenario_name
            .clone()
            .unwrap_or_else(|| self.name.clone());

        match &self.scenario_filter {
            Some(raw) => match ScenarioFilter::parse(raw) {
                Ok(parsed) if parsed.name().is_some() => parsed,
                Ok(parsed) => ScenarioFilter::new(
                    Some(target),
                    parsed.includes().to_vec(),
                    parsed.excludes().to_vec(),
                ),
                // Rejected during decode; unreachable from a decoded subset.
                Err(_) => ScenarioFilter::for_name(target),
            },
            None => ScenarioFilter::for_name(target),
        }
    }

    fn frame(
        &self,
        sample: &Sample,
        plan: &FlightPlan,
    ) -> (Option<SampleSubsetFrame>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let filter = self.filter();

        let mut scenarios = Vec::new();
        let mut matrix = Matrix::default();
        for scenario in plan.scenarios() {
            if !filter.matches(&scenario.name, scenario.variants.as_ref()) {
                continue;
            }
            if let (Some(subset_matrix), Some(variants)) = (&self.matrix, &scenario.variants) {
                let matched = subset_matrix
                    .vectors()
                    .iter()
                    .any(|sv| variants.contains_unordered(sv));
                if !matched {
                    continue;
                }
            }
            scenarios.push(scenario.to_string());
            if let Some(variants) = &scenario.variants {
                matrix.add_vector(variants.clone());
            }
        }

        if scenarios.is_empty() {
            diags.push(Diagnostic::warning(format!(
                "subset {:?} matched no scenarios",
                self.name
            )));
            return (None, diags);
        }

        let mut attributes = Map::new();
        for source in [&sample.attributes, &self.attributes] {
            if let Some(Value::Object(map)) = source {
                for (key, value) in map {
                    attributes.insert(key.clone(), value.clone());
                }
            }
        }

        let matrix = (!matrix.is_empty()).then(|| matrix.unique_values());
        (
            Some(SampleSubsetFrame {
                sample_name: sample.name.clone(),
                subset_name: self.name.clone(),
                scenario_filter: filter,
                scenarios,
                matrix,
                attributes,
            }),
            diags,
        )
    }
}
