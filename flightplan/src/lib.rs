//! Flight-plan decoding and scenario expansion.
//!
//! A flight plan is the root aggregate decoded from a set of HCL sources:
//! reusable modules, variables, matrix-expanded scenarios, samples and
//! engine CLI declarations. The decoder is staged: callers pick a
//! [`DecodeTarget`] and the pipeline stops at that level.

mod decoder;
mod error;
mod filter;
mod flightplan;
mod ident;
mod matrix;
mod module;
mod sample;
mod scenario;
mod schema;
mod scope;
mod step;
mod terraform_cli;
mod variable;

#[cfg(test)]
mod tests;

pub use decoder::{
    DecodeTarget, DecodedScenarioBlock, DecodedScenarioBlocks, ScenarioDecoder,
};
pub use error::Error;
pub use filter::ScenarioFilter;
pub use flightplan::{FlightPlan, FlightPlanDecoder};
pub use matrix::{Element, Matrix, Vector};
pub use module::Module;
pub use sample::{Sample, SampleFilter, SampleFrame, SampleSubset, SampleSubsetFrame};
pub use scenario::{Scenario, ScenarioOutput};
pub use scope::EvalScope;
pub use step::ScenarioStep;
pub use terraform_cli::TerraformCli;
pub use variable::Variable;
