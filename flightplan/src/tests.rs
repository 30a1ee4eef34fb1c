//! End-to-end decode tests over in-memory sources.
//!
//! Diagnostics from the concurrent expander arrive in completion order, so
//! assertions over them match on content, never on inter-worker ordering.

use hcl::Value;
use peregrine_diagnostics::{Diagnostics, SourceFiles};
use tokio_util::sync::CancellationToken;

use crate::{
    DecodeTarget, FlightPlan, FlightPlanDecoder, SampleFilter, ScenarioFilter,
};

async fn decode_with(
    config: &str,
    target: DecodeTarget,
    filter: Option<&str>,
) -> (FlightPlan, Diagnostics) {
    let mut sources = SourceFiles::new();
    sources.add("plan.hcl", config);

    let filter = filter.map(|f| ScenarioFilter::parse(f).expect("test filter parses"));
    let decoder = FlightPlanDecoder::new(target, filter).expect("valid target");
    decoder.decode(&CancellationToken::new(), sources).await
}

async fn decode(config: &str) -> (FlightPlan, Diagnostics) {
    decode_with(config, DecodeTarget::All, None).await
}

fn diag_summaries(diags: &Diagnostics) -> Vec<&str> {
    diags.iter().map(|d| d.summary.as_str()).collect()
}

const BASIC: &str = r#"
module "backend" {
  source = "./mods/backend"

  driver = "postgres"
}

scenario "basic" {
  step "backend" {
    module = module.backend
  }
}
"#;

#[tokio::test]
async fn module_reference_resolves() {
    let (plan, diags) = decode(BASIC).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));
    assert!(diags.is_empty());

    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios.len(), 1);
    assert_eq!(scenarios[0].name, "basic");
    assert_eq!(scenarios[0].steps.len(), 1);

    let step = &scenarios[0].steps[0];
    assert_eq!(step.name, "backend");
    assert_eq!(step.module.name, "backend");
    assert_eq!(step.module.source, "./mods/backend");
    assert_eq!(
        step.module.attrs.get("driver"),
        Some(&Value::from("postgres"))
    );
}

#[tokio::test]
async fn unknown_module_reference_is_an_error() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "first" {
    module = module.not_real
  }
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary.contains("module.not_real")),
        "{:?}",
        diag_summaries(&diags)
    );
    assert_eq!(plan.scenarios().count(), 0);
}

#[tokio::test]
async fn unknown_module_diagnostic_carries_a_snippet() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "first" {
    module = module.not_real
  }
}
"#;
    let (_, diags) = decode(config).await;
    let diag = diags
        .iter()
        .find(|d| d.summary.contains("module.not_real"))
        .expect("unknown module diagnostic");

    let range = diag.range.as_ref().expect("range");
    assert_eq!(range.filename, "plan.hcl");
    assert_eq!(range.start.line, 8);

    let snippet = diag.snippet.as_ref().expect("snippet");
    assert!(snippet.code.contains("module.not_real"));
    assert!(snippet.highlight_end_offset >= snippet.highlight_start_offset);
    assert!(snippet.highlight_end_offset <= snippet.code.len());
    assert_eq!(snippet.context.as_deref(), Some("step \"first\""));

    // The `module` namespace itself evaluated, so the root annotates.
    assert!(
        snippet
            .values
            .iter()
            .any(|v| v.traversal == "module" && v.statement.starts_with("is object")),
        "{:?}",
        snippet.values
    );
}

#[tokio::test]
async fn reserved_meta_arg_in_variables_is_an_error() {
    for meta_arg in ["count = 1", "for_each = [\"1\", \"2\"]", "depends_on = \"x\""] {
        let config = format!(
            r#"
module "backend" {{
  source = "./mods/backend"
}}

scenario "basic" {{
  step "first" {{
    module = module.backend
    variables = {{
      {meta_arg}
    }}
  }}
}}
"#
        );
        let (plan, diags) = decode(&config).await;
        assert!(diags.has_errors(), "{meta_arg} should fail");
        assert!(
            diags
                .iter()
                .any(|d| d.summary.contains("reserved meta-argument")),
            "{:?}",
            diag_summaries(&diags)
        );
        assert_eq!(plan.scenarios().count(), 0);
    }
}

#[tokio::test]
async fn duplicate_step_name_is_an_error() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "first" {
    module = module.backend
  }

  step "first" {
    module = module.backend
  }
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(diags.has_errors());
    let diag = diags
        .iter()
        .find(|d| d.summary.contains("already been declared"))
        .expect("duplicate step diagnostic");
    // Attached to the second occurrence.
    assert_eq!(diag.range.as_ref().unwrap().start.line, 11);
    assert_eq!(plan.scenarios().count(), 0);
}

#[tokio::test]
async fn invalid_step_label_is_an_error() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "hascolon:" {
    module = module.backend
  }
}
"#;
    let (_, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary.contains("invalid step name")),
        "{:?}",
        diag_summaries(&diags)
    );
}

#[tokio::test]
async fn unknown_attrs_and_blocks_are_errors() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "first" {
    notanattr = "foo"
    module = module.backend
  }
}
"#;
    let (_, diags) = decode(config).await;
    assert!(diags.iter().any(|d| d.summary == "unsupported argument"));

    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  step "first" {
    notablock "something" {
      something = "else"
    }

    module = module.backend
  }
}
"#;
    let (_, diags) = decode(config).await;
    assert!(diags.iter().any(|d| d.summary == "unsupported block"));
}

const MATRIX: &str = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "test" {
  matrix {
    foo = ["matrixfoo", "matrixbar"]
  }

  step "backend" {
    module = module.backend

    variables = {
      flavor = matrix.foo
    }
  }
}
"#;

#[tokio::test]
async fn matrix_expands_one_scenario_per_vector() {
    let (plan, diags) = decode(MATRIX).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios.len(), 2);

    // Deterministically sorted by canonical string form.
    assert_eq!(scenarios[0].to_string(), "test [foo:matrixbar]");
    assert_eq!(scenarios[1].to_string(), "test [foo:matrixfoo]");

    assert_eq!(
        scenarios[0].uid(),
        "a87c127696d0a068036416ec03c249e7be20f850de0ac31b9071de6713bc68da"
    );
    assert_eq!(
        scenarios[1].uid(),
        "02c437c5c450b5107fa7862c8d991376554f692c1be8fc717eb68cd28f02e128"
    );

    // The matrix variable was bound per vector.
    assert_eq!(
        scenarios[0].steps[0].module.attrs.get("flavor"),
        Some(&Value::from("matrixbar"))
    );
    assert_eq!(
        scenarios[1].steps[0].module.attrs.get("flavor"),
        Some(&Value::from("matrixfoo"))
    );
}

#[tokio::test]
async fn scenario_filter_narrows_the_matrix() {
    let (plan, diags) = decode_with(MATRIX, DecodeTarget::All, Some("test foo:matrixbar")).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios.len(), 1);
    assert_eq!(scenarios[0].to_string(), "test [foo:matrixbar]");
}

#[tokio::test]
async fn filter_matching_nothing_is_a_warning() {
    let (plan, diags) =
        decode_with(MATRIX, DecodeTarget::All, Some("test foo:nosuchvalue")).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));
    assert!(diags.has_warnings());
    assert_eq!(plan.scenarios().count(), 0);
}

#[tokio::test]
async fn filter_applies_to_single_vector_matrices() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "test" {
  matrix {
    foo = ["only"]
  }

  step "backend" {
    module = module.backend
  }
}
"#;
    let (plan, diags) =
        decode_with(config, DecodeTarget::All, Some("test foo:other")).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));
    assert_eq!(plan.scenarios().count(), 0);
}

#[tokio::test]
async fn matrix_include_exclude_shape_the_product() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "test" {
  matrix {
    distro = ["ubuntu", "rhel"]
    arch   = ["amd64", "arm64"]

    include {
      distro = ["sles"]
      arch   = ["amd64"]
    }

    exclude {
      distro = ["rhel"]
      arch   = ["arm64"]
    }
  }

  step "backend" {
    module = module.backend
  }
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let strings: Vec<String> = plan.scenarios().map(|s| s.to_string()).collect();
    assert_eq!(
        strings,
        [
            "test [arch:amd64 distro:rhel]",
            "test [arch:amd64 distro:sles]",
            "test [arch:amd64 distro:ubuntu]",
            "test [arch:arm64 distro:ubuntu]",
        ]
    );
}

#[tokio::test]
async fn decode_target_ladder_stops_early() {
    let (plan, diags) =
        decode_with(MATRIX, DecodeTarget::ScenariosNamesNoVariants, None).await;
    assert!(!diags.has_errors());
    assert_eq!(plan.scenario_blocks.len(), 1);
    assert_eq!(plan.scenario_blocks.iter().next().unwrap().name, "test");
    assert_eq!(plan.scenarios().count(), 0);

    let (plan, diags) = decode_with(MATRIX, DecodeTarget::ScenariosMatrixOnly, None).await;
    assert!(!diags.has_errors());
    let block = plan.scenario_blocks.iter().next().unwrap();
    assert_eq!(block.matrix.as_ref().unwrap().len(), 2);
    assert_eq!(plan.scenarios().count(), 0);

    let (plan, diags) =
        decode_with(MATRIX, DecodeTarget::ScenariosNamesExpandVariants, None).await;
    assert!(!diags.has_errors());
    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios.len(), 2);
    // Names and variants only; steps are not decoded at this level.
    assert!(scenarios.iter().all(|s| s.steps.is_empty()));
}

#[tokio::test]
async fn unset_decode_target_is_rejected() {
    assert!(FlightPlanDecoder::new(DecodeTarget::Unset, None).is_err());
}

#[tokio::test]
async fn combined_matrix_unions_blocks_by_value() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "alpha" {
  matrix {
    distro = ["ubuntu", "rhel"]
  }

  step "backend" {
    module = module.backend
  }
}

scenario "beta" {
  matrix {
    distro = ["rhel", "sles"]
  }

  step "backend" {
    module = module.backend
  }
}
"#;
    let (plan, diags) = decode_with(config, DecodeTarget::ScenariosMatrixOnly, None).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let combined = plan.scenario_blocks.combined_matrix().expect("matrix");
    let vectors: Vec<String> = combined.vectors().iter().map(|v| v.to_string()).collect();
    assert_eq!(
        vectors,
        [
            "[distro:ubuntu]",
            "[distro:rhel]",
            "[distro:sles]",
        ]
    );
}

fn large_matrix_config() -> String {
    let a: Vec<String> = (0..20).map(|i| format!("\"a{i:02}\"")).collect();
    let b: Vec<String> = (0..10).map(|i| format!("\"b{i}\"")).collect();
    format!(
        r#"
module "backend" {{
  source = "./mods/backend"
}}

scenario "wide" {{
  matrix {{
    left  = [{}]
    right = [{}]
  }}

  step "backend" {{
    module = module.backend

    variables = {{
      left = matrix.left
    }}
  }}
}}
"#,
        a.join(", "),
        b.join(", ")
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_and_serial_expansion_agree() {
    // 200 vectors crosses the full-decode concurrency threshold.
    let config = large_matrix_config();

    let (concurrent_plan, diags) = decode_with(&config, DecodeTarget::All, None).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    // Names-only expansion of the same matrix stays serial.
    let (serial_plan, diags) =
        decode_with(&config, DecodeTarget::ScenariosNamesExpandVariants, None).await;
    assert!(!diags.has_errors());

    let concurrent: Vec<String> = concurrent_plan.scenarios().map(|s| s.to_string()).collect();
    let serial: Vec<String> = serial_plan.scenarios().map(|s| s.to_string()).collect();

    assert_eq!(concurrent.len(), 200);
    assert_eq!(concurrent, serial);

    let mut sorted = concurrent.clone();
    sorted.sort();
    assert_eq!(concurrent, sorted, "scenario order is deterministic");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_aborts_expansion_with_a_diagnostic() {
    let config = large_matrix_config();
    let mut sources = SourceFiles::new();
    sources.add("plan.hcl", &config);

    let token = CancellationToken::new();
    token.cancel();

    let decoder = FlightPlanDecoder::new(DecodeTarget::All, None).unwrap();
    let (plan, diags) = decoder.decode(&token, sources).await;

    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary.contains("cancelled")),
        "{:?}",
        diag_summaries(&diags)
    );
    assert_eq!(plan.scenarios().count(), 0);
}

#[tokio::test]
async fn redecoding_the_same_source_is_deterministic() {
    let (first, diags) = decode(MATRIX).await;
    assert!(!diags.has_errors());
    let (second, diags) = decode(MATRIX).await;
    assert!(!diags.has_errors());

    let first_strings: Vec<String> = first.scenarios().map(|s| s.to_string()).collect();
    let second_strings: Vec<String> = second.scenarios().map(|s| s.to_string()).collect();
    assert_eq!(first_strings, second_strings);

    let first_uids: Vec<String> = first.scenarios().map(|s| s.uid()).collect();
    let second_uids: Vec<String> = second.scenarios().map(|s| s.uid()).collect();
    assert_eq!(first_uids, second_uids);
}

#[tokio::test]
async fn variables_globals_and_locals_bind_namespaces() {
    let config = r#"
variable "region" {
  default = "us-east-1"
}

globals {
  backend_source = "./mods/backend"
}

module "backend" {
  source = global.backend_source

  region = var.region
}

scenario "basic" {
  locals {
    deploy_region = var.region
  }

  step "backend" {
    module = module.backend

    variables = {
      region = local.deploy_region
    }
  }
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios.len(), 1);
    let module = &scenarios[0].steps[0].module;
    assert_eq!(module.source, "./mods/backend");
    assert_eq!(module.attrs.get("region"), Some(&Value::from("us-east-1")));
}

#[tokio::test]
async fn scenario_selects_a_declared_terraform_cli() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

terraform_cli "custom" {
  path = "/opt/engine/bin/terraform"
}

scenario "basic" {
  terraform_cli = "custom"

  step "backend" {
    module = module.backend
  }
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));

    let scenarios: Vec<_> = plan.scenarios().collect();
    assert_eq!(scenarios[0].terraform_cli.name, "custom");
    assert_eq!(scenarios[0].terraform_cli.path, "/opt/engine/bin/terraform");

    // The implicit default CLI is always present.
    assert!(plan.terraform_clis.iter().any(|c| c.name == "terraform"));
}

#[tokio::test]
async fn unknown_terraform_cli_is_an_error() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "basic" {
  terraform_cli = "nope"

  step "backend" {
    module = module.backend
  }
}
"#;
    let (_, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags
            .iter()
            .any(|d| d.summary.contains("unknown terraform_cli")),
        "{:?}",
        diag_summaries(&diags)
    );
}

#[tokio::test]
async fn duplicate_module_declaration_is_an_error() {
    let config = r#"
module "backend" {
  source = "./one"
}

module "backend" {
  source = "./two"
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert_eq!(plan.modules.len(), 1);
    assert_eq!(plan.modules[0].source, "./one");
}

#[tokio::test]
async fn syntax_error_fails_one_file_not_the_others() {
    let mut sources = SourceFiles::new();
    sources.add("a_broken.hcl", "module \"oops {\n");
    sources.add("b_good.hcl", BASIC);

    let decoder = FlightPlanDecoder::new(DecodeTarget::All, None).unwrap();
    let (plan, diags) = decoder.decode(&CancellationToken::new(), sources).await;

    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary.contains("a_broken.hcl")),
        "{:?}",
        diag_summaries(&diags)
    );
    // The healthy file still decoded.
    assert_eq!(plan.scenarios().count(), 1);
}

const SAMPLED: &str = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "smoke" {
  matrix {
    distro = ["ubuntu", "rhel"]
  }

  step "backend" {
    module = module.backend
  }
}

scenario "upgrade" {
  step "backend" {
    module = module.backend
  }
}

sample "nightly" {
  attributes = {
    notify = "oncall"
  }

  subset "smoke" {
    matrix {
      distro = ["ubuntu"]
    }
  }

  subset "upgrade" {
    attributes = {
      notify = "release"
    }
  }
}
"#;

#[tokio::test]
async fn sample_frames_filter_subsets_and_scenarios() {
    let (plan, diags) = decode(SAMPLED).await;
    assert!(!diags.has_errors(), "{:?}", diag_summaries(&diags));
    assert_eq!(plan.samples.len(), 1);

    let (frame, frame_diags) = plan.sample_frame("nightly", &SampleFilter::default());
    assert!(!frame_diags.has_errors(), "{:?}", diag_summaries(&frame_diags));
    let frame = frame.expect("frame");

    assert_eq!(frame.subset_frames.len(), 2);

    let smoke = &frame.subset_frames["smoke"];
    assert_eq!(smoke.scenarios, ["smoke [distro:ubuntu]"]);
    assert_eq!(smoke.matrix.as_ref().unwrap().len(), 1);
    assert_eq!(smoke.attributes.get("notify"), Some(&Value::from("oncall")));

    // Subset attributes override the sample's.
    let upgrade = &frame.subset_frames["upgrade"];
    assert_eq!(upgrade.scenarios, ["upgrade"]);
    assert_eq!(
        upgrade.attributes.get("notify"),
        Some(&Value::from("release"))
    );
}

#[tokio::test]
async fn sample_frame_subset_includes_and_excludes() {
    let (plan, _) = decode(SAMPLED).await;

    let filter = SampleFilter {
        subsets: vec!["smoke".to_string()],
        exclude_subsets: Vec::new(),
    };
    let (frame, _) = plan.sample_frame("nightly", &filter);
    let frame = frame.expect("frame");
    assert_eq!(frame.subset_frames.len(), 1);
    assert!(frame.subset_frames.contains_key("smoke"));

    let filter = SampleFilter {
        subsets: Vec::new(),
        exclude_subsets: vec!["smoke".to_string(), "upgrade".to_string()],
    };
    let (frame, diags) = plan.sample_frame("nightly", &filter);
    assert!(frame.is_none());
    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary.contains("no subsets matched")),
        "{:?}",
        diag_summaries(&diags)
    );
}

#[tokio::test]
async fn sample_frame_for_unknown_sample_is_an_error() {
    let (plan, _) = decode(SAMPLED).await;
    let (frame, diags) = plan.sample_frame("nope", &SampleFilter::default());
    assert!(frame.is_none());
    assert!(diags.has_errors());
}

#[tokio::test]
async fn sample_attributes_must_be_iterable() {
    let config = r#"
module "backend" {
  source = "./mods/backend"
}

scenario "smoke" {
  step "backend" {
    module = module.backend
  }
}

sample "bad" {
  attributes = "not-an-object"

  subset "smoke" {}
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags
            .iter()
            .any(|d| d.summary.contains("must be an object or map")),
        "{:?}",
        diag_summaries(&diags)
    );
    assert!(plan.samples.is_empty());
}

#[tokio::test]
async fn sample_without_subsets_is_an_error() {
    let config = r#"
sample "empty" {
}
"#;
    let (_, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags
            .iter()
            .any(|d| d.summary.contains("does not contain any defined subsets")),
        "{:?}",
        diag_summaries(&diags)
    );
}

#[tokio::test]
async fn scenario_without_steps_is_an_error() {
    let config = r#"
scenario "empty" {
}
"#;
    let (plan, diags) = decode(config).await;
    assert!(diags.has_errors());
    assert!(
        diags.iter().any(|d| d.summary == "scenario has no steps"),
        "{:?}",
        diag_summaries(&diags)
    );
    assert_eq!(plan.scenarios().count(), 0);
}
