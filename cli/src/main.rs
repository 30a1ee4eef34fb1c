use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use miette::{Context as _, IntoDiagnostic as _, Result};
use peregrine_diagnostics::{
    Diagnostics, SourceFiles, UiSettings, compact_value_str, diagnostics_to_string,
};
use peregrine_flightplan::{
    DecodeTarget, FlightPlan, FlightPlanDecoder, SampleFilter, ScenarioFilter,
};
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

#[derive(Parser)]
#[command(name = "peregrine")]
#[command(version)]
#[command(about = "Scenario flight-plan compiler and execution driver")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv, -vvvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory containing the flight-plan sources (*.hcl).
    #[arg(long = "chdir", value_name = "DIR", default_value = ".", global = true)]
    chdir: PathBuf,

    /// Terminal width for diagnostic wrapping; 0 disables wrapping.
    #[arg(long = "width", value_name = "COLS", default_value_t = 100, global = true)]
    width: usize,

    /// Disable color output.
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Operate on scenarios.
    #[command(subcommand)]
    Scenario(ScenarioCommand),
    /// Operate on samples.
    #[command(subcommand)]
    Sample(SampleCommand),
}

#[derive(Subcommand)]
enum ScenarioCommand {
    /// List the scenarios the flight plan expands to.
    List(FilterArgs),
    /// Fully decode every scenario and report all diagnostics.
    Validate(FilterArgs),
}

#[derive(Subcommand)]
enum SampleCommand {
    /// Frame a sample against the decoded flight plan.
    Frame(SampleFrameArgs),
}

#[derive(Args)]
struct FilterArgs {
    /// Scenario filter: `[name] [key:value ...] [!key:value ...]`.
    #[arg(value_name = "FILTER", trailing_var_arg = true)]
    filter: Vec<String>,
}

#[derive(Args)]
struct SampleFrameArgs {
    /// Name of the sample to frame.
    #[arg(value_name = "NAME")]
    name: String,

    /// Only frame the named subsets, in order.
    #[arg(long = "subset", value_name = "SUBSET")]
    subsets: Vec<String>,

    /// Leave the named subsets out of the frame.
    #[arg(long = "exclude-subset", value_name = "SUBSET")]
    exclude_subsets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let settings = UiSettings {
        width: cli.width,
        use_color: !cli.no_color,
    };
    let sources = load_sources(&cli.chdir)?;

    let diags = match cli.command {
        Command::Scenario(ScenarioCommand::List(args)) => {
            scenario_list(sources, parse_filter(&args)?).await?
        }
        Command::Scenario(ScenarioCommand::Validate(args)) => {
            scenario_validate(sources, parse_filter(&args)?).await?
        }
        Command::Sample(SampleCommand::Frame(args)) => sample_frame(sources, &args).await?,
    };

    if !diags.is_empty() {
        eprint!("{}", diagnostics_to_string(&diags, &settings));
    }
    if diags.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().into_diagnostic()?
    } else {
        let level = match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("error,peregrine={level},peregrine_={level}"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

fn load_sources(dir: &Path) -> Result<SourceFiles> {
    let mut sources = SourceFiles::new();

    let entries = std::fs::read_dir(dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read flight-plan directory `{}`", dir.display()))?;

    for entry in entries {
        let entry = entry.into_diagnostic()?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("hcl") {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let contents = std::fs::read_to_string(&path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read `{}`", path.display()))?;
        sources.add(filename, contents);
    }

    if sources.is_empty() {
        return Err(miette::miette!(
            "no *.hcl flight-plan sources found in `{}`",
            dir.display()
        ));
    }

    Ok(sources)
}

fn parse_filter(args: &FilterArgs) -> Result<Option<ScenarioFilter>> {
    if args.filter.is_empty() {
        return Ok(None);
    }
    let raw = args.filter.join(" ");
    let filter = ScenarioFilter::parse(&raw).wrap_err("invalid scenario filter")?;
    Ok(Some(filter))
}

async fn decode(
    sources: SourceFiles,
    target: DecodeTarget,
    filter: Option<ScenarioFilter>,
) -> Result<(FlightPlan, Diagnostics)> {
    let decoder = FlightPlanDecoder::new(target, filter).into_diagnostic()?;
    Ok(decoder.decode(&CancellationToken::new(), sources).await)
}

async fn scenario_list(
    sources: SourceFiles,
    filter: Option<ScenarioFilter>,
) -> Result<Diagnostics> {
    let (plan, diags) =
        decode(sources, DecodeTarget::ScenariosNamesExpandVariants, filter).await?;

    for scenario in plan.scenarios() {
        println!("{scenario}");
    }

    Ok(diags)
}

async fn scenario_validate(
    sources: SourceFiles,
    filter: Option<ScenarioFilter>,
) -> Result<Diagnostics> {
    let (plan, diags) = decode(sources, DecodeTarget::All, filter).await?;

    let count = plan.scenarios().count();
    if !diags.has_errors() {
        println!(
            "decoded {count} scenario{} successfully",
            if count == 1 { "" } else { "s" }
        );
    }

    Ok(diags)
}

async fn sample_frame(sources: SourceFiles, args: &SampleFrameArgs) -> Result<Diagnostics> {
    let (plan, mut diags) = decode(sources, DecodeTarget::All, None).await?;
    if diags.has_errors() {
        return Ok(diags);
    }

    let filter = SampleFilter {
        subsets: args.subsets.clone(),
        exclude_subsets: args.exclude_subsets.clone(),
    };
    let (frame, frame_diags) = plan.sample_frame(&args.name, &filter);
    diags.extend(frame_diags);

    let Some(frame) = frame else {
        return Ok(diags);
    };

    for (name, subset_frame) in &frame.subset_frames {
        println!("subset {name}:");
        for scenario in &subset_frame.scenarios {
            println!("  {scenario}");
        }
        for (key, value) in &subset_frame.attributes {
            println!("  {key} = {}", compact_value_str(value));
        }
    }

    Ok(diags)
}
