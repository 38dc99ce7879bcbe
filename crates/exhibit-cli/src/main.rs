//! Exhibit CLI
//!
//! Generates an exhibit offline from a manifest plan file and prints it as JSON.

mod offline;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use exhibit_core::{
    Config, ExhibitData, ExhibitEvent, ExhibitPipeline, ExhibitSlot, GradeLevel, ManifestRequest,
};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::offline::{offline_registry, FilePlanner, PlanFile};

/// Exhibit - offline exhibit generator
///
/// Plans an exhibit from a manifest plan file, generates every component in
/// parallel and prints the assembled exhibit in manifest order.
#[derive(Parser, Debug)]
#[command(name = "exhibit")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the manifest plan JSON file
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,

    /// Topic to generate for (overrides the plan file)
    #[arg(short, long)]
    topic: Option<String>,

    /// Grade level, e.g. "elementary" or "high-school" (overrides the plan file)
    #[arg(short, long, value_parser = parse_grade)]
    grade: Option<GradeLevel>,

    /// Path to configuration file (default: exhibit.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Pretty-print the exhibit JSON
    #[arg(long)]
    pretty: bool,
}

fn parse_grade(s: &str) -> Result<GradeLevel, String> {
    GradeLevel::from_str_case_insensitive(s).ok_or_else(|| {
        format!(
            "unknown grade level '{s}' (expected preschool, kindergarten, elementary, \
             middle-school, high-school, undergraduate, graduate or phd)"
        )
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(manifest = %args.manifest.display(), config = ?args.config, "Starting");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads config and plan, runs the pipeline and prints the exhibit.
async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let plan = PlanFile::load(&args.manifest)?;

    let topic = args.topic.or_else(|| plan.topic.clone()).ok_or_else(|| {
        anyhow::anyhow!(
            "No topic given\n\nSuggestion: Pass --topic or set \"topic\" in the plan file"
        )
    })?;
    let grade = args.grade.or(plan.grade_level).unwrap_or_default();

    let registry = offline_registry(&plan);
    let request = ManifestRequest::new(topic, grade);
    tracing::info!(topic = %request.topic, grade = %request.grade_level, items = plan.items.len(), "Generating exhibit");

    let pipeline = ExhibitPipeline::new(config, Arc::new(FilePlanner::new(plan)), registry);
    let listener = tokio::spawn(print_events(pipeline.subscribe()));

    let result = pipeline.generate(&request).await;

    // Dropping the pipeline closes the event channel and ends the listener.
    drop(pipeline);
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Event listener ended abnormally");
    }

    let exhibit = result.map_err(|e| anyhow::anyhow!("{e}"))?;
    print_summary(&exhibit);

    let json = if args.pretty {
        serde_json::to_string_pretty(&exhibit)?
    } else {
        serde_json::to_string(&exhibit)?
    };
    println!("{json}");
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints pipeline events to stderr until the channel closes.
async fn print_events(mut receiver: broadcast::Receiver<ExhibitEvent>) {
    loop {
        match receiver.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event listener lagged, missed {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ExhibitEvent) {
    match event {
        ExhibitEvent::ManifestProgress(p) => eprintln!("{}", p.message),
        ExhibitEvent::ManifestThinking(p) => {
            tracing::debug!(thought = %p.thought, "Planner thinking");
        }
        ExhibitEvent::ManifestPartial(_) => {}
        ExhibitEvent::ManifestReady(p) => {
            eprintln!("Manifest ready: {} items", p.instance_ids.len());
        }
        ExhibitEvent::ItemStatus(p) => match &p.error {
            Some(error) => eprintln!("  [{}] {} ({}): {error}", p.status, p.instance_id, p.component_id),
            None => eprintln!("  [{}] {} ({})", p.status, p.instance_id, p.component_id),
        },
        ExhibitEvent::BuildComplete(p) => {
            eprintln!("Build complete: {} completed, {} failed", p.completed, p.failed);
        }
        ExhibitEvent::ExhibitReady(_) => {}
        ExhibitEvent::Error(p) => eprintln!("Error: {}", p.message),
    }
}

/// Prints a summary of the assembled exhibit.
fn print_summary(exhibit: &ExhibitData) {
    eprintln!();
    eprintln!("=== Exhibit: {} ({}) ===", exhibit.topic, exhibit.grade_level);
    for slot in &exhibit.components {
        match slot {
            ExhibitSlot::Ready { component } => {
                eprintln!("  ready        {} ({})", component.instance_id, component.component_id);
            }
            ExhibitSlot::Unavailable {
                instance_id,
                component_id,
                reason,
                ..
            } => {
                eprintln!("  unavailable  {instance_id} ({component_id}): {reason}");
            }
        }
    }
    eprintln!(
        "{} of {} components ready",
        exhibit.ready_count(),
        exhibit.components.len()
    );
}
