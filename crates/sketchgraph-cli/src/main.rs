use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use sketchgraph_api::{OnshapeClient, OnshapeConfig};
use sketchgraph_core::{
    config::DEFAULT_KEY_FILE, decode_query_symbols, evaluate_strict, evaluate_with_status,
    query::candidate_tokens, ApiCredentials, ConfigManager, Settings,
};
use sketchgraph_graph::{
    DependencyExtractor, ExportReport, Extraction, ExtractionRequest, FrontendExport,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sketchgraph")]
#[command(about = "SketchGraph - reverse dependencies of CAD master sketches", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Configuration directory
    #[arg(long, global = true, env = "SKETCHGRAPH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration environment (development, production, ...)
    #[arg(long, global = true)]
    env: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract reverse dependencies of master sketches
    Extract {
        /// Document ID holding the master sketches
        #[arg(short, long)]
        document: String,

        /// Workspace ID (must be a workspace, not a version)
        #[arg(short, long)]
        workspace: String,

        /// Part studio element ID
        #[arg(short, long)]
        element: String,

        /// Master sketch name (repeatable, order is kept)
        #[arg(short, long = "sketch", required = true)]
        sketches: Vec<String>,

        /// Write the visualization JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the diagnostics report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// API key file with "access" and "secret"
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Evaluate a unit-annotated arithmetic expression
    Eval {
        /// Expression, e.g. "2 in + 3 in"
        expression: String,

        /// Fail instead of falling back to 0.0
        #[arg(long)]
        strict: bool,
    },

    /// Decode one reference query string into candidate entity ids
    Decode {
        /// Raw query string
        query: String,

        /// Master sketch feature id (repeatable)
        #[arg(short = 'i', long = "sketch-id", required = true)]
        sketch_ids: Vec<String>,
    },
}

#[derive(Serialize)]
struct EvalResult {
    expression: String,
    value: f64,
    fallback: Option<String>,
}

#[derive(Serialize)]
struct DecodeResult {
    symbols: Option<String>,
    candidates: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigManager::new(cli.config_dir.clone(), cli.env.clone())
        .context("Failed to load configuration")?;
    init_tracing(&config.settings().logging.level, cli.verbose);

    if let Err(e) = execute_command(&cli, config.settings()).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn execute_command(cli: &Cli, settings: &Settings) -> Result<()> {
    match &cli.command {
        Commands::Extract {
            document,
            workspace,
            element,
            sketches,
            output,
            report,
            key_file,
        } => {
            let request = ExtractionRequest::new(document, workspace, element, sketches.iter());
            let credentials = resolve_credentials(settings, key_file.as_deref())?;
            execute_extract(
                cli.format,
                settings,
                credentials,
                &request,
                output.as_deref(),
                report.as_deref(),
            )
            .await
        }
        Commands::Eval { expression, strict } => {
            if *strict {
                evaluate_strict(expression)
                    .with_context(|| format!("Failed to evaluate \"{}\"", expression))?;
            }
            let evaluation = evaluate_with_status(expression);
            let result = EvalResult {
                expression: expression.clone(),
                value: evaluation.value,
                fallback: evaluation.fallback.map(|e| e.to_string()),
            };
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Pretty => match &result.fallback {
                    None => println!("{}", result.value.to_string().green()),
                    Some(reason) => println!(
                        "{} {}",
                        result.value.to_string().yellow(),
                        format!("(unparsable: {})", reason).yellow()
                    ),
                },
            }
            Ok(())
        }
        Commands::Decode { query, sketch_ids } => {
            let symbols = decode_query_symbols(query).context("Failed to decode query")?;
            let candidates = symbols
                .as_deref()
                .map(|s| candidate_tokens(s, sketch_ids).into_iter().collect())
                .unwrap_or_default();
            let result = DecodeResult {
                symbols,
                candidates,
            };
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Pretty => {
                    match &result.symbols {
                        Some(symbols) => println!("{}: {}", "symbols".cyan().bold(), symbols),
                        None => println!("{}", "not a reference query".yellow()),
                    }
                    for candidate in &result.candidates {
                        println!("  {}", candidate.green());
                    }
                }
            }
            Ok(())
        }
    }
}

/// `--key-file`, then configured keys, then `APIKey.json` in the working directory.
fn resolve_credentials(settings: &Settings, key_file: Option<&Path>) -> Result<ApiCredentials> {
    if let Some(path) = key_file {
        return ApiCredentials::from_key_file(path);
    }
    if let Some(credentials) = settings.api.credentials() {
        return Ok(credentials);
    }
    let default_path = Path::new(DEFAULT_KEY_FILE);
    if default_path.exists() {
        return ApiCredentials::from_key_file(default_path);
    }
    bail!(
        "no API credentials: pass --key-file, set SKETCHGRAPH__API__ACCESS_KEY/SECRET_KEY, or create {}",
        DEFAULT_KEY_FILE
    )
}

async fn execute_extract(
    format: OutputFormat,
    settings: &Settings,
    credentials: ApiCredentials,
    request: &ExtractionRequest,
    output: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    let client = OnshapeClient::new(OnshapeConfig::from_settings(settings, credentials))
        .context("Failed to create API client")?;
    let extractor = DependencyExtractor::new(Arc::new(client), settings.extraction.clone().into());

    let extraction = extractor
        .extract(request)
        .await
        .context("Dependency extraction failed")?;
    let export = FrontendExport::from_extraction(&extraction);
    let report = ExportReport::from_extraction(&extraction);

    if let Some(path) = output {
        std::fs::write(path, export.to_json(false)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote dependency export");
    }
    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json if output.is_none() => println!("{}", export.to_json(true)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Pretty => print_summary(&extraction, &report),
    }
    Ok(())
}

fn print_summary(extraction: &Extraction, report: &ExportReport) {
    for sketch in &extraction.entities_by_sketch {
        let referenced = sketch
            .entity_ids()
            .filter(|id| {
                extraction
                    .dependency_index
                    .get(*id)
                    .is_some_and(|refs| !refs.is_empty())
            })
            .count();
        println!(
            "{} {} ({} entities, {} referenced, plane {})",
            "sketch".cyan().bold(),
            sketch.sketch_name.green(),
            sketch.len(),
            referenced.to_string().yellow(),
            sketch.plane_side
        );
    }
    println!(
        "{}: {}",
        "scopes scanned".cyan().bold(),
        report.scopes_scanned.to_string().yellow()
    );
    println!(
        "{}: {}",
        "dependency edges".cyan().bold(),
        report.edge_count.to_string().yellow()
    );
    for fallback in &report.expression_fallbacks {
        println!(
            "{} mate connector {} in {}: {}",
            "fallback".yellow().bold(),
            fallback.connector.as_deref().unwrap_or("?"),
            fallback.feature_id,
            fallback.parameters.join(", ")
        );
    }
    for error in &report.scope_errors {
        println!("{} {}", "skipped".red().bold(), error);
    }
}
