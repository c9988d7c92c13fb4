//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use stagecraft_core::{Pipeline, PipelineResult, PreviewResult, ProgressReporter, RunRequest};
use stagecraft_delivery::compile_season;
use stagecraft_shared::{
    AppConfig, DeliveryFormat, Style, expand_home, init_config, load_config, load_config_from,
};
use stagecraft_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Stagecraft: your ride, told as a stage of the Tour.
#[derive(Parser)]
#[command(
    name = "stagecraft",
    version,
    about = "Turn a recorded ride into a story set inside a real race stage.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.stagecraft/stagecraft.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Which stage and which ride.
#[derive(Args, Debug)]
pub(crate) struct StageArgs {
    /// Stage number.
    #[arg(long)]
    pub stage: u32,

    /// Stage date, YYYY-MM-DD (defaults to today).
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Activity id (defaults to the day's first qualifying ride).
    #[arg(long)]
    pub activity: Option<u64>,

    /// Print the result as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline and deliver a story.
    Run {
        #[command(flatten)]
        stage: StageArgs,

        /// Narrative style: literary, reportage, or dramatic.
        #[arg(long)]
        style: Option<Style>,

        /// Output format: markup, document, message, or structured.
        #[arg(long)]
        format: Option<DeliveryFormat>,

        /// Reader feedback applied in one extra revision pass.
        #[arg(long)]
        feedback: Option<String>,

        /// File with background about the rider.
        #[arg(long)]
        rider_context: Option<PathBuf>,

        /// Do not write the story to the archive.
        #[arg(long)]
        no_archive: bool,
    },

    /// Fetch and analyze without writing a story.
    Preview {
        #[command(flatten)]
        stage: StageArgs,
    },

    /// Compile one season's archived stories into one document.
    Compile {
        /// Season label used as document title and file name.
        #[arg(long)]
        season: String,

        /// Year of the stories to include (defaults to `[event_source] season`).
        #[arg(long)]
        year: Option<i32>,

        /// Archive directory (defaults to the configured one).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Show recent pipeline runs from the database.
    History {
        /// Number of runs to show.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Generation cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Drop cached model responses.
    Clear {
        /// Only this task, e.g. `write_draft`.
        #[arg(long)]
        task: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "stagecraft=info",
        1 => "stagecraft=debug",
        _ => "stagecraft=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Run {
            stage,
            style,
            format,
            feedback,
            rider_context,
            no_archive,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            let mut request = build_request(&config, &stage);
            if let Some(style) = style {
                request.style = style;
            }
            if let Some(format) = format {
                request.format = format;
            }
            request.feedback = feedback;
            request.rider_context = rider_context.as_deref().map(read_context).transpose()?;
            if no_archive {
                request.archive = false;
            }
            cmd_run(&config, &request, stage.json).await
        }
        Command::Preview { stage } => {
            let config = resolve_config(config_path.as_deref())?;
            let request = build_request(&config, &stage);
            cmd_preview(&config, &request, stage.json).await
        }
        Command::Compile { season, year, dir } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_compile(&config, &season, year, dir).await
        }
        Command::History { limit } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_history(&config, limit).await
        }
        Command::Cache {
            action: CacheAction::Clear { task },
        } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_cache_clear(&config, task.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn build_request(config: &AppConfig, stage: &StageArgs) -> RunRequest {
    let date = stage.date.unwrap_or_else(|| Local::now().date_naive());
    let mut request = RunRequest::with_defaults(config, stage.stage, date);
    request.activity_id = stage.activity;
    request
}

fn read_context(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read rider context '{}': {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, request: &RunRequest, json: bool) -> Result<()> {
    info!(
        stage = request.event_number,
        date = %request.date,
        style = %request.style,
        format = request.format.as_str(),
        "running pipeline"
    );

    let pipeline = Pipeline::from_config(config).await?;
    let reporter = CliProgress::new();
    let result = pipeline.run(request, &reporter).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_run(&result);
    }

    if result.success {
        Ok(())
    } else {
        Err(eyre!(
            "{}",
            result.error_message.unwrap_or_else(|| "run failed".into())
        ))
    }
}

fn print_run(result: &PipelineResult) {
    if let Some(artifact) = &result.delivered_artifact {
        println!("{}", artifact.content);
    } else if let Some(narrative) = &result.narrative {
        println!("{narrative}");
    }

    println!();
    if let Some(report) = &result.editing_report {
        println!(
            "  Scores:     style {:.2} · facts {:.2} · readability {:.2}",
            report.scores.style, report.scores.factual_accuracy, report.scores.readability
        );
        println!(
            "  Iterations: {}/{}{}",
            report.iteration_count,
            report.max_iterations,
            if report.threshold_met {
                ""
            } else {
                " (threshold not met)"
            }
        );
    }
    if let Some(path) = result
        .delivered_artifact
        .as_ref()
        .and_then(|a| a.file_path.as_ref())
    {
        println!("  Archived:   {}", path.display());
    }
    println!("  Time:       {:.1}s", result.elapsed_seconds);
    println!();
}

async fn cmd_preview(config: &AppConfig, request: &RunRequest, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let reporter = CliProgress::new();
    let preview = pipeline.preview(request, &reporter).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        print_preview(&preview);
    }

    if preview.success {
        Ok(())
    } else {
        Err(eyre!(
            "{}",
            preview.error_message.unwrap_or_else(|| "preview failed".into())
        ))
    }
}

fn print_preview(preview: &PreviewResult) {
    let Some(analysis) = &preview.analysis else {
        return;
    };
    let event = &analysis.event;
    println!();
    println!("  {} · {} · {}", event.display_name(), event.route, event.category);
    println!("  Winner:    {}", event.winner);
    println!(
        "  Ride:      {:.0} min · {:.1} km · {}",
        analysis.activity.duration_minutes,
        analysis.activity.distance_km,
        analysis.profile.zone.as_str()
    );
    println!(
        "  Role:      {} ({})",
        analysis.role.role, analysis.role.position
    );
    println!();
    for beat in &analysis.timeline.beats {
        println!(
            "  {:>5.0}'  [{}] {}",
            beat.minute,
            beat.focus.as_str(),
            beat.incident
        );
        println!("          {}", beat.athlete_action);
    }
    println!();
}

async fn cmd_compile(
    config: &AppConfig,
    season: &str,
    year: Option<i32>,
    dir: Option<PathBuf>,
) -> Result<()> {
    let dir = dir.unwrap_or_else(|| expand_home(&config.defaults.archive_dir));
    let year = year.unwrap_or(config.event_source.season);
    let compiled = compile_season(&dir, season, year)?;
    println!(
        "Compiled {} stories into {}",
        compiled.stories,
        compiled.path.display()
    );
    Ok(())
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let Some(db) = &config.defaults.database else {
        return Err(eyre!(
            "no database configured; set `database` under [defaults] to keep a cache and run history"
        ));
    };
    Ok(Storage::open(&expand_home(db)).await?)
}

async fn cmd_cache_clear(config: &AppConfig, task: Option<&str>) -> Result<()> {
    let storage = open_storage(config).await?;
    let removed = storage.clear_generation_cache(task).await?;
    println!("Removed {removed} cached responses.");
    Ok(())
}

async fn cmd_history(config: &AppConfig, limit: u32) -> Result<()> {
    let storage = open_storage(config).await?;
    let runs = storage.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  stage {:>2}  {}  {:<9} {:<10} {:>6.1}s  {}",
            run.created_at.get(..19).unwrap_or(&run.created_at),
            run.event_number,
            run.event_date,
            run.style,
            run.format,
            run.elapsed_seconds,
            if run.success {
                run.artifact_path.unwrap_or_else(|| "ok".into())
            } else {
                format!("failed: {}", run.error_message.unwrap_or_default())
            }
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn finished(&self, _success: bool, _elapsed_seconds: f64) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
