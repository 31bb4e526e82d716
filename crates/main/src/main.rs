use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use survey_report::orchestrator::{AssignmentPolicy, BatchReport, FirstMatchPolicy, IndexPolicy};
use survey_report::{Config, FirstRecordPolicy, HttpSurveyApi, Period, Pipeline};

/// Fetches survey reports and renders one PDF per respondent.
///
/// Fonts are looked up in `--fonts-dir`, then `SURVEY_FONTS_DIR`, then `assets/fonts` next to the
/// binary. Every option can also be set through its `SURVEY_*` environment variable.
#[derive(Parser)]
#[command(author, version, about = "Survey report pipeline")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Root of the raw/processed/overlays/output directories.
    #[arg(long, global = true, env = "SURVEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// API token of the survey system.
    #[arg(long, global = true, env = "SURVEY_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true, env = "SURVEY_API_URL")]
    api_url: Option<String>,

    #[arg(long, global = true, env = "SURVEY_COURSE_ID")]
    course_id: Option<u64>,

    #[arg(long, global = true, env = "SURVEY_FONTS_DIR")]
    fonts_dir: Option<PathBuf>,

    /// Background PDF whose first page sits under every report.
    #[arg(long, global = true, env = "SURVEY_TEMPLATE")]
    template: Option<PathBuf>,
}

#[derive(Args)]
struct PeriodArgs {
    /// Month printed in the header and file names; inferred from the report name when omitted.
    #[arg(long)]
    month: Option<String>,

    #[arg(long)]
    year: Option<String>,
}

impl PeriodArgs {
    fn period(&self) -> Period {
        Period::new(self.month.clone(), self.year.clone())
    }
}

#[derive(Args)]
struct SearchArgs {
    /// Search term for the assignment, usually the report year.
    #[arg(long)]
    year: String,

    /// Use the n-th search result (1-based) instead of the first.
    #[arg(long)]
    pick: Option<usize>,
}

impl SearchArgs {
    fn policy(&self) -> Box<dyn AssignmentPolicy> {
        match self.pick {
            Some(index) => Box::new(IndexPolicy(index)),
            None => Box::new(FirstMatchPolicy),
        }
    }
}

#[derive(Args)]
struct OverlayArgs {
    /// Processed (semicolon-separated) report file.
    #[arg(long)]
    csv: PathBuf,

    /// Report name used to infer month and year, when the file name lacks them.
    #[arg(long)]
    source_name: Option<String>,

    #[command(flatten)]
    period: PeriodArgs,
}

impl OverlayArgs {
    fn period(&self) -> Period {
        let period = self.period.period();
        match &self.source_name {
            Some(name) => period.fill_from(name),
            None => period,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search, fetch, download and normalize a report.
    Fetch(SearchArgs),

    /// Render overlays for every respondent of a processed file.
    Overlays(OverlayArgs),

    /// Render the overlay of the first respondent only.
    Preview(OverlayArgs),

    /// Merge every overlay with the template.
    Compose(PeriodArgs),

    /// Run the whole pipeline.
    Run {
        #[command(flatten)]
        search: SearchArgs,

        #[arg(long)]
        month: Option<String>,
    },
}

fn config(settings: &Settings) -> Config {
    let mut config = match &settings.data_dir {
        Some(dir) => Config::from_env().rebase(dir.clone()),
        None => Config::from_env(),
    };
    if let Some(token) = &settings.token {
        config.token = token.clone();
    }
    if let Some(url) = &settings.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(course_id) = settings.course_id {
        config.course_id = course_id;
    }
    if let Some(dir) = &settings.fonts_dir {
        config.fonts_dir = Some(dir.clone());
    }
    if let Some(template) = &settings.template {
        config.template_path = template.clone();
    }
    config
}

fn pipeline(config: Config) -> survey_report::Result<Pipeline<HttpSurveyApi>> {
    let api = HttpSurveyApi::new(config.clone())?;
    Ok(Pipeline::new(config, api))
}

fn report_batch(stage: &str, batch: &BatchReport) {
    info!("{}: {} succeeded, {} failed", stage, batch.succeeded.len(), batch.failed.len());
    for (item, err) in &batch.failed {
        warn!("{}: {}", item, err);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = config(&cli.settings);

    match cli.command {
        Commands::Fetch(search) => {
            let extraction = pipeline(config)?.extract(&search.year, search.policy().as_ref())?;
            info!("Processed file: {}", extraction.processed.path().display());
        }
        Commands::Overlays(args) => {
            let batch = Pipeline::offline(config)
                .render_overlays(&args.csv, &args.period())?;
            report_batch("overlays", &batch);
        }
        Commands::Preview(args) => {
            let path = Pipeline::offline(config)
                .build_overlay_preview(&args.csv, &args.period(), &FirstRecordPolicy)?;
            info!("Preview written to {}", path.display());
        }
        Commands::Compose(period) => {
            let batch = Pipeline::offline(config)
                .compose_all(&period.period())?;
            report_batch("documents", &batch);
        }
        Commands::Run { search, month } => {
            let period = Period::new(month, None);
            let summary = pipeline(config)?.run(&search.year, &period, search.policy().as_ref())?;
            report_batch("overlays", &summary.overlays);
            report_batch("documents", &summary.documents);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {}", err);
        print_error_sources(err.as_ref());
        std::process::exit(1);
    }
}

fn print_error_sources(mut error: &(dyn Error + 'static)) {
    while let Some(source) = error.source() {
        eprintln!("  caused by: {}", source);
        error = source;
    }
}
