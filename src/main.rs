use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod admin;
mod analytics;
mod api;
mod config;
mod db;
mod error;
mod export;
mod filter;
mod jobs;
mod models;
mod refresh;
mod report;
mod results;
mod source;

use admin::{CaseFileForm, InstructorForm, PromptForm, Resource, ScenarioForm, StudentForm};
use config::Config;
use export::Column;
use filter::{DateRange, ResultsFilter, Selection};
use jobs::{JobTracker, TrackerState};
use models::ResultStatus;
use results::{ResultsQuery, SortDirection, SortKey};
use source::{Backend, SourceKind};

#[derive(Parser)]
#[command(name = "casestudy-analytics")]
#[command(about = "Instructor analytics for AI case-discussion chats", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to configuration file (defaults to .casestudy.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to read data from
    #[arg(long, global = true, value_enum, default_value_t = SourceKind::Api)]
    source: SourceKind,

    /// Platform API base URL
    #[arg(long, global = true, env = "CASESTUDY_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Outline job timeout in seconds (180-300)
    #[arg(long, global = true, value_name = "SECS")]
    pub job_timeout: Option<u64>,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,
}

impl GlobalArgs {
    fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo cohort
    Seed,
    /// Import evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Write a default config file (to --config, or .casestudy.toml)
    InitConfig,
    /// Show overall, section and case statistics
    Dashboard {
        #[arg(long)]
        range: Option<DateRange>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Re-render the dashboard periodically until interrupted
    Watch {
        #[arg(long)]
        range: Option<DateRange>,
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Query per-student results
    Results {
        #[arg(long = "section")]
        sections: Vec<Uuid>,
        #[arg(long = "case")]
        cases: Vec<Uuid>,
        #[arg(long = "status")]
        statuses: Vec<ResultStatus>,
        #[arg(long, default_value = "student_name")]
        sort: SortKey,
        #[arg(long, default_value = "asc")]
        direction: SortDirection,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Write the visible rows to a CSV file
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
        /// Columns to export (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<Column>,
    },
    /// List the sections and cases usable as result filters
    FilterOptions,
    /// Allow or forbid a student to chat about a case again
    #[command(group(ArgGroup::new("mode").args(["allow", "deny"]).required(true)))]
    Rechat {
        #[arg(long)]
        evaluation: Uuid,
        #[arg(long)]
        allow: bool,
        #[arg(long)]
        deny: bool,
    },
    /// Manage students, instructors, scenarios and prompts
    #[command(subcommand)]
    Add(AddCommand),
    /// Delete a student, instructor, scenario, prompt or case file
    Remove {
        resource: Resource,
        id: Uuid,
    },
    /// Confirm that a case file may be used despite proprietary content
    ConfirmProprietary {
        #[arg(long)]
        file: Uuid,
    },
    /// Rename a case file or change whether it is sent to the model
    UpdateFile {
        #[arg(long)]
        file: Uuid,
        #[arg(long)]
        case: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        exclude_from_prompt: bool,
    },
    /// Set the order in which case files are included in prompts
    ReorderFiles {
        #[arg(long)]
        case: Uuid,
        #[arg(long, value_delimiter = ',', required = true)]
        files: Vec<Uuid>,
    },
    /// Generate a case outline from a document
    #[command(group(ArgGroup::new("document").args(["file", "url"]).required(true)))]
    Outline {
        #[arg(long)]
        case: Uuid,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        /// Current outline; restored if the job is aborted, replaced when it completes
        #[arg(long, value_name = "FILE")]
        outline: Option<PathBuf>,
        /// Submit and return without waiting
        #[arg(long, conflicts_with = "detach_after")]
        detach: bool,
        /// Stop waiting after this many seconds; the job keeps running
        #[arg(long, value_name = "SECS")]
        detach_after: Option<u64>,
    },
    /// Re-attach to a running outline job
    OutlineStatus {
        #[arg(long)]
        job: String,
        #[arg(long, value_name = "FILE")]
        outline: Option<PathBuf>,
        /// Stop waiting after this many seconds; the job keeps running
        #[arg(long, value_name = "SECS")]
        detach_after: Option<u64>,
    },
}

#[derive(Subcommand)]
enum AddCommand {
    Student {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long = "section")]
        sections: Vec<Uuid>,
    },
    Instructor {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long = "section")]
        sections: Vec<Uuid>,
    },
    Scenario {
        #[arg(long)]
        name: String,
        #[arg(long)]
        case: Option<Uuid>,
        #[arg(long)]
        persona: Option<String>,
        #[arg(long)]
        question: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    Prompt {
        #[arg(long)]
        title: String,
        /// File holding the prompt text
        #[arg(long, value_name = "FILE")]
        body: PathBuf,
        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global);

    // init-config must not trip over a missing or broken file.
    let mut config = match cli.command {
        Commands::InitConfig => Config::default(),
        _ => load_config(&cli.global)?,
    };
    config.merge_with_args(&cli.global);
    debug!(?config, "effective configuration");

    if let Err(err) = run(cli, config).await {
        error!(error = %err, "command failed");
        return Err(err);
    }
    Ok(())
}

fn init_logging(args: &GlobalArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn init_config(path: Option<&Path>) -> anyhow::Result<()> {
    let path = path.unwrap_or(Path::new(config::DEFAULT_CONFIG_FILE));
    if path.exists() {
        anyhow::bail!("{} already exists; edit it or remove it first", path.display());
    }
    std::fs::write(path, Config::default_toml()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Created {}.", path.display());
    Ok(())
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    if let Some(ref path) = args.config {
        info!("Loading config from: {}", path.display());
    }
    match Config::resolve(args.config.as_deref())? {
        Some(config) => Ok(config),
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::InitConfig => init_config(cli.global.config.as_deref()),
        Commands::InitDb => {
            let pool = source::connect_postgres(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
            Ok(())
        }
        Commands::Seed => {
            let pool = source::connect_postgres(&config).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
            Ok(())
        }
        Commands::Import { csv } => {
            let pool = source::connect_postgres(&config).await?;
            let summary = db::import_csv(&pool, &csv).await?;
            println!(
                "Inserted {} evaluations from {} ({} duplicates, {} skipped).",
                summary.inserted,
                csv.display(),
                summary.duplicates,
                summary.skipped
            );
            Ok(())
        }
        Commands::Dashboard { range, out } => {
            let range = range.map_or_else(|| config.dashboard.range(), Ok)?;
            let backend = Backend::connect(cli.global.source, &config).await?;
            let snapshot = backend.snapshot().await.context("dashboard data unavailable")?;
            let dashboard = analytics::build_dashboard(&snapshot, range, Utc::now());
            let rendered = report::build_report(&dashboard);
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Dashboard written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
            Ok(())
        }
        Commands::Watch { range, every } => {
            let range = range.map_or_else(|| config.dashboard.range(), Ok)?;
            let every = every.unwrap_or(config.dashboard.refresh_seconds).max(1);
            let every = Duration::from_secs(every);
            let backend = Backend::connect(cli.global.source, &config).await?;
            watch_dashboard(backend, range, every).await;
            Ok(())
        }
        Commands::Results {
            sections,
            cases,
            statuses,
            sort,
            direction,
            limit,
            offset,
            export,
            columns,
        } => {
            let query = ResultsQuery {
                filter: ResultsFilter {
                    sections: Selection::from_values(sections),
                    cases: Selection::from_values(cases),
                    statuses: Selection::from_values(statuses),
                },
                limit,
                offset,
                sort,
                direction,
            };
            let backend = Backend::connect(cli.global.source, &config).await?;
            let page = backend.results(&query).await.context("results unavailable")?;
            print!("{}", report::build_results_table(&page, offset));

            if let Some(path) = export {
                let columns = if columns.is_empty() {
                    Column::DEFAULT.to_vec()
                } else {
                    columns
                };
                let written = export::export_to_path(&path, &page.rows, &columns)?;
                println!("Exported {written} rows to {}.", path.display());
            }
            Ok(())
        }
        Commands::FilterOptions => {
            let backend = Backend::connect(cli.global.source, &config).await?;
            let options = backend.filter_options().await?;
            println!("Sections:");
            for section in &options.sections {
                println!("- {} {} ({})", section.id, section.title, section.term);
            }
            println!("Cases:");
            for case in &options.cases {
                println!("- {} {}", case.id, case.title);
            }
            Ok(())
        }
        Commands::Rechat { evaluation, allow, deny } => {
            let allow = allow && !deny;
            let backend = Backend::connect(cli.global.source, &config).await?;
            backend.set_rechat(evaluation, allow).await?;
            println!(
                "Re-chat {} for evaluation {evaluation}.",
                if allow { "allowed" } else { "disabled" }
            );
            Ok(())
        }
        Commands::Add(command) => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            let client = backend.api()?;
            let (resource, id) = match command {
                AddCommand::Student {
                    first_name,
                    last_name,
                    email,
                    sections,
                } => {
                    let form = StudentForm {
                        first_name,
                        last_name,
                        email,
                        section_ids: sections,
                    };
                    (Resource::Students, client.create(Resource::Students, &form).await?)
                }
                AddCommand::Instructor { name, email, sections } => {
                    let form = InstructorForm {
                        name,
                        email,
                        section_ids: sections,
                    };
                    (Resource::Instructors, client.create(Resource::Instructors, &form).await?)
                }
                AddCommand::Scenario {
                    name,
                    case,
                    persona,
                    question,
                    disabled,
                } => {
                    let form = ScenarioForm {
                        name,
                        case_id: case,
                        persona,
                        question,
                        enabled: !disabled,
                    };
                    (Resource::Scenarios, client.create(Resource::Scenarios, &form).await?)
                }
                AddCommand::Prompt {
                    title,
                    body,
                    description,
                } => {
                    let text = std::fs::read_to_string(&body)
                        .with_context(|| format!("failed to read {}", body.display()))?;
                    let form = PromptForm {
                        title,
                        body: text,
                        description,
                    };
                    (Resource::Prompts, client.create(Resource::Prompts, &form).await?)
                }
            };
            println!("Created {} {id}.", resource.singular());
            Ok(())
        }
        Commands::Remove { resource, id } => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            backend.api()?.delete(resource, id).await?;
            println!("Deleted {} {id}.", resource.singular());
            Ok(())
        }
        Commands::ConfirmProprietary { file } => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            backend.api()?.confirm_proprietary(file).await?;
            println!("Proprietary content confirmed for {file}.");
            Ok(())
        }
        Commands::UpdateFile {
            file,
            case,
            name,
            exclude_from_prompt,
        } => {
            let form = CaseFileForm {
                case_id: case,
                file_name: name,
                include_in_prompt: !exclude_from_prompt,
            };
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            backend.api()?.update(Resource::CaseFiles, file, &form).await?;
            println!("Updated case file {file}.");
            Ok(())
        }
        Commands::ReorderFiles { case, files } => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            backend.api()?.reorder_files(case, &files).await?;
            println!("Updated prompt order for {} files.", files.len());
            Ok(())
        }
        Commands::Outline {
            case,
            file,
            url,
            outline,
            detach,
            detach_after,
        } => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            let client = backend.api()?;

            let uploaded = match (file, url) {
                (Some(path), _) => client.upload_file(case, &path).await?,
                (None, Some(url)) => client.import_url(case, &url).await?,
                (None, None) => anyhow::bail!("pass --file or --url"),
            };
            info!(file = %uploaded.file_name, id = %uploaded.id, "document attached");
            let job_id = client.submit_outline(case, uploaded.id).await?;

            if detach {
                println!("Outline job {job_id} is running in the background.");
                reattach_hint(&job_id);
                return Ok(());
            }

            let original = read_outline(outline.as_ref())?;
            let mut tracker = JobTracker::from_config(&config.jobs);
            tracker.submitted(job_id, original);
            follow_job(client, &mut tracker, outline, detach_after).await
        }
        Commands::OutlineStatus {
            job,
            outline,
            detach_after,
        } => {
            let backend = Backend::connect(SourceKind::Api, &config).await?;
            let client = backend.api()?;
            let original = read_outline(outline.as_ref())?;
            let mut tracker = JobTracker::from_config(&config.jobs);
            tracker.reattach(job, original);
            follow_job(client, &mut tracker, outline, detach_after).await
        }
    }
}

fn read_outline(path: Option<&PathBuf>) -> anyhow::Result<Option<String>> {
    match path {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Some(text))
        }
        _ => Ok(None),
    }
}

fn reattach_hint(job_id: &str) {
    println!("Re-attach with: casestudy-analytics outline-status --job {job_id}");
}

/// Polls a submitted job. Ctrl-C aborts and leaves the outline file untouched;
/// `detach_after` stops observing while the backend keeps working.
async fn follow_job(
    client: &api::ApiClient,
    tracker: &mut JobTracker,
    outline: Option<PathBuf>,
    detach_after: Option<u64>,
) -> anyhow::Result<()> {
    let job_id = tracker.job_id().unwrap_or_default().to_string();
    println!("Waiting for outline job {job_id} (Ctrl-C to abort)...");

    let handle = tracker.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !handle.abort() {
            debug!(state = ?handle.state(), "nothing to abort");
        }
    });
    let detacher = detach_after.map(|secs| {
        let handle = tracker.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs.max(1))).await;
            handle.detach();
        })
    });

    let state = tracker.poll(client).await;
    interrupt.abort();
    if let Some(detacher) = detacher {
        detacher.abort();
    }

    match state {
        TrackerState::Completed(text) => {
            match outline {
                Some(path) => {
                    std::fs::write(&path, &text)?;
                    println!("Outline written to {}.", path.display());
                }
                None => println!("{text}"),
            }
            Ok(())
        }
        TrackerState::Failed(message) => anyhow::bail!("outline generation failed: {message}"),
        TrackerState::TimedOut => {
            println!("This is taking longer than expected; the job continues in the background.");
            reattach_hint(&job_id);
            Ok(())
        }
        TrackerState::Submitted => {
            println!("Stopped waiting; outline job {job_id} continues in the background.");
            reattach_hint(&job_id);
            Ok(())
        }
        TrackerState::Aborted => {
            let kept = tracker.edit().current().map_or(0, str::len);
            println!("Aborted. The previous outline ({kept} bytes) was kept.");
            Ok(())
        }
        other => {
            warn!(state = ?other, "polling stopped early");
            Ok(())
        }
    }
}

async fn watch_dashboard(backend: Backend, range: DateRange, every: Duration) {
    let (stop, stopped) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop.send(true);
        }
    });

    info!(every = ?every, %range, "watching dashboard (Ctrl-C to stop)");
    let fetch = move || {
        let backend = backend.clone();
        async move {
            let snapshot = backend.snapshot().await?;
            Ok::<_, anyhow::Error>(analytics::build_dashboard(&snapshot, range, Utc::now()))
        }
    };

    refresh::run(every, stopped, fetch, |seq, dashboard: &models::Dashboard| {
        debug!(seq, "dashboard refreshed");
        println!("{}", report::build_report(dashboard));
    })
    .await;
    interrupt.abort();
}
