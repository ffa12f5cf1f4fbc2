use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use talent_intake_lib::core::analytics::AnalyticsQuery;
use talent_intake_lib::core::lexicon::SkillLexicon;
use talent_intake_lib::core::logging::init_tracing;
use talent_intake_lib::core::models::{DocumentInput, JobRequirements};
use talent_intake_lib::core::screening::ScreeningCriteria;
use talent_intake_lib::core::service::{
    AdvanceApplicationRequest, OverrideRequest, ScoreRequest, ScreeningRequest,
    SubmitApplicationRequest, TopMatchesRequest,
};
use talent_intake_lib::core::settings_store::app_data_root;
use talent_intake_lib::IntakeService;

#[derive(Parser, Debug)]
#[command(
    name = "talent-intake",
    about = "Bulk resume intake, job matching and screening",
    version
)]
struct Cli {
    /// Directory holding settings, records and run reports
    #[arg(long, global = true, env = "TALENT_INTAKE_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a job version from a JSON file
    PublishJob { file: PathBuf },
    /// Close a job by publishing a closed revision
    CloseJob { job_id: String },
    /// Parse, score and store a batch of resumes for a job
    Ingest(IngestArgs),
    /// Recompute and store one candidate's score
    Score(JobTarget),
    /// List the best-scoring candidates for a job version
    Matches(MatchesArgs),
    /// Run screening rules over candidates scored against a job version
    Screen(ScreenArgs),
    /// Resolve held screening decisions
    Override(OverrideArgs),
    /// Print analytics rollups
    Analytics(AnalyticsArgs),
    /// Validate a skill lexicon file
    CheckLexicon { file: PathBuf },
    /// Submit an application for a candidate
    Apply { candidate_id: String, job_id: String },
    /// Move an application to its next status
    Advance {
        application_id: String,
        /// submitted, under_review, screened, interview, offer or rejected
        status: String,
    },
    /// List retained run ids, newest first
    Runs,
    /// Print a saved batch report
    Report { run_id: String },
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    job: String,
    #[arg(long)]
    version: Option<u32>,
    #[arg(long)]
    run_id: Option<String>,
    /// Resume files or directories of resumes
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct JobTarget {
    #[arg(long)]
    candidate: String,
    #[arg(long)]
    job: String,
    #[arg(long)]
    version: Option<u32>,
}

#[derive(Args, Debug)]
struct MatchesArgs {
    #[arg(long)]
    job: String,
    #[arg(long)]
    version: Option<u32>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long, default_value_t = 0.0)]
    min_score: f64,
}

#[derive(Args, Debug)]
struct ScreenArgs {
    #[arg(long)]
    job: String,
    #[arg(long)]
    version: Option<u32>,
    /// Screening criteria JSON; defaults apply when omitted
    #[arg(long)]
    criteria: Option<PathBuf>,
    /// Restrict to these candidate ids
    #[arg(long, value_delimiter = ',')]
    candidates: Option<Vec<String>>,
}

#[derive(Args, Debug)]
struct OverrideArgs {
    #[arg(long)]
    job: String,
    #[arg(long)]
    version: Option<u32>,
    /// passed or failed
    #[arg(long)]
    status: String,
    #[arg(long)]
    actor: String,
    #[arg(required = true)]
    candidates: Vec<String>,
}

#[derive(Args, Debug)]
struct AnalyticsArgs {
    #[arg(long)]
    job: Option<String>,
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let data_dir = cli.data_dir.unwrap_or_else(app_data_root);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let service = Arc::new(IntakeService::open(&data_dir).await?);

    match cli.command {
        Command::PublishJob { file } => {
            let job: JobRequirements = read_json(&file).await?;
            print_json(&service.publish_job(job).await?)
        }
        Command::CloseJob { job_id } => print_json(&service.close_job(&job_id).await?),
        Command::Ingest(args) => run_ingest(service, args).await,
        Command::Score(target) => {
            let score = service
                .score_candidate(ScoreRequest {
                    candidate_id: target.candidate,
                    job_id: target.job,
                    job_version: target.version,
                })
                .await?;
            print_json(&score)
        }
        Command::Matches(args) => {
            let ranked = service
                .top_matches(TopMatchesRequest {
                    job_id: args.job,
                    job_version: args.version,
                    limit: args.limit,
                    min_score: args.min_score,
                })
                .await?;
            print_json(&ranked)
        }
        Command::Screen(args) => {
            let criteria = match args.criteria {
                Some(path) => read_json::<ScreeningCriteria>(&path).await?,
                None => ScreeningCriteria::default(),
            };
            let report = service
                .run_screening(ScreeningRequest {
                    job_id: args.job,
                    job_version: args.version,
                    criteria,
                    candidate_ids: args.candidates,
                })
                .await?;
            print_json(&report)
        }
        Command::Override(args) => {
            let report = service
                .override_decisions(OverrideRequest {
                    job_id: args.job,
                    job_version: args.version,
                    candidate_ids: args.candidates,
                    status: parse_label(&args.status)?,
                    actor: args.actor,
                })
                .await?;
            print_json(&report)
        }
        Command::Analytics(args) => {
            let report = service
                .get_analytics(AnalyticsQuery {
                    job_id: args.job,
                    top_skills: args.top,
                    ..AnalyticsQuery::default()
                })
                .await?;
            print_json(&report)
        }
        Command::CheckLexicon { file } => {
            let lexicon = SkillLexicon::load(&file).await?;
            println!("{} aliases loaded from {}", lexicon.len(), file.display());
            Ok(())
        }
        Command::Apply {
            candidate_id,
            job_id,
        } => {
            let application = service
                .submit_application(SubmitApplicationRequest {
                    candidate_id,
                    job_id,
                })
                .await?;
            print_json(&application)
        }
        Command::Advance {
            application_id,
            status,
        } => {
            let application = service
                .advance_application(AdvanceApplicationRequest {
                    application_id,
                    status: parse_label(&status)?,
                })
                .await?;
            print_json(&application)
        }
        Command::Runs => print_json(&service.list_runs().await?),
        Command::Report { run_id } => match service.load_report(&run_id).await? {
            Some(report) => print_json(&report),
            None => anyhow::bail!("no report retained for run {run_id}"),
        },
    }
}

async fn run_ingest(service: Arc<IntakeService>, args: IngestArgs) -> anyhow::Result<()> {
    let mut documents = Vec::new();
    for path in &args.paths {
        collect_documents(path, &mut documents).await?;
    }
    if documents.is_empty() {
        anyhow::bail!("no resume files found");
    }

    let run_id = args
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let watcher = {
        let service = Arc::clone(&service);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                service.cancel_batch(&run_id).await;
            }
        })
    };

    let report = service
        .ingest_documents(Some(run_id), &args.job, args.version, documents)
        .await;
    watcher.abort();
    print_json(&report?)
}

async fn collect_documents(path: &Path, documents: &mut Vec<DocumentInput>) -> anyhow::Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    if metadata.is_dir() {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.metadata().await?.is_file() {
                entries.push(entry.path());
            }
        }
        entries.sort();
        for entry in entries {
            documents.push(read_document(&entry).await?);
        }
    } else {
        documents.push(read_document(path).await?);
    }
    Ok(())
}

async fn read_document(path: &Path) -> anyhow::Result<DocumentInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("resume")
        .to_string();
    Ok(DocumentInput::new(file_name, bytes))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Status labels use the same snake_case names as the JSON records.
fn parse_label<T: DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .with_context(|| format!("unknown status '{raw}'"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
