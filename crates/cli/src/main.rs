use std::{
    fs::File,
    io::{BufReader, BufWriter, Read},
    path::PathBuf,
    time::Instant,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_model::{ChatRole, DEFAULT_RETENTION_LIMIT, RunStatus};
use store_sqlite::SqliteStore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transfer::{FramingPolicy, ImportOptions};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "runvault")]
#[command(about = "Local store for analysis runs, their cards, evidence and chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Config file; defaults to <config_dir>/runvault/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database file; overrides [store] path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Run ceiling enforced after each creation; overrides [retention] limit.
    #[arg(long, global = true)]
    retention_limit: Option<usize>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    Init,
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    Cards {
        #[command(subcommand)]
        command: CardsCommand,
    },
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommand,
    },
    Threads {
        #[command(subcommand)]
        command: ThreadsCommand,
    },
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    Export(ExportArgs),
    Import(ImportArgs),
    /// Evict the oldest runs beyond the retention limit.
    Retention {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Copy the database file to <dir>/app-YYYYMMDD.db.
    Backup {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Doctor,
}

#[derive(Subcommand)]
enum RunsCommand {
    Create,
    List,
    Show { run_id: i64 },
    Status {
        run_id: i64,
        #[arg(value_enum)]
        status: StatusOpt,
    },
    Delete { run_id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusOpt {
    Pending,
    Running,
    Done,
    Error,
}

impl From<StatusOpt> for RunStatus {
    fn from(opt: StatusOpt) -> Self {
        match opt {
            StatusOpt::Pending => RunStatus::Pending,
            StatusOpt::Running => RunStatus::Running,
            StatusOpt::Done => RunStatus::Done,
            StatusOpt::Error => RunStatus::Error,
        }
    }
}

#[derive(Subcommand)]
enum CardsCommand {
    Upsert {
        run_id: i64,
        #[arg(long = "type")]
        kind: String,
        /// Card payload as JSON.
        #[arg(long)]
        data: String,
    },
    List { run_id: i64 },
}

#[derive(Subcommand)]
enum EvidenceCommand {
    Add {
        card_id: i64,
        /// Raw evidence text; read from stdin when omitted.
        raw: Option<String>,
    },
    List { card_id: i64 },
}

#[derive(Subcommand)]
enum ThreadsCommand {
    Create {
        run_id: i64,
        #[arg(long)]
        title: String,
    },
    List { run_id: i64 },
}

#[derive(Subcommand)]
enum MessagesCommand {
    Add {
        thread_id: i64,
        #[arg(long, value_enum)]
        role: RoleOpt,
        content: String,
    },
    List { thread_id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleOpt {
    User,
    Assistant,
}

impl From<RoleOpt> for ChatRole {
    fn from(opt: RoleOpt) -> Self {
        match opt {
            RoleOpt::User => ChatRole::User,
            RoleOpt::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Args)]
struct ExportArgs {
    run_id: i64,
    /// Destination file; defaults to run-<id>.ndjson.gz.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ImportArgs {
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = MalformedOpt::Skip)]
    on_malformed: MalformedOpt,
}

#[derive(Clone, Copy, ValueEnum)]
enum MalformedOpt {
    Skip,
    Abort,
}

impl From<MalformedOpt> for FramingPolicy {
    fn from(opt: MalformedOpt) -> Self {
        match opt {
            MalformedOpt::Skip => FramingPolicy::Skip,
            MalformedOpt::Abort => FramingPolicy::Abort,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = Config::load(cli.config.as_deref())?;
    let t = Instant::now();

    let db_path = cli
        .db
        .clone()
        .or_else(|| config.store.path.clone())
        .unwrap_or_else(store_sqlite::default_db_path);
    let retention_limit = cli
        .retention_limit
        .or(config.retention.limit)
        .unwrap_or(DEFAULT_RETENTION_LIMIT);

    info!(path = %db_path.display(), "opening database");
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?
        .with_retention_limit(retention_limit);
    store.init_schema()?;

    match cli.command {
        Commands::Init => {
            info!(elapsed = ?t.elapsed(), "initialized");
            println!("{}", db_path.display());
        }
        Commands::Runs { command } => match command {
            RunsCommand::Create => {
                let run = store.create_run()?;
                info!(run_id = run.id, "run created");
                println!("{}", run.id);
            }
            RunsCommand::List => {
                let runs = store.list_runs()?;
                info!(runs = runs.len(), "runs listed");
                for r in &runs {
                    println!("{} {} {}", r.id, r.status, r.created_at.to_rfc3339());
                }
            }
            RunsCommand::Show { run_id } => {
                let run = store
                    .get_run(run_id)?
                    .with_context(|| format!("run {run_id} not found"))?;
                let cards = store.list_cards(run_id)?;
                let threads = store.list_threads(run_id)?;
                println!("{}", serde_json::to_string_pretty(&run)?);
                println!("cards={} threads={}", cards.len(), threads.len());
            }
            RunsCommand::Status { run_id, status } => {
                let run = store
                    .update_run_status(run_id, status.into())
                    .with_context(|| format!("failed to update run {run_id}"))?;
                println!("{} {}", run.id, run.status);
            }
            RunsCommand::Delete { run_id } => {
                let deleted = store
                    .delete_run(run_id)
                    .with_context(|| format!("failed to delete run {run_id}"))?;
                info!(run_id, ?deleted, "run deleted");
                println!(
                    "deleted run {run_id}: cards={} evidence={} threads={} messages={} files={}",
                    deleted.cards, deleted.evidence, deleted.threads, deleted.messages, deleted.files
                );
            }
        },
        Commands::Cards { command } => match command {
            CardsCommand::Upsert { run_id, kind, data } => {
                let data: serde_json::Value =
                    serde_json::from_str(&data).with_context(|| "--data is not valid JSON")?;
                let card = store.upsert_card(run_id, &kind, &data)?;
                println!("{}", card.id);
            }
            CardsCommand::List { run_id } => {
                let cards = store.list_cards(run_id)?;
                info!(cards = cards.len(), "cards listed");
                for c in &cards {
                    println!("{} {} {}", c.id, c.kind, c.data);
                }
            }
        },
        Commands::Evidence { command } => match command {
            EvidenceCommand::Add { card_id, raw } => {
                let raw = match raw {
                    Some(raw) => raw,
                    None => {
                        let mut buf = String::new();
                        std::io::stdin()
                            .read_to_string(&mut buf)
                            .with_context(|| "failed to read evidence from stdin")?;
                        buf
                    }
                };
                let evidence = store.append_evidence(card_id, &raw)?;
                println!("{}", evidence.id);
            }
            EvidenceCommand::List { card_id } => {
                let rows = store.list_evidence(card_id)?;
                info!(evidence = rows.len(), "evidence listed");
                for e in &rows {
                    println!("{} {} {}", e.id, e.created_at.to_rfc3339(), e.raw);
                }
            }
        },
        Commands::Threads { command } => match command {
            ThreadsCommand::Create { run_id, title } => {
                let thread = store.create_thread(run_id, &title)?;
                println!("{}", thread.id);
            }
            ThreadsCommand::List { run_id } => {
                let threads = store.list_threads(run_id)?;
                info!(threads = threads.len(), "threads listed");
                for th in &threads {
                    println!("{} {}", th.id, th.title);
                }
            }
        },
        Commands::Messages { command } => match command {
            MessagesCommand::Add {
                thread_id,
                role,
                content,
            } => {
                let message = store.append_message(thread_id, role.into(), &content)?;
                println!("{}", message.id);
            }
            MessagesCommand::List { thread_id } => {
                let messages = store.list_messages(thread_id)?;
                info!(messages = messages.len(), "messages listed");
                for m in &messages {
                    println!("{} [{}] {}", m.created_at.to_rfc3339(), m.role, m.content);
                }
            }
        },
        Commands::Export(args) => {
            let out_path = args
                .output
                .unwrap_or_else(|| PathBuf::from(format!("run-{}.ndjson.gz", args.run_id)));
            store.require_run(args.run_id)?;
            let file = File::create(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
            let summary = transfer::export_run(&store, args.run_id, BufWriter::new(file))
                .with_context(|| format!("export of run {} failed", args.run_id))?;
            info!(
                records = summary.records.total(),
                bytes = summary.bytes,
                elapsed = ?t.elapsed(),
                "export written"
            );
            println!("{} blake3={}", out_path.display(), summary.digest);
        }
        Commands::Import(args) => {
            let file = File::open(&args.input)
                .with_context(|| format!("failed to open {}", args.input.display()))?;
            let options = ImportOptions {
                on_malformed: args.on_malformed.into(),
                ..ImportOptions::default()
            };
            let summary = transfer::import_run(&store, BufReader::new(file), options)
                .with_context(|| format!("import of {} failed", args.input.display()))?;
            info!(elapsed = ?t.elapsed(), "import done");
            println!(
                "applied={} ignored={} malformed={} orphaned={} rejected={} unknown={} trailing_bytes={}",
                summary.applied.total(),
                summary.ignored,
                summary.malformed,
                summary.orphaned,
                summary.rejected,
                summary.unknown,
                summary.trailing_bytes
            );
            println!("blake3={}", summary.digest);
        }
        Commands::Retention { limit } => {
            let limit = limit.unwrap_or(store.retention_limit());
            let evicted = store.enforce_retention(limit)?;
            info!(limit, evicted = evicted.len(), "retention enforced");
            for id in &evicted {
                println!("evicted {id}");
            }
        }
        Commands::Backup { dir } => {
            let dir = dir.unwrap_or_else(|| config.backup_dir());
            let path = store
                .snapshot_to(&dir)
                .with_context(|| format!("backup into {} failed", dir.display()))?;
            info!(elapsed = ?t.elapsed(), "backup written");
            println!("{}", path.display());
        }
        Commands::Doctor => {
            info!("running integrity check");
            let check = store.integrity_check()?;
            let counts = store.counts()?;
            info!(elapsed = ?t.elapsed(), "integrity check done");
            println!("integrity_check={check}");
            println!(
                "runs={} cards={} evidence={} threads={} messages={} files={}",
                counts.runs,
                counts.cards,
                counts.evidence,
                counts.threads,
                counts.messages,
                counts.files
            );
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
