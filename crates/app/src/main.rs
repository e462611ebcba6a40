use std::fmt;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use assess_core::model::CandidateId;
use services::{BackendClient, BackendConfig, Clock, SessionEngine, TimerConfig};
use storage::repository::Storage;

mod repl;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    MissingAccessCode,
    MissingCandidate,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::MissingAccessCode => write!(f, "assessment requires --code <access_code>"),
            ArgsError::MissingCandidate => {
                write!(f, "a candidate is required: pass --candidate or set ASSESS_CANDIDATE")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  app assessment --code <access_code> [--candidate <email>] [--db <sqlite_url>] [--api <url>]");
    eprintln!("  app practice   [--candidate <email>] [--db <sqlite_url>] [--api <url>]");
    eprintln!("  app resume     [--db <sqlite_url>] [--api <url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db  sqlite:assess.sqlite3");
    eprintln!("  --api http://localhost:8080/api");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ASSESS_DB_URL, ASSESS_CANDIDATE, ASSESS_API_BASE_URL, ASSESS_API_TOKEN,");
    eprintln!("  ASSESS_HTTP_TIMEOUT_SECS, ASSESS_TICK_MS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Assessment,
    Practice,
    Resume,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "assessment" => Some(Self::Assessment),
            "practice" => Some(Self::Practice),
            "resume" => Some(Self::Resume),
            _ => None,
        }
    }
}

struct Args {
    command: Command,
    db_url: String,
    api_url: Option<String>,
    access_code: Option<String>,
    candidate: Option<CandidateId>,
}

impl Args {
    fn parse(
        command: Command,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("ASSESS_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| normalize_sqlite_url("sqlite:assess.sqlite3".into()), normalize_sqlite_url);
        let mut candidate = std::env::var("ASSESS_CANDIDATE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(CandidateId::new);
        let mut api_url = None;
        let mut access_code = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--api" => api_url = Some(require_value(args, "--api")?),
                "--code" if command == Command::Assessment => {
                    access_code = Some(require_value(args, "--code")?);
                }
                "--candidate" if command != Command::Resume => {
                    candidate = Some(CandidateId::new(require_value(args, "--candidate")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        match command {
            Command::Assessment if access_code.is_none() => return Err(ArgsError::MissingAccessCode),
            Command::Assessment | Command::Practice if candidate.is_none() => {
                return Err(ArgsError::MissingCandidate);
            }
            _ => {}
        }

        Ok(Self {
            command,
            db_url,
            api_url,
            access_code,
            candidate,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1).peekable();

    let command = match argv.peek().map(String::as_str) {
        None => Command::Resume,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Resume,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if argv.peek().is_some_and(|first| !first.starts_with("--")) {
        argv.next();
    }

    let parsed = Args::parse(command, &mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup so drafts survive restarts.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    let mut backend_config = BackendConfig::from_env()?;
    if let Some(api_url) = parsed.api_url {
        backend_config.base_url = api_url;
    }
    tracing::info!(api = %backend_config.base_url, db = %parsed.db_url, "starting");
    let backend = Arc::new(BackendClient::new(backend_config)?);

    let observer = Arc::new(repl::TerminalObserver::default());
    let engine = SessionEngine::new(
        Clock::default_clock(),
        Arc::clone(&storage.sessions),
        backend.clone(),
        backend.clone(),
        backend,
    )
    .with_observer(observer)
    .with_timer_config(TimerConfig::from_env());

    let session = match (parsed.command, parsed.candidate) {
        (Command::Resume, _) => match engine.resume().await? {
            Some(session) => session,
            None => {
                println!("No unfinished session.");
                return Ok(());
            }
        },
        (Command::Assessment, Some(candidate)) => {
            let code = parsed.access_code.unwrap_or_default();
            engine.start_assessment(&code, &candidate).await?
        }
        (Command::Practice, Some(candidate)) => engine.start_practice(&candidate).await?,
        (_, None) => return Err(ArgsError::MissingCandidate.into()),
    };

    repl::interact(session).await
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
