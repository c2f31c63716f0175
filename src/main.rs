use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cloudbench::auth::{AuthProvider, ProfileAuthProvider};
use cloudbench::framework::set_page_size;
use cloudbench::{ConfFile, ConnectorRegistry, Engine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CLOUDBENCH_LOG";

/// Audit cloud resources against compliance baselines
#[derive(Parser, Debug)]
#[command(name = "cloudbench", version, about, long_about = None)]
struct Args {
    /// Benchmark file with options, profiles, listors and baselines
    #[arg(short, long)]
    conf_file: PathBuf,

    /// Tags of the baselines to run; every tagged baseline when omitted
    #[arg(short, long)]
    tag: Vec<String>,

    /// Directory holding credential profile files (defaults to the
    /// directory of the benchmark file)
    #[arg(long)]
    auth_dir: Option<PathBuf>,

    /// Only report resources in risk
    #[arg(long)]
    risk_only: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Log file, defaults to cloudbench/logs/cloudbench.log under the
    /// user's state directory
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive for the crate's own spans and events
    fn directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

/// Route scan diagnostics to a log file so stdout carries only the report
///
/// `CLOUDBENCH_LOG` overrides the level with a full filter expression.
fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => match level.directive() {
            Some(directive) => EnvFilter::new(format!("cloudbench={}", directive)),
            None => return Ok(None),
        },
    };

    let path = log_file.map(Path::to_path_buf).unwrap_or_else(default_log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("log file needs a file name")?;
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .with_context(|| format!("Failed to open log file {:?}", path))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::debug!("cloudbench {} logging to {:?}", cloudbench::VERSION, path);
    Ok(Some(guard))
}

fn default_log_file() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("cloudbench")
        .join("logs")
        .join("cloudbench.log")
}

fn default_auth_dir(conf_file: &Path) -> PathBuf {
    conf_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = match init_tracing(args.log_level, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("logging disabled: {:#}", e);
            None
        }
    };

    let mut conf = ConfFile::load(&args.conf_file)
        .with_context(|| format!("Failed to load {:?}", args.conf_file))?;
    if args.risk_only {
        conf.option.output_risk_only = true;
    }
    if conf.option.page_size >= 10 {
        set_page_size(conf.option.page_size);
    }

    let auth_dir = args
        .auth_dir
        .clone()
        .unwrap_or_else(|| default_auth_dir(&args.conf_file));
    let auth: Arc<dyn AuthProvider> =
        Arc::new(ProfileAuthProvider::new(conf.profile.clone(), auth_dir));

    let registry = ConnectorRegistry::with_defaults(Duration::from_secs(
        conf.option.request_timeout_secs,
    ));
    let engine = Engine::new(conf, Arc::new(registry)).context("Invalid benchmark definition")?;

    let report = engine.scan(&args.tag, auth).await?;
    let total: usize = report.baselines.iter().map(|b| b.findings.len()).sum();
    tracing::info!("{} finding(s) in {} baseline(s)", total, report.baselines.len());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
