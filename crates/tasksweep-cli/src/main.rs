use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use tasksweep::config::{
    resolve_account, resolve_environment, resolve_headless, resolve_keep_open,
};
use tasksweep::store::file::DEFAULT_COOKIE_FILE;
use tasksweep::store::sqlite::DEFAULT_DB_FILE;
use tasksweep::store::{RunLedger, SessionBackend, TaskRepository};
use tasksweep::types::{RunId, RunReport, RunStatus};
use tasksweep::{
    ChromiumDriver, Credentials, FileSessionBackend, LaunchOptions, Orchestrator, SessionStore,
    SiteProfile, SqliteStore,
};

#[derive(Parser)]
#[command(name = "tasksweep")]
#[command(about = "Syncs the SmartSites assignments report into local task storage", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        long = "db",
        env = "TASKSWEEP_DB",
        default_value = DEFAULT_DB_FILE,
        global = true,
        help = "Path of the SQLite database holding sessions, tasks and runs"
    )]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in if needed, scrape the assignments report and store every task
    Run {
        #[arg(long, env = "SMARTSITES_EMAIL", help = "SmartSites login email")]
        email: Option<String>,

        #[arg(
            long,
            env = "SMARTSITES_PASSWORD",
            hide_env_values = true,
            help = "SmartSites login password"
        )]
        password: Option<String>,

        #[arg(long, env = "RUN_ID", help = "Run identifier supplied by the host")]
        run_id: Option<String>,

        #[arg(
            long,
            env = "SESSION_IDENTIFIER",
            help = "Account name the stored session is filed under (defaults to the email)"
        )]
        session_identifier: Option<String>,

        #[arg(long, env = "HEADLESS", help = "Run the browser headless (true/false)")]
        headless: Option<String>,

        #[arg(long, env = "APP_ENV", help = "Deployment environment; production implies headless")]
        app_env: Option<String>,

        #[arg(long, env = "NODE_ENV", hide = true)]
        node_env: Option<String>,

        #[arg(
            long,
            env = "KEEP_BROWSER_OPEN",
            help = "Keep the browser open after the run until Ctrl-C (true/false)"
        )]
        keep_browser_open: Option<String>,

        #[arg(
            long,
            env = "SESSION_COOKIE_PATH",
            default_value = DEFAULT_COOKIE_FILE,
            help = "Local session cookie file"
        )]
        cookie_file: PathBuf,

        #[arg(long, env = "CHROME_PATH", help = "Chrome/Chromium executable to launch")]
        chrome_path: Option<PathBuf>,

        #[arg(long, default_value = "automated", help = "Recorded as the run's initiator")]
        initiated_by: String,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show recent runs and totals by status
    Runs {
        #[arg(
            long,
            default_value = "20",
            help = "Maximum number of runs to show",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        limit: u16,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// List stored tasks
    Tasks {
        #[arg(
            long,
            default_value = "50",
            help = "Maximum number of tasks to show",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        limit: u16,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn database_error(db: &Path, error: &dyn std::fmt::Display, cookie_file: Option<&Path>) -> String {
    let mut message = format!("Error opening database {}: {}", db.display(), error);
    if let Some(file) = cookie_file {
        message.push_str(&format!(
            "; stopping before the local session file {} was consulted",
            file.display()
        ));
    }
    message
}

fn exit_code(report: &RunReport) -> i32 {
    match report.status {
        RunStatus::Completed => 0,
        RunStatus::Running | RunStatus::Failed => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let cookie_file = match &cli.command {
        Commands::Run { cookie_file, .. } => Some(cookie_file.as_path()),
        _ => None,
    };
    let store = SqliteStore::open(&cli.db).unwrap_or_else(|e| {
        log::error!("{}", database_error(&cli.db, &e, cookie_file));
        process::exit(1);
    });

    match cli.command {
        Commands::Run {
            email,
            password,
            run_id,
            session_identifier,
            headless,
            app_env,
            node_env,
            keep_browser_open,
            cookie_file,
            chrome_path,
            initiated_by,
            format,
        } => {
            let (Some(email), Some(password)) = (non_empty(email), non_empty(password)) else {
                log::error!("SMARTSITES_EMAIL and SMARTSITES_PASSWORD must both be set");
                process::exit(1);
            };
            let credentials = Credentials { email, password };
            let account = resolve_account(session_identifier.as_deref(), Some(&credentials.email));
            let run_id = non_empty(run_id)
                .map(RunId::new)
                .unwrap_or_else(RunId::generate);
            let environment = resolve_environment(app_env.as_deref(), node_env.as_deref());
            let headless = resolve_headless(headless.as_deref(), environment);
            let keep_open = resolve_keep_open(keep_browser_open.as_deref(), headless);
            let profile = SiteProfile::default();

            let file_tier = FileSessionBackend::new(cookie_file);
            log::debug!(
                "Session tiers: {} ({}), {} ({})",
                store.name(),
                cli.db.display(),
                file_tier.name(),
                file_tier.path().display()
            );
            let sessions = SessionStore::new(vec![Box::new(store.clone()), Box::new(file_tier)]);

            let driver = ChromiumDriver::launch(LaunchOptions {
                headless,
                executable: chrome_path,
                typing_delay: profile.timeouts.typing_delay,
            })
            .await
            .unwrap_or_else(|e| {
                log::error!("Error launching browser: {}", e);
                let report = RunReport {
                    status: RunStatus::Failed,
                    found: 0,
                    saved: 0,
                    created: 0,
                    updated: 0,
                    duration_seconds: 0,
                    error: Some(e.to_string()),
                };
                if let Err(e) = store
                    .open_run(&run_id, &initiated_by)
                    .and_then(|_| store.finish(&run_id, &report))
                {
                    log::warn!("Could not record failed run {}: {}", run_id, e);
                }
                process::exit(1);
            });

            let orchestrator = Orchestrator {
                profile: &profile,
                credentials: &credentials,
                sessions: &sessions,
                tasks: &store,
                ledger: Some(&store),
            };
            let report = orchestrator
                .run(&driver, &account, run_id, &initiated_by)
                .await;

            match format {
                OutputFormat::Json => serialize_json(&report),
                OutputFormat::Text => print!("{}", report),
            }

            if keep_open {
                log::info!("Keeping the browser open, press Ctrl-C to exit");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::warn!("Could not listen for Ctrl-C: {}", e);
                }
            }
            if let Err(e) = driver.close().await {
                log::warn!("Error closing browser: {}", e);
            }

            process::exit(exit_code(&report));
        }

        Commands::Runs { limit, format } => {
            let runs = store.recent_runs(limit as usize).unwrap_or_else(|e| {
                log::error!("Error reading runs: {}", e);
                process::exit(1);
            });
            let stats = store.stats().unwrap_or_else(|e| {
                log::error!("Error reading run statistics: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&serde_json::json!({
                    "runs": runs,
                    "stats": stats,
                })),
                OutputFormat::Text => {
                    if runs.is_empty() {
                        println!("No runs recorded.");
                    } else {
                        for (i, run) in runs.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, run);
                        }
                    }
                    print!("{}", stats);
                }
            }
        }

        Commands::Tasks { limit, format } => {
            let tasks = store.list(limit as usize).unwrap_or_else(|e| {
                log::error!("Error reading tasks: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&tasks),
                OutputFormat::Text => {
                    if tasks.is_empty() {
                        println!("No tasks stored.");
                    } else {
                        for (i, task) in tasks.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, task);
                        }
                    }
                }
            }
        }
    }
}
