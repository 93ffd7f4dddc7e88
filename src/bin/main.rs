use std::{
    fs,
    path::PathBuf,
    process,
    sync::Arc,
    time::Duration,
};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetctl::{
    cli::{self, Cli, Commands, SecretsAction, ServicesAction},
    clients::{mail::HttpMailClient, task_db::JsonFileTaskDbClient},
    config::{self, Config},
    dashboard::{self, DashboardDeps},
    error::ErrorReport,
    health::HealthMonitor,
    process::ProcessManager,
    reload::{tokenize_command_line, ReloadEngine},
    runtime,
    secrets::SecretsEnvelope,
};

fn main() {
    let args = cli::parse_args();
    init_logging(&args);
    runtime::init();

    if let Err(err) = runtime::ensure_state_tree() {
        print_fatal(ErrorReport::new(
            "failed to prepare the state directory",
            err.to_string(),
            "check permissions on your home directory and retry",
        ));
        process::exit(1);
    }

    let exit_code = match run(&args) {
        Ok(code) => code,
        Err(report) => {
            print_fatal(report);
            1
        }
    };
    process::exit(exit_code);
}

fn run(args: &Cli) -> Result<i32, ErrorReport> {
    let config_path = resolve_config_path(args);

    match &args.command {
        Commands::Up => cmd_up(&config_path),
        Commands::Down => cmd_down(),
        Commands::Services { action } => cmd_services(&config_path, action),
        Commands::Check => cmd_check(&config_path),
        Commands::Secrets { action } => cmd_secrets(action),
        Commands::Cleanup { days } => cmd_cleanup(*days),
    }
}

fn resolve_config_path(args: &Cli) -> PathBuf {
    args.config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| runtime::config_dir().join("fleet.toml"))
}

fn load_config_or_report(config_path: &PathBuf) -> Result<Config, ErrorReport> {
    config::load_config(config_path).map_err(|source| {
        ErrorReport::new(
            format!("failed to load config at {}", config_path.display()),
            source.to_string(),
            "check the TOML syntax and required fields, then retry",
        )
    })
}

fn process_manager() -> ProcessManager {
    ProcessManager::new(runtime::pid_dir(), runtime::log_dir())
}

fn secrets_envelope() -> SecretsEnvelope {
    SecretsEnvelope::new(runtime::key_path(), runtime::key_old_path())
}

fn cmd_up(config_path: &PathBuf) -> Result<i32, ErrorReport> {
    let config = load_config_or_report(config_path)?;
    let process_manager = Arc::new(process_manager());

    let mail_argv = tokenize_command_line(&config.services.mail.start_command);
    match process_manager.start(
        "mail",
        &config.services.mail.start_command,
        &mail_argv,
        &[],
    ) {
        Ok(_) => info!("mail service started"),
        Err(e) if matches!(e, fleetctl::error::ProcessManagerError::AlreadyRunning { .. }) => {
            info!("mail service already running");
        }
        Err(e) => {
            return Err(ErrorReport::new(
                "failed to start the mail service",
                e.to_string(),
                "check services.mail.start_command in your config",
            ));
        }
    }

    for (name, agent) in &config.agents {
        let argv = tokenize_command_line(&agent.command_line);
        match process_manager.start(name, &agent.command_line, &argv, &[]) {
            Ok(_) => info!(agent = %name, "agent started"),
            Err(e) if matches!(e, fleetctl::error::ProcessManagerError::AlreadyRunning { .. }) => {
                info!(agent = %name, "agent already running");
            }
            Err(e) => warn!(agent = %name, error = %e, "failed to start agent"),
        }
    }

    let health_monitor = Arc::new(HealthMonitor::new(config.agent_names()));
    let task_db = Arc::new(
        JsonFileTaskDbClient::open(PathBuf::from(&config.core.task_db_path)).map_err(|e| {
            ErrorReport::new(
                "failed to open the task database",
                e.to_string(),
                "check core.task_db_path in your config",
            )
        })?,
    );
    let mail_client = Arc::new(HttpMailClient::new(config.services.mail.url.clone()));
    let reload_engine = Arc::new(ReloadEngine::new(config_path.clone(), config.clone()));

    register_shutdown_handler(process_manager.clone());

    let deps = DashboardDeps {
        config,
        config_path: config_path.clone(),
        process_manager,
        health_monitor,
        task_db,
        mail_client,
        reload_engine,
    };

    dashboard::run(deps).map_err(|e| {
        ErrorReport::new(
            "the dashboard exited unexpectedly",
            e.to_string(),
            "check the terminal supports the required features and retry",
        )
    })?;

    Ok(0)
}

fn cmd_down() -> Result<i32, ErrorReport> {
    let manager = process_manager();
    match manager.stop_all() {
        Ok(()) => info!("all recorded processes stopped"),
        Err(e) => warn!(error = %e, "some processes failed to stop cleanly"),
    }
    Ok(0)
}

fn cmd_services(config_path: &PathBuf, action: &ServicesAction) -> Result<i32, ErrorReport> {
    let config = load_config_or_report(config_path)?;
    let manager = process_manager();

    match action {
        ServicesAction::Start => {
            let argv = tokenize_command_line(&config.services.mail.start_command);
            manager
                .start("mail", &config.services.mail.start_command, &argv, &[])
                .map_err(|e| {
                    ErrorReport::new(
                        "failed to start the mail service",
                        e.to_string(),
                        "check services.mail.start_command in your config",
                    )
                })?;
            println!("mail service started");
        }
        ServicesAction::Stop => match manager.get_process_info("mail") {
            Ok(record) => {
                manager.stop(record.pid).map_err(|e| {
                    ErrorReport::new("failed to stop the mail service", e.to_string(), "retry, or check for a stuck process manually")
                })?;
                println!("mail service stopped");
            }
            Err(_) => println!("mail service was not running"),
        },
        ServicesAction::Status => match manager.get_process_info("mail") {
            Ok(record) if manager.is_running(record.pid) => {
                println!("mail service running (pid {})", record.pid);
            }
            _ => println!("mail service not running"),
        },
    }
    Ok(0)
}

fn cmd_check(config_path: &PathBuf) -> Result<i32, ErrorReport> {
    let mut ok = true;

    match config::load_config(config_path) {
        Ok(config) => {
            println!("config: OK ({} agents)", config.agents.len());
        }
        Err(e) => {
            println!("config: FAILED ({e})");
            ok = false;
        }
    }

    let envelope = secrets_envelope();
    match envelope.recipient() {
        Ok(_) => println!("secrets: OK (identity key present)"),
        Err(e) => {
            println!("secrets: FAILED ({e})");
            ok = false;
        }
    }

    for tool in [fleetctl::constants::AGE_BINARY, fleetctl::constants::AGE_KEYGEN_BINARY] {
        match which_on_path(tool) {
            true => println!("{tool}: OK (found on PATH)"),
            false => {
                println!("{tool}: FAILED (not found on PATH)");
                ok = false;
            }
        }
    }

    Ok(if ok { 0 } else { 1 })
}

fn cmd_secrets(action: &SecretsAction) -> Result<i32, ErrorReport> {
    let envelope = secrets_envelope();

    match action {
        SecretsAction::Init => {
            envelope.generate_key().map_err(|e| {
                ErrorReport::new("failed to generate an identity key", e.to_string(), "run `secrets init` after installing `age-keygen`")
            })?;
            println!("identity key generated");
        }
        SecretsAction::Encrypt { path } => {
            let out = envelope.encrypt(&PathBuf::from(path)).map_err(|e| {
                ErrorReport::new("failed to encrypt secrets file", e.to_string(), "run `secrets init` first if no identity key exists")
            })?;
            println!("encrypted to {}", out.display());
        }
        SecretsAction::Decrypt { path } => {
            let out = envelope.decrypt(&PathBuf::from(path)).map_err(|e| {
                ErrorReport::new("failed to decrypt secrets file", e.to_string(), "check that the identity key matches the file's recipient")
            })?;
            println!("decrypted to {}", out.display());
        }
        SecretsAction::Rotate { paths } => {
            let files: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
            envelope.rotate(&files).map_err(|e| {
                ErrorReport::new("key rotation failed", e.to_string(), "no files were changed; fix the reported error and retry")
            })?;
            println!("key rotated, {} file(s) re-encrypted", files.len());
        }
        SecretsAction::Status => match envelope.recipient() {
            Ok(recipient) => println!("recipient: {recipient}"),
            Err(e) => println!("no usable identity key: {e}"),
        },
    }
    Ok(0)
}

fn cmd_cleanup(days: u64) -> Result<i32, ErrorReport> {
    let manager = process_manager();
    let removed = manager
        .cleanup_logs(Duration::from_secs(days.saturating_mul(86_400)))
        .map_err(|e| {
            ErrorReport::new(
                "failed to prune log files",
                e.to_string(),
                "check permissions on the log directory",
            )
        })?;
    println!("removed {removed} log file(s) older than {days} day(s)");
    Ok(0)
}

fn register_shutdown_handler(process_manager: Arc<ProcessManager>) {
    let result = ctrlc::set_handler(move || {
        warn!("received shutdown signal, stopping all agents");
        if let Err(e) = process_manager.stop_all() {
            warn!(error = %e, "stop_all reported failures during shutdown");
        }
        process::exit(0);
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to install signal handler");
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    runtime::init();
    let log_dir = runtime::log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log directory {}: {e}", log_dir.display());
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }

    let log_path = log_dir.join("fleetctl.log");
    let file = match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open log file {}: {e}", log_path.display());
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || file.try_clone().expect("clone log file handle"))
        .with_ansi(false)
        .try_init();
}

fn print_fatal(report: ErrorReport) {
    eprintln!("{report}");
}

/// Checks whether `tool` is invokable, used by `fctl check` to surface a
/// missing `age`/`age-keygen` binary before the operator hits it mid-command.
fn which_on_path(tool: &str) -> bool {
    std::process::Command::new(tool)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
