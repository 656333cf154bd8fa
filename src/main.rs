//! pyrunner - stream a child interpreter to remote clients
//!
//! Serves the `/session` WebSocket endpoint (or JSON lines on stdio). Each
//! `run` command executes its source in a fresh scratch directory and the
//! child's output, errors, input requests and exit status come back as
//! positioned events.
//!
//! # Quick Start
//!
//! ```text
//! pyrunner                      # WebSocket server on 0.0.0.0:3480
//! pyrunner --port 8080          # Different port
//! pyrunner --stdio              # JSON lines on stdin/stdout
//! ```

use std::env;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pyrunner::config::Config as FileConfig;
use pyrunner::server::{stdio, ws};

/// Command line options
#[derive(Default)]
struct Options {
    /// Explicit config file
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    interpreter: Option<String>,
    scratch_root: Option<PathBuf>,
    /// Speak the protocol on stdin/stdout instead of listening
    stdio: bool,
    /// Log to this file instead of stderr
    log_file: Option<PathBuf>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("pyrunner {}", VERSION);
}

fn print_help() {
    eprintln!("pyrunner {} - stream a child interpreter to remote clients", VERSION);
    eprintln!();
    eprintln!("Usage: pyrunner [OPTIONS]");
    eprintln!();
    eprintln!("Transport options:");
    eprintln!("  (default)               WebSocket server, endpoint /session");
    eprintln!("  --stdio                 JSON lines on stdin/stdout");
    eprintln!("  --host <ADDR>           Listen address (default 0.0.0.0)");
    eprintln!("  --port <PORT>           Listen port (default 3480, env PORT)");
    eprintln!();
    eprintln!("Runner options:");
    eprintln!("  -i, --interpreter <CMD> Interpreter executable (default python3)");
    eprintln!("  --scratch-root <DIR>    Directory for session workspaces (default ./temp)");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -c, --config <FILE>     Config file (default ~/.pyrunner/config.toml)");
    eprintln!("  --log-file <FILE>       Write logs to a file instead of stderr");
    eprintln!("  -v, --version           Show version");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Protocol:");
    eprintln!("  -> [\"run\", source, sessionId]");
    eprintln!("  -> [\"input\", value, sessionId]");
    eprintln!("  <- [kind, payload, [line, column]]");
    eprintln!("     kind: output | error | expecting_input | exit");
    eprintln!("  <- [\"fault\", message, sessionId]");
    eprintln!();
    eprintln!("Log level: RUST_LOG, or server.log_level in the config file");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: usize, flag: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("Missing value for {}", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--stdio" => {
                options.stdio = true;
            }
            "--host" => {
                i += 1;
                options.host = Some(value(i, "--host")?);
            }
            "--port" => {
                i += 1;
                let port = value(i, "--port")?;
                options.port = Some(port.parse().map_err(|_| format!("Invalid port: {}", port))?);
            }
            "-i" | "--interpreter" => {
                i += 1;
                options.interpreter = Some(value(i, "--interpreter")?);
            }
            "--scratch-root" => {
                i += 1;
                options.scratch_root = Some(PathBuf::from(value(i, "--scratch-root")?));
            }
            "-c" | "--config" => {
                i += 1;
                options.config = Some(PathBuf::from(value(i, "--config")?));
            }
            "--log-file" => {
                i += 1;
                options.log_file = Some(PathBuf::from(value(i, "--log-file")?));
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, log_file: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path);
        match file {
            Ok(file) => {
                let subscriber = FmtSubscriber::builder()
                    .with_env_filter(filter)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
                return;
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", path.display(), e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_config(options: &Options) -> anyhow::Result<FileConfig> {
    let mut config = match &options.config {
        Some(path) => {
            let mut config = FileConfig::load_from(path)?;
            config.apply_env();
            config
        }
        None => FileConfig::load(),
    };

    if let Some(host) = &options.host {
        config.server.host = host.clone();
    }
    if let Some(port) = options.port {
        config.server.port = port;
    }
    if let Some(interpreter) = &options.interpreter {
        config.runner.interpreter = interpreter.clone();
    }
    if let Some(root) = &options.scratch_root {
        config.runner.scratch_root = root.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = match load_config(&options) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.server.log_level, options.log_file.as_ref());

    info!("pyrunner {} starting...", VERSION);
    info!("Interpreter: {} {:?}", config.runner.interpreter, config.runner.args);
    info!("Scratch root: {}", config.runner.scratch_root.display());

    let result = if options.stdio {
        stdio::serve(config.runner).await
    } else {
        ws::serve(&config.server, config.runner).await
    };

    if let Err(e) = &result {
        error!("Server stopped: {}", e);
    }
    result
}
