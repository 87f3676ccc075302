use clap::{Parser, Subcommand};
use host_probe::ipc::{ProbeRequest, ProbeResponse};
use host_probe::{logging, ProbeConfig};
use log::{error, info};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "hostprobe", version, about = "Inspect processes and serve probe requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Owner account of a process
    User {
        #[arg(default_value_t = 0, help = "process id, 0 for this process")]
        pid: u32,
        #[arg(long, help = "omit the domain part")]
        no_domain: bool,
    },
    /// Owner SID of a process
    Sid {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// Working set and CPU times
    Memory {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// I/O operation and byte counters
    Io {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// Environment variables of a process
    Env {
        #[arg(default_value_t = 0)]
        pid: u32,
        #[arg(long, help = "print only this variable")]
        key: Option<String>,
    },
    /// Current directory of a process
    Cwd {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// Image path of a process
    Image {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// Command line of a process
    Cmdline {
        #[arg(default_value_t = 0)]
        pid: u32,
    },
    /// Terminate a process
    Kill {
        pid: u32,
        #[arg(long, default_value_t = 1)]
        exit_code: u32,
        #[arg(long, help = "milliseconds to wait for the process to exit")]
        wait: Option<u64>,
    },
    /// Run the probe server on the configured pipe
    Serve {
        #[arg(long, help = "pipe name, overrides HOST_PROBE_PIPE_NAME")]
        pipe: Option<String>,
    },
    /// Send one JSON request to a running server
    Query {
        #[arg(help = r#"request, e.g. '{"type":"Sid","pid":4}'"#)]
        request: String,
        #[arg(long)]
        pipe: Option<String>,
    },
}

fn main() -> ExitCode {
    let config = host_probe::initialize().clone();

    if let Ok(dsn) = std::env::var("HOST_PROBE_SENTRY_DSN") {
        let environment = std::env::var("SENTRY_ENVIRONMENT").ok();
        if logging::init_sentry(Some(&dsn), environment.as_deref()) {
            info!("[CLI] Sentry monitoring initialized - Environment: {:?}", environment);
        }
    }

    let cli = Cli::parse();
    let code = match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("[CLI] {}", message);
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    };

    logging::shutdown_sentry();
    code
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn show<T: Serialize>(result: host_probe::Result<T>) -> Result<(), String> {
    print_json(&result.map_err(|e| e.to_string())?)
}

fn run(command: Commands, mut config: ProbeConfig) -> Result<(), String> {
    use host_probe::process;

    match command {
        Commands::User { pid, no_domain } => {
            let prepend = config.prepend_domain && !no_domain;
            let account = process::process_user_name(pid, prepend).map_err(|e| e.to_string())?;
            print_json(&serde_json::json!({
                "account": account,
                "display": account.to_legacy_string(prepend),
            }))
        }
        Commands::Sid { pid } => show(process::process_sid(pid)),
        Commands::Memory { pid } => show(process::process_memory_info(pid)),
        Commands::Io { pid } => show(process::process_io_counters(pid)),
        Commands::Env { pid, key } => {
            let vars = process::process_environment(pid).map_err(|e| e.to_string())?;
            match key {
                Some(key) => match process::env_block::lookup(&vars, &key) {
                    Some(value) => print_json(&value),
                    None => Err(format!("{} is not set in process {}", key, pid)),
                },
                None => print_json(&vars),
            }
        }
        Commands::Cwd { pid } => show(process::process_current_directory(pid)),
        Commands::Image { pid } => show(process::process_image_path(pid)),
        Commands::Cmdline { pid } => show(process::process_command_line(pid)),
        Commands::Kill {
            pid,
            exit_code,
            wait,
        } => show(process::terminate(
            pid,
            exit_code,
            wait.map(std::time::Duration::from_millis),
        )),
        Commands::Serve { pipe } => {
            if let Some(pipe) = pipe {
                config.pipe_name = host_probe::pipe::pipe_path(&pipe);
            }
            serve(&config)
        }
        Commands::Query { request, pipe } => {
            if let Some(pipe) = pipe {
                config.pipe_name = host_probe::pipe::pipe_path(&pipe);
            }
            let request = ProbeRequest::from_json(&request).map_err(|e| e.to_string())?;
            let response = send(&config, &request)?;
            print_json(&response)
        }
    }
}

#[cfg(windows)]
fn serve(config: &ProbeConfig) -> Result<(), String> {
    use host_probe::ipc::{ProbeServer, RequestHandler};

    let server = ProbeServer::bind(config).map_err(|e| e.to_string())?;
    info!("[CLI] Serving on {}", server.name());
    let stats = server
        .run(RequestHandler::handle_request)
        .map_err(|e| e.to_string())?;
    info!(
        "[CLI] Served {} clients, {} requests",
        stats.clients, stats.requests
    );
    Ok(())
}

#[cfg(not(windows))]
fn serve(_config: &ProbeConfig) -> Result<(), String> {
    Err(host_probe::ProbeError::NotImplemented("serve").to_string())
}

#[cfg(windows)]
fn send(config: &ProbeConfig, request: &ProbeRequest) -> Result<ProbeResponse, String> {
    host_probe::ipc::query(config, request).map_err(|e| e.to_string())
}

#[cfg(not(windows))]
fn send(_config: &ProbeConfig, request: &ProbeRequest) -> Result<ProbeResponse, String> {
    // Handled in-process so requests can still be tried out.
    if request.request == host_probe::ipc::ProbeRequestType::Shutdown {
        return Err(host_probe::ProbeError::NotImplemented("query").to_string());
    }
    Ok(host_probe::ipc::RequestHandler::handle_request(request.clone()))
}
