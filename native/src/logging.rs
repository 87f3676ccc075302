use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directory under the local data dir that holds the crash log.
pub const LOG_DIR_NAME: &str = "HostProbe";
pub const CRASH_LOG_FILE: &str = "native_crash.log";

static CRASH_LOG_PATH: OnceCell<PathBuf> = OnceCell::new();
static SENTRY_GUARD: Mutex<Option<sentry::ClientInitGuard>> = Mutex::new(None);

/// Initialize Sentry monitoring with optional DSN.
/// If DSN is None or empty, Sentry stays disabled.
pub fn init_sentry(dsn: Option<&str>, environment: Option<&str>) -> bool {
    let dsn_value = match dsn {
        Some(d) if !d.trim().is_empty() => d.trim(),
        _ => {
            info!("[SENTRY] No DSN provided - Sentry disabled");
            return false;
        }
    };

    let env_cow = environment.map(|e| std::borrow::Cow::Owned(e.to_string()));

    let guard = sentry::init((
        dsn_value,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: env_cow,
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    if !guard.is_enabled() {
        info!("[SENTRY] Failed to initialize");
        return false;
    }

    match SENTRY_GUARD.lock() {
        Ok(mut slot) => {
            *slot = Some(guard);
            info!("[SENTRY] Initialized - Environment: {:?}", environment);
            true
        }
        Err(_) => false,
    }
}

pub fn is_sentry_enabled() -> bool {
    SENTRY_GUARD
        .lock()
        .map(|g| g.as_ref().is_some_and(|g| g.is_enabled()))
        .unwrap_or(false)
}

/// Flush pending events and drop the Sentry client.
pub fn shutdown_sentry() {
    let guard = SENTRY_GUARD.lock().ok().and_then(|mut g| g.take());
    if let Some(guard) = guard {
        info!("[SENTRY] Shutting down - flushing events");
        drop(guard);
    }
}

/// Initialize env_logger, defaulting to `Warn` when `RUST_LOG` is unset.
pub fn init_logger() {
    let mut builder = env_logger::Builder::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Warn);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    let _ = builder.try_init();
}

/// Crash log location: `<data_local_dir>/HostProbe/native_crash.log`.
pub fn default_crash_log_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(LOG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CRASH_LOG_FILE)
}

/// Install the panic hook that records crashes to the crash log.
///
/// Only the first call installs the hook.
pub fn init_crash_logger() {
    let log_path = default_crash_log_path();
    if let Some(dir) = log_path.parent() {
        let _ = fs::create_dir_all(dir);
    }

    if CRASH_LOG_PATH.set(log_path.clone()).is_err() {
        return;
    }

    std::panic::set_hook(Box::new(move |panic_info| {
        let crash_msg = format_panic_message(panic_info);

        if is_sentry_enabled() {
            sentry::capture_message(&crash_msg, sentry::Level::Fatal);
        }

        if let Err(e) = write_crash_log(&crash_msg) {
            error!("[CRASH LOGGER] Failed to write crash log: {}", e);
        }

        error!("\n{}", crash_msg);
    }));

    info!("[CRASH LOGGER] Initialized - Log: {:?}", log_path);
}

fn format_panic_message(panic_info: &std::panic::PanicHookInfo) -> String {
    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    };

    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "Unknown location".to_string());

    format_report(
        "NATIVE PANIC",
        &[("Location", location.as_str()), ("Message", payload.as_str())],
        Some(&std::backtrace::Backtrace::capture().to_string()),
    )
}

/// Timestamped block appended to the crash log.
fn format_report(title: &str, fields: &[(&str, &str)], backtrace: Option<&str>) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let mut report = format!("\n===== {} =====\nTimestamp: {}\n", title, timestamp);
    for (name, value) in fields {
        report.push_str(&format!("{}: {}\n", name, value));
    }
    report.push_str(&format!(
        "Thread: {:?}\n",
        std::thread::current().name().unwrap_or("unnamed")
    ));
    if let Some(bt) = backtrace {
        report.push_str(&format!("\nBacktrace:\n{}\n", bt));
    }
    report
}

fn append_to(path: &Path, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", message)
}

fn write_crash_log(message: &str) -> std::io::Result<()> {
    match CRASH_LOG_PATH.get() {
        Some(path) => append_to(path, message),
        None => Ok(()),
    }
}

/// Log a critical error to the crash log without panicking.
pub fn log_critical_error(context: &str, error: &str) {
    let message = format_report("CRITICAL ERROR", &[("Context", context), ("Error", error)], None);

    if is_sentry_enabled() {
        sentry::with_scope(
            |scope| {
                scope.set_tag("context", context);
                scope.set_level(Some(sentry::Level::Error));
            },
            || {
                sentry::capture_message(error, sentry::Level::Error);
            },
        );
    }

    if let Err(e) = write_crash_log(&message) {
        error!("[CRASH LOGGER] Failed to write critical error: {}", e);
    }

    error!("{}", message);
}
