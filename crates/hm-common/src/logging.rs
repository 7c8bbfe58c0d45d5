use std::panic;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging options read from `HM_LOG_*`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingConfig {
    /// `HM_LOG_DIR`: daily-rotated `<dir>/<app>.log` instead of stdout.
    pub directory: Option<PathBuf>,
    /// `HM_LOG_FORMAT`: `text` (default) or `json`.
    pub format: LogFormat,
    /// `HM_LOG_INCLUDE_BACKTRACE`: also run the default panic hook.
    pub include_backtrace: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let format = match std::env::var("HM_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            directory: std::env::var_os("HM_LOG_DIR").map(PathBuf::from),
            format,
            include_backtrace: std::env::var("HM_LOG_INCLUDE_BACKTRACE")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn slow_call_threshold_ms() -> Option<u64> {
    static THRESHOLD: OnceLock<Option<u64>> = OnceLock::new();

    *THRESHOLD.get_or_init(|| {
        std::env::var("HM_SLOW_CALL_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
    })
}

/// Warns when an index or store call started at `started_at` exceeded
/// `HM_SLOW_CALL_MS`. Disabled when the variable is unset.
pub fn log_if_slow(call: &str, started_at: Instant) {
    if let Some(threshold_ms) = slow_call_threshold_ms() {
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        if elapsed_ms >= threshold_ms {
            tracing::warn!(call, elapsed_ms, threshold_ms, "slow external call");
        }
    }
}

/// Route panics through `tracing` so they land in the same sink as search logs.
/// Installed at most once per process.
pub fn install_tracing_panic_hook(app_name: &'static str, include_backtrace: bool) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        let default_hook = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()));
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());

            tracing::error!(
                application = app_name,
                thread = std::thread::current().name().unwrap_or("unnamed"),
                location = location.as_deref().unwrap_or("unknown"),
                panic_message = %message,
                "panic captured"
            );

            if include_backtrace {
                default_hook(info);
            }
        }));
    });
}

fn file_writer(app_name: &'static str, directory: &PathBuf) -> Option<BoxMakeWriter> {
    if let Err(err) = std::fs::create_dir_all(directory) {
        tracing::warn!(error = %err, dir = %directory.display(), "cannot create log directory, using stdout");
        return None;
    }

    let appender = tracing_appender::rolling::daily(directory, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(BoxMakeWriter::new(non_blocking))
}

/// Install the global subscriber (filter from `RUST_LOG`, default `info`)
/// and the panic hook. Safe to call more than once.
pub fn init_logging(app_name: &'static str, config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = config
        .directory
        .as_ref()
        .and_then(|dir| file_writer(app_name, dir))
        .unwrap_or_else(|| BoxMakeWriter::new(std::io::stdout));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    install_tracing_panic_hook(app_name, config.include_backtrace);
}
