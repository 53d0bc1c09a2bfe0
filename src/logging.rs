//! Subscriber setup shared by both binaries.

use crate::error::{Result, WebradarError};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Logging flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub verbose: bool,
    pub quiet: bool,
    /// json, pretty or compact
    pub format: Option<String>,
    /// Also write plain-text logs to this file
    pub file: Option<PathBuf>,
}

impl LogOptions {
    pub fn level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }

    /// Directives used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        let level = self.level();
        format!("webradar={level},radar_viewer={level},tower_http={level}")
    }
}

/// Keeps the file writer flushing; hold it for the life of `main`.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init_logging(options: &LogOptions) -> Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directives()));

    let mut layers: Vec<BoxedLayer> = vec![console_layer(options)];

    let file_guard = match &options.file {
        Some(path) => {
            let (layer, guard) = file_layer(path)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| WebradarError::system(format!("Failed to initialise logging: {}", e)))?;

    Ok(LoggingGuard { _file: file_guard })
}

fn console_layer(options: &LogOptions) -> BoxedLayer {
    let detailed = options.debug;

    match options.format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(detailed)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    }
}

fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| WebradarError::system(format!("Invalid log file path: {}", path.display())))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();

    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_precedence() {
        let mut options = LogOptions::default();
        assert_eq!(options.level(), "warn");

        options.quiet = true;
        assert_eq!(options.level(), "error");

        options.verbose = true;
        assert_eq!(options.level(), "info");

        options.debug = true;
        assert_eq!(options.level(), "debug");
        assert!(options.default_directives().starts_with("webradar=debug"));
    }

    #[test]
    fn test_file_layer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("relay.log");

        let (_layer, _guard) = file_layer(&path).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
