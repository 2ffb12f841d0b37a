// =============================================================================
// LOGGING - env_logger setup and validation message routing
// =============================================================================
//
// The `log` facade is used everywhere. This module installs env_logger once
// at startup and builds the `LogContext` that the device hands to the Vulkan
// debug messenger, so validation output lands in the normal log stream and,
// when enabled, in a dedicated log file.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::DebugConfig;

/// Target used for every message coming from the validation layers
pub const VALIDATION_TARGET: &str = "vulkan";

pub struct LogContext {
    mirror: Option<Mutex<File>>,
}

impl LogContext {
    /// Install env_logger (Info by default, `RUST_LOG` overrides) and open
    /// the validation log file if configured.
    pub fn init(config: &DebugConfig) -> Arc<Self> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(log::LevelFilter::Info);
        builder.parse_default_env();
        // A second init (tests, embedding) keeps the first logger
        let _ = builder.try_init();

        if !config.log_to_file {
            return Arc::new(Self::console_only());
        }
        match Self::with_file(&config.log_file) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                log::warn!("Cannot open log file {}: {}", config.log_file, e);
                Arc::new(Self::console_only())
            }
        }
    }

    pub fn console_only() -> Self {
        Self { mirror: None }
    }

    /// Truncate `path` and mirror validation messages into it
    pub fn with_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        writeln!(file, "=== Vulkan Validation Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        log::info!("Mirroring validation warnings to {}", path.display());

        Ok(Self {
            mirror: Some(Mutex::new(file)),
        })
    }

    /// Route one validation message. Warnings and errors are also mirrored.
    pub fn report(&self, level: log::Level, message: &str) {
        log::log!(target: VALIDATION_TARGET, level, "{}", message);

        if level > log::Level::Warn {
            return;
        }
        if let Some(file) = &self.mirror {
            let mut file = file.lock();
            let _ = writeln!(file, "[{}] {}", level, message);
            let _ = file.flush();
        }
    }
}
