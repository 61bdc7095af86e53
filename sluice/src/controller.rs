use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use ron::extensions::Extensions;
use serde::Deserialize;
use sluice_common::{ConfigError, DeliveryWindows, Signal, internal};
use sluice_gate::{DeliveryGate, FlushConfig, SmtpConfig, SmtpTransport};
use sluice_spool::SpoolConfig;
use tokio::sync::broadcast;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SLUICE_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./sluice.config.ron", "/etc/sluice/sluice.config.ron"];

/// Top-level configuration, read from `sluice.config.ron`.
///
/// ```ron
/// Sluice (
///     smtp: (
///         host: "smtp.mailtrap.io",
///         port: 2525,
///         username: "user",
///         password: "secret",
///         tls: StartTls,
///     ),
///     windows: ["09:00-12:00", "22:00-02:00"],
///     spool: File(path: "/var/spool/sluice"),
///     flush: (interval_secs: 60, policy: SkipAndContinue),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Sluice {
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Times of day when deferrable mail may go out
    #[serde(default)]
    pub windows: DeliveryWindows,

    #[serde(default)]
    pub spool: SpoolConfig,

    #[serde(default)]
    pub flush: FlushConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Find the configuration file using the following precedence:
/// 1. `SLUICE_CONFIG` environment variable
/// 2. ./sluice.config.ron (current working directory)
/// 3. /etc/sluice/sluice.config.ron (system-wide config)
///
/// # Errors
/// If `SLUICE_CONFIG` names a file that does not exist, or none of the
/// default locations has one
pub fn find_config_file(from_env: Option<&str>) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
    {
        return Ok(path);
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

impl Sluice {
    /// Parse a configuration from RON text and validate it.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for bad syntax or a malformed window, and any
    /// error from [`Self::validate`]
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::Options::default()
            .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES | Extensions::IMPLICIT_SOME)
            .from_str(text)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as for
    /// [`Self::from_ron`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_ron(&text)
    }

    /// # Errors
    /// The first problem found in the SMTP or flush settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.smtp.validate()?;
        self.flush.validate()?;

        if self.windows.is_empty() {
            internal!(
                level = WARN,
                "No delivery windows configured; deferrable mail will stay queued"
            );
        }

        Ok(())
    }

    /// Open the spool and assemble a gate over it.
    ///
    /// # Errors
    /// If the SMTP settings are unusable or the spool cannot be opened
    pub async fn gate(self) -> anyhow::Result<DeliveryGate> {
        let transport = SmtpTransport::new(self.smtp)?;

        if let Some(path) = self.spool.path() {
            internal!(level = INFO, "Using spool at {}", path.display());
        }
        let spool = self.spool.open().await?;

        internal!(level = INFO, "Delivery windows: {}", self.windows);

        Ok(
            DeliveryGate::new(Arc::new(transport), Arc::new(spool), self.windows)
                .with_flush_config(self.flush),
        )
    }

    /// Run the periodic flusher until the process is asked to stop.
    ///
    /// # Errors
    /// If the gate cannot be built or signal handlers cannot be installed
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        let gate = self.gate().await?;

        internal!(level = INFO, "Controller running");

        let ret = tokio::select! {
            r = gate.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}

/// Wait for Ctrl+C or SIGTERM, tell the flusher to stop, and wait for it to
/// let go of the spool.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;

    Ok(())
}
