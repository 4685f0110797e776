use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use sluice_tonic_core::sluice::{EncoderRegistry, Protocol, SessionStore, StaticCatalog};
use std::path::PathBuf;
use std::sync::Arc;

/// Runtime configuration for the `sluice-server` binary.
///
/// Every setting can be given as a CLI flag or an environment variable. A
/// `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sluice-server",
    version,
    about = "A gRPC service for session-based streaming of remotely held datasets"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/sluice.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// JSON catalog file describing the datasets to serve.
    ///
    /// Without one, the built-in catalog with a single `numbers` dataset is
    /// served.
    ///
    /// Environment variable: `CATALOG_PATH`
    #[arg(long, env = "CATALOG_PATH")]
    pub catalog_path: Option<PathBuf>,

    /// Comma separated encoders to offer, in registration order.
    ///
    /// Environment variable: `FORMATS`
    #[arg(long, env = "FORMATS", value_delimiter = ',', default_value = "raw,msgpack")]
    pub formats: Vec<String>,

    /// Maximum number of concurrently open sessions. 0 means unlimited.
    ///
    /// Environment variable: `MAX_SESSIONS`
    #[arg(long, env = "MAX_SESSIONS", default_value_t = 1024)]
    pub max_sessions: usize,

    /// Seconds a session may sit unused before it is closed. 0 disables
    /// expiry.
    ///
    /// Environment variable: `SESSION_IDLE_TIMEOUT_SECS`
    #[arg(long, env = "SESSION_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub session_idle_timeout_secs: u64,

    /// Seconds between idle session sweeps.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Seconds to let in-flight reads finish on shutdown before they are
    /// cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub catalog: StaticCatalog,
    pub registry: EncoderRegistry,
    pub max_sessions: usize,
    /// `None` disables idle expiry.
    pub session_idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Builds the protocol state this configuration describes.
    pub fn protocol(&self) -> Protocol {
        Protocol::new(
            Arc::new(self.catalog.clone()),
            Arc::new(self.registry.clone()),
            Arc::new(SessionStore::new(self.max_sessions)),
        )
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let formats: Vec<_> = args
            .formats
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        if formats.is_empty() {
            bail!("FORMATS must name at least one encoder");
        }
        let registry = EncoderRegistry::only(formats)?;

        let session_idle_timeout = match args.session_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        if session_idle_timeout.is_some() && args.sweep_interval_secs == 0 {
            bail!("SWEEP_INTERVAL_SECS must be greater than 0 when sessions expire");
        }

        let catalog = match &args.catalog_path {
            Some(path) => StaticCatalog::from_path(path)
                .with_context(|| format!("loading catalog {}", path.display()))?,
            None => StaticCatalog::builtin(),
        };
        if catalog.is_empty() {
            bail!("The catalog has no sources");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            catalog,
            registry,
            max_sessions: args.max_sessions,
            session_idle_timeout,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
