//! The gateway process: configuration, logging, and the accept-loop/
//! signal-handler task pair, run as sibling tasks on one multi-threaded
//! Tokio runtime.

use crate::{
    config::Config,
    container::{BollardEngine, ContainerEngine},
    listener::{GatewayState, router},
    signal,
    version::Version,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, process, sync::Arc};
use tokio::{net::TcpListener, runtime::Builder};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "telemetry")]
use opentelemetry::trace::TracerProvider as _;

/// The gateway's process-level object.
pub struct Server {
    config: Arc<Config>,
}

impl Server {
    /// Create a new `Server`: parse configuration, handle `--version`, and
    /// initialize structured logging.
    pub fn new() -> Result<Self> {
        let config = Config::default();

        if config.version() {
            Version::new(false).print();
            process::exit(0);
        }

        config.validate().context("validate configuration")?;

        let server = Self {
            config: Arc::new(config),
        };
        server.init_logging().context("initialize logging")?;
        Ok(server)
    }

    fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::builder()
            .with_default_directive(self.config.log_level().into())
            .from_env_lossy();
        let registry =
            tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_target(true));

        #[cfg(feature = "telemetry")]
        if let Some(endpoint) = self.config.otlp_endpoint() {
            let provider = crate::telemetry::Telemetry::layer(endpoint)
                .context("build OTLP tracer provider")?;
            let tracer = provider.tracer("lsp-gateway");
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(filter)
                .try_init()
                .context("init tracing registry")?;
            info!(log_level = %self.config.log_level(), "structured logging initialized with OTLP export");
            return Ok(());
        }

        registry
            .with(filter)
            .try_init()
            .context("init tracing registry")?;
        info!(log_level = %self.config.log_level(), "structured logging initialized");
        Ok(())
    }

    /// Start the gateway and run until a shutdown signal drains every live
    /// session, consuming `self`.
    pub fn start(self) -> Result<()> {
        let rt = Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> Result<()> {
        let engine: Arc<dyn ContainerEngine> = Arc::new(
            BollardEngine::connect(&self.config).context("connect to container engine")?,
        );
        let shutdown = CancellationToken::new();

        let state = GatewayState {
            config: self.config.clone(),
            engine,
            shutdown: shutdown.clone(),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port()));
        let listener = TcpListener::bind(addr)
            .await
            .context("bind TCP listener")?;
        info!(%addr, "lsp-gateway listening for WebSocket upgrades");

        let (sigterm, sigint) = signal::install().context("install signal handlers")?;
        let app = router(state);
        let shutdown_signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal::wait_for_shutdown(shutdown_signal, sigterm, sigint))
            .await
            .context("serve gateway")?;

        info!("gateway shut down");
        Ok(())
    }
}
