//! Container Attachment: verify a container is running and open a hijacked
//! exec session running the language server inside it.
//!
//! `ContainerEngine` is a trait (not a bare `bollard::Docker` call site) so
//! Session lifecycle tests can substitute a `mockall`-generated fake rather
//! than require a live container engine socket.

use crate::{config::Config, error::GatewayError};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::LogOutput,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
};
use futures::Stream;
use std::{fmt, pin::Pin, time::Duration};
use tokio::io::AsyncWrite;
use tracing::debug;

/// The language server is always invoked without arguments; the editor talks
/// LSP to it over stdio once attached.
const RUST_BACKTRACE_ENV: &str = "RUST_BACKTRACE=1";

pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;
pub type ExecStdin = Pin<Box<dyn AsyncWrite + Send>>;

/// A successfully started exec: a raw write half for stdin and the engine's
/// already-demultiplexed stdout/stderr stream.
pub struct AttachedExec {
    pub input: ExecStdin,
    pub output: LogStream,
}

impl fmt::Debug for AttachedExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedExec").finish_non_exhaustive()
    }
}

/// Abstraction over the container engine calls the gateway needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Inspect the container and fail with `ContainerNotFound` or
    /// `ContainerNotRunning` otherwise.
    async fn verify(&self, container_id: &str) -> Result<(), GatewayError>;

    /// Create and start a hijacked exec running the language server with the
    /// given working directory.
    async fn attach(
        &self,
        container_id: &str,
        workspace_path: &str,
        language_server: &str,
    ) -> Result<AttachedExec, GatewayError>;
}

/// `bollard`-backed implementation of [`ContainerEngine`].
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
    attach_timeout: Duration,
}

impl BollardEngine {
    /// Connect to the container engine's local domain socket named in
    /// `config`.
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let socket = config.engine_socket().display().to_string();
        let docker = Docker::connect_with_unix(&socket, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self {
            docker,
            attach_timeout: Duration::from_secs(config.attach_timeout_secs()),
        })
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn verify(&self, container_id: &str) -> Result<(), GatewayError> {
        let inspect = tokio::time::timeout(
            self.attach_timeout,
            self.docker.inspect_container(container_id, None),
        )
        .await
        .map_err(|_| GatewayError::AttachFailed("timed out inspecting container".into()))?
        .map_err(|e| GatewayError::ContainerNotFound(e.to_string()))?;

        let running = inspect.state.and_then(|s| s.running).unwrap_or(false);
        if !running {
            return Err(GatewayError::ContainerNotRunning);
        }
        Ok(())
    }

    async fn attach(
        &self,
        container_id: &str,
        workspace_path: &str,
        language_server: &str,
    ) -> Result<AttachedExec, GatewayError> {
        let create_opts = CreateExecOptions {
            cmd: Some(vec![language_server.to_string()]),
            working_dir: Some(workspace_path.to_string()),
            env: Some(vec![RUST_BACKTRACE_ENV.to_string()]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = tokio::time::timeout(
            self.attach_timeout,
            self.docker.create_exec(container_id, create_opts),
        )
        .await
        .map_err(|_| GatewayError::AttachFailed("timed out creating exec".into()))?
        .map_err(|e| GatewayError::AttachFailed(format!("exec create failed: {e}")))?;

        debug!(exec_id = %created.id, "created exec, starting in hijacked mode");

        let start_opts = StartExecOptions {
            detach: false,
            tty: false,
            output_capacity: None,
        };

        let started = tokio::time::timeout(
            self.attach_timeout,
            self.docker.start_exec(&created.id, Some(start_opts)),
        )
        .await
        .map_err(|_| GatewayError::AttachFailed("timed out starting exec".into()))?
        .map_err(|e| GatewayError::AttachFailed(format!("exec start failed: {e}")))?;

        match started {
            StartExecResults::Attached { input, output } => Ok(AttachedExec { input, output }),
            StartExecResults::Detached => Err(GatewayError::AttachFailed(
                "exec started in detached mode, expected a hijacked stream".into(),
            )),
        }
    }
}
