//! Session Lifecycle: owns every per-connection resource and
//! implements the startup buffering race and the ordered teardown.
//!
//! The per-session client-read loop and server-read loop are plain
//! `tokio::spawn`ed/driven futures coordinated through a
//! `tokio_util::sync::CancellationToken`: one task per read direction,
//! coordinating through shared state rather than interleaving directly.
//!
//! [`Session::run`] is generic over the WebSocket sink/stream halves rather
//! than tied to `axum::extract::ws::WebSocket` directly, specifically so the
//! buffering race, attach-failure, and teardown paths are unit-testable
//! against `futures::channel::mpsc` channels instead of a live socket.

use crate::{
    codec::LspDecoder,
    config::Config,
    container::{AttachedExec, ContainerEngine, ExecStdin},
    demux::Channel,
    error::GatewayError,
    router::{Directive, Router},
};
use axum::extract::ws::{CloseFrame, Message as WsMessage, close_code};
use bytes::BytesMut;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::{
    fmt,
    sync::{Arc, OnceLock},
};
use tokio::{io::AsyncWriteExt, sync::Mutex, task};
use tokio_util::{codec::Decoder, sync::CancellationToken};
use tracing::{Instrument, debug, debug_span, info, instrument, warn};
use uuid::Uuid;

/// The close code/reason teardown uses, set at most once by whichever task
/// first observes a fatal stream error. Defaults to a normal closure if
/// nothing ever sets it (e.g. the client simply hung up).
type CloseReason = Arc<OnceLock<(u16, String)>>;

fn record_stream_error(reason: &CloseReason, cause: impl fmt::Display) {
    let _ = reason.set((close_code::ERROR, GatewayError::StreamError(cause.to_string()).reason()));
}

/// Why the buffering phase ended without ever reaching `is_ready`.
enum AttachOutcome {
    Ready(AttachedExec, Vec<Value>),
    Failed(GatewayError),
    /// The client socket closed or errored before attachment finished
    /// the in-flight exec future is dropped,
    /// cancelling it, and no `is_ready` transition occurs.
    Aborted,
}

/// One accepted WebSocket upgrade, owning its client socket, exec handle,
/// server stream, and framing state exclusively.
pub struct Session {
    id: Uuid,
    container_id: String,
    workspace_path: String,
    language_server: String,
    max_pending_messages: usize,
}

impl Session {
    /// Construct a new Session in the `Accepted` state. `active = true` and
    /// `is_ready = false` are implicit: nothing has been attached yet.
    pub fn new(container_id: String, workspace_path: String, config: &Config) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_id,
            workspace_path,
            language_server: config.language_server().to_string(),
            max_pending_messages: config.max_pending_messages(),
        }
    }

    /// The session's log-correlation id: every tracing span for this
    /// session's tasks carries it, scoped per-session rather than
    /// per-message.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drive the full session lifecycle to completion: buffer, attach,
    /// drain, bridge, teardown. Returns only once the session is
    /// `Terminated` and every owned resource has been released.
    #[instrument(skip_all, fields(session_id = %self.id, container_id = %self.container_id))]
    pub async fn run<W, R>(
        self,
        sink: W,
        mut stream: R,
        engine: Arc<dyn ContainerEngine>,
        shutdown: CancellationToken,
    ) where
        W: Sink<WsMessage> + Unpin + Send + 'static,
        W::Error: fmt::Display + Send,
        R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin + Send,
    {
        let token = shutdown.child_token();
        let sink = Arc::new(Mutex::new(sink));
        let router = Arc::new(Router::default());
        let close_reason: CloseReason = Arc::new(OnceLock::new());

        let outcome = self.buffer_until_ready(&mut stream, engine, &token).await;
        let (mut input, output, pending) = match outcome {
            AttachOutcome::Ready(attached, pending) => (attached.input, attached.output, pending),
            AttachOutcome::Failed(err) => {
                debug!(error = %err, "attachment failed, closing");
                Self::close_with(&sink, err.close_code(), err.reason()).await;
                return;
            }
            AttachOutcome::Aborted => {
                debug!("client disconnected before attachment completed");
                return;
            }
        };

        info!("language server attached, draining buffered client messages");

        let server_task = task::spawn(
            Self::server_read_loop(
                output,
                sink.clone(),
                router.clone(),
                token.clone(),
                close_reason.clone(),
            )
            .instrument(debug_span!("server_read", session_id = %self.id)),
        );

        for raw in pending {
            Self::forward_client_message(&router, &mut input, &sink, raw).await;
        }

        Self::client_read_loop(
            &mut stream,
            &mut input,
            &sink,
            &router,
            &token,
            &close_reason,
        )
        .await;

        // Teardown: stop forwarding, dispose the codec state
        // (implicit: `input`/`output` are dropped with this function), end
        // and destroy the server stream, release the exec handle, close the
        // socket if still open. Idempotent because `token.cancel` is
        // idempotent and every step below tolerates already-gone state.
        token.cancel();
        if let Err(e) = input.shutdown().await {
            debug!(error = %e, "error ending server stream, ignoring");
        }
        server_task.abort();
        let _ = server_task.await;
        let (code, reason) = close_reason
            .get()
            .cloned()
            .unwrap_or((close_code::NORMAL, String::new()));
        Self::close_with(&sink, code, reason).await;
        debug!("session terminated");
    }

    /// The `Accepted -> Buffering -> Ready` transition. Every client message
    /// observed while attachment is in flight is appended to the pending
    /// buffer verbatim and drained, in order, the instant attachment
    /// succeeds.
    async fn buffer_until_ready<R>(
        &self,
        stream: &mut R,
        engine: Arc<dyn ContainerEngine>,
        token: &CancellationToken,
    ) -> AttachOutcome
    where
        R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    {
        let mut pending = Vec::new();
        let container_id = self.container_id.clone();
        let workspace_path = self.workspace_path.clone();
        let language_server = self.language_server.clone();

        let attach_fut = async move {
            engine.verify(&container_id).await?;
            engine
                .attach(&container_id, &workspace_path, &language_server)
                .await
        };
        tokio::pin!(attach_fut);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return AttachOutcome::Aborted,

                result = &mut attach_fut => {
                    return match result {
                        Ok(attached) => AttachOutcome::Ready(attached, pending),
                        Err(err) => AttachOutcome::Failed(err),
                    };
                }

                msg = stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if pending.len() >= self.max_pending_messages {
                                return AttachOutcome::Failed(GatewayError::BadRequest(
                                    "too many buffered messages before attachment completed".into(),
                                ));
                            }
                            match serde_json::from_str(&text) {
                                Ok(value) => pending.push(value),
                                Err(e) => warn!(error = %e, "dropping unparseable buffered message"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return AttachOutcome::Aborted,
                        Some(Ok(_)) => {} // ping/pong/binary carry no JSON-RPC content
                        Some(Err(e)) => {
                            warn!(error = %e, "client socket error during buffering");
                            return AttachOutcome::Aborted;
                        }
                    }
                }
            }
        }
    }

    /// The steady-state `Ready` loop: every subsequent client message is
    /// routed immediately.
    async fn client_read_loop<W, R>(
        stream: &mut R,
        input: &mut ExecStdin,
        sink: &Arc<Mutex<W>>,
        router: &Arc<Router>,
        token: &CancellationToken,
        close_reason: &CloseReason,
    ) where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                msg = stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(raw) => Self::forward_client_message(router, input, sink, raw).await,
                                Err(e) => warn!(error = %e, "dropping unparseable client message"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "client socket error");
                            record_stream_error(close_reason, e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Route one client -> server message. Forwarding failures are folded
    /// into an in-band JSON-RPC error reply; they never end the session.
    async fn forward_client_message<W>(
        router: &Router,
        input: &mut ExecStdin,
        sink: &Arc<Mutex<W>>,
        raw: Value,
    ) where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
    {
        match router.route_client_message(&raw, input).await {
            Directive::Forwarded | Directive::Drop => {}
            Directive::Reply(value) => Self::send(sink, value).await,
        }
    }

    /// The server-read loop: demultiplex the exec's
    /// stdout/stderr stream, decode LSP frames from the stdout channel, and
    /// route each decoded message toward the client.
    async fn server_read_loop<W>(
        mut output: crate::container::LogStream,
        sink: Arc<Mutex<W>>,
        router: Arc<Router>,
        token: CancellationToken,
        close_reason: CloseReason,
    ) where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
    {
        let mut decoder = LspDecoder::default();
        let mut buf = BytesMut::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                chunk = output.next() => chunk,
            };

            let channel = match chunk {
                Some(Ok(log)) => Channel::from(log),
                Some(Err(e)) => {
                    warn!(error = %e, "language server stream error, tearing down session");
                    record_stream_error(&close_reason, e);
                    break;
                }
                None => {
                    debug!("language server stream ended");
                    break;
                }
            };

            match channel {
                Channel::Stderr(bytes) => {
                    debug!(
                        target: "rust_analyzer_stderr",
                        "{}",
                        String::from_utf8_lossy(&bytes)
                    );
                }
                Channel::Stdout(bytes) => {
                    buf.extend_from_slice(&bytes);
                    loop {
                        match decoder.decode(&mut buf) {
                            Ok(Some(value)) => match router.route_server_message(value) {
                                Directive::Reply(v) => Self::send(&sink, v).await,
                                Directive::Forwarded | Directive::Drop => {}
                            },
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "malformed frame from language server");
                                break;
                            }
                        }
                    }
                }
            }
        }

        token.cancel();
    }

    async fn send<W>(sink: &Arc<Mutex<W>>, value: Value)
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
    {
        let text = match serde_json::to_string(&value) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize outgoing message");
                return;
            }
        };
        if let Err(e) = sink.lock().await.send(WsMessage::Text(text.into())).await {
            warn!(error = %e, "failed to send message to client");
        }
    }

    async fn close_with<W>(sink: &Arc<Mutex<W>>, code: u16, reason: impl Into<String>)
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
    {
        let frame = CloseFrame {
            code,
            reason: reason.into().into(),
        };
        let _ = sink.lock().await.send(WsMessage::Close(Some(frame))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MockContainerEngine;
    use futures::channel::mpsc;

    fn test_config() -> Config {
        Config::parse_from(["lsp-gateway"])
    }

    type FakeSink = mpsc::Sender<WsMessage>;
    type FakeStream = mpsc::Receiver<Result<WsMessage, axum::Error>>;

    /// A fake client socket: a `(sink, stream)` pair backed by
    /// `futures::channel::mpsc`, plus the other halves the test holds onto
    /// to observe outgoing frames and inject incoming ones.
    fn fake_socket() -> (FakeSink, mpsc::Receiver<WsMessage>, mpsc::Sender<Result<WsMessage, axum::Error>>, FakeStream) {
        let (sink_tx, sink_rx) = mpsc::channel(32);
        let (stream_tx, stream_rx) = mpsc::channel(32);
        (sink_tx, sink_rx, stream_tx, stream_rx)
    }

    #[test]
    fn session_carries_its_own_identity() {
        let config = test_config();
        let a = Session::new("c1".into(), "/ws".into(), &config);
        let b = Session::new("c1".into(), "/ws".into(), &config);
        assert_ne!(a.id(), b.id(), "each session gets a distinct correlation id");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attach_failure_closes_with_policy_violation() {
        let config = test_config();
        let session = Session::new("missing".into(), "/ws".into(), &config);

        let mut mock = MockContainerEngine::new();
        mock.expect_verify()
            .returning(|_| Err(GatewayError::ContainerNotFound("no such container".into())));

        let (sink_tx, mut sink_rx, _client_tx, stream) = fake_socket();

        session
            .run(sink_tx, stream, Arc::new(mock), CancellationToken::new())
            .await;

        match sink_rx.try_next() {
            Ok(Some(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, close_code::POLICY);
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_stream_error_closes_with_internal_error() {
        let config = test_config();
        let session = Session::new("c1".into(), "/ws".into(), &config);

        let mut mock = MockContainerEngine::new();
        mock.expect_verify().returning(|_| Ok(()));
        mock.expect_attach().returning(|_, _, _| {
            let input: ExecStdin = Box::pin(tokio::io::sink());
            let output: crate::container::LogStream = Box::pin(futures::stream::pending());
            Ok(AttachedExec { input, output })
        });

        let (sink_tx, mut sink_rx, mut client_tx, stream) = fake_socket();
        client_tx
            .send(Err(axum::Error::new(std::io::Error::other("broken pipe"))))
            .await
            .unwrap();
        drop(client_tx);

        session
            .run(sink_tx, stream, Arc::new(mock), CancellationToken::new())
            .await;

        match sink_rx.try_next() {
            Ok(Some(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, close_code::ERROR);
            }
            other => panic!("expected an internal-error close frame, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buffered_messages_are_discarded_when_attachment_fails() {
        let config = test_config();
        let session = Session::new("c1".into(), "/ws".into(), &config);

        let mut mock = MockContainerEngine::new();
        mock.expect_verify().returning(|_| Ok(()));
        mock.expect_attach().returning(|_, _, _| {
            Err(GatewayError::AttachFailed(
                "no real container engine in this test".into(),
            ))
        });

        let (sink, mut sink_rx, mut client_tx, stream) = fake_socket();
        client_tx
            .try_send(Ok(WsMessage::Text(
                serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})
                    .to_string()
                    .into(),
            )))
            .unwrap();
        drop(client_tx);

        session
            .run(sink, stream, Arc::new(mock), CancellationToken::new())
            .await;

        // `is_ready` never transitions true: the buffered message is
        // discarded, not drained, and the client sees the attach-failure
        // close code rather than anything derived from the buffered message.
        match sink_rx.try_next() {
            Ok(Some(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, close_code::ERROR);
            }
            other => panic!("expected an internal-error close frame, got {other:?}"),
        }
    }

    /// A hand-written engine whose `attach` sleeps before succeeding, so a
    /// client message sent before `Session::run` is called is observably
    /// buffered (not raced away by an attach future that resolves on its
    /// first poll) and then drained through the Router once attachment
    /// completes. The exec stdin half is a `tokio::io::duplex` so the test
    /// can read back exactly what the Router wrote to it.
    struct DelayedEngine {
        input: tokio::sync::Mutex<Option<ExecStdin>>,
    }

    #[async_trait::async_trait]
    impl ContainerEngine for DelayedEngine {
        async fn verify(&self, _container_id: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn attach(
            &self,
            _container_id: &str,
            _workspace_path: &str,
            _language_server: &str,
        ) -> Result<AttachedExec, GatewayError> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            let input = self
                .input
                .lock()
                .await
                .take()
                .expect("attach called at most once in this test");
            let output: crate::container::LogStream = Box::pin(futures::stream::pending());
            Ok(AttachedExec { input, output })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buffered_message_reaches_exec_stdin_in_order_after_successful_attach() {
        use tokio::io::AsyncReadExt;

        let config = test_config();
        let session = Session::new("c1".into(), "/ws".into(), &config);

        let (exec_stdin, mut stdin_reader) = tokio::io::duplex(4096);
        let engine = Arc::new(DelayedEngine {
            input: tokio::sync::Mutex::new(Some(Box::pin(exec_stdin))),
        });

        let (sink, _sink_rx, mut client_tx, stream) = fake_socket();
        let req = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        client_tx
            .try_send(Ok(WsMessage::Text(req.to_string().into())))
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(session.run(sink, stream, engine, shutdown.clone()));

        let expected = crate::codec::encode_message(&req).unwrap();
        let mut got = vec![0u8; expected.len()];
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            stdin_reader.read_exact(&mut got),
        )
        .await
        .expect("timed out waiting for the buffered message to reach exec stdin")
        .unwrap();

        assert_eq!(
            got, expected,
            "the buffered message must reach exec stdin exactly as the Router encodes it, in order"
        );

        drop(client_tx);
        shutdown.cancel();
        handle.await.unwrap();
    }

    /// A hand-written engine (rather than a `mockall` fake) so `verify` can
    /// genuinely sleep past the point the client socket closes, exercising
    /// the race between attachment and disconnection honestly.
    struct SlowEngine;

    #[async_trait::async_trait]
    impl ContainerEngine for SlowEngine {
        async fn verify(&self, _container_id: &str) -> Result<(), GatewayError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(())
        }

        async fn attach(
            &self,
            _container_id: &str,
            _workspace_path: &str,
            _language_server: &str,
        ) -> Result<AttachedExec, GatewayError> {
            Err(GatewayError::AttachFailed("never reached in this test".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_disconnect_during_attach_aborts_without_ready() {
        let config = test_config();
        let session = Session::new("c1".into(), "/ws".into(), &config);

        let (sink, _sink_rx, client_tx, stream) = fake_socket();
        drop(client_tx); // client gone before attach can complete

        session
            .run(sink, stream, Arc::new(SlowEngine), CancellationToken::new())
            .await;
    }
}
