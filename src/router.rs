//! Message Router: classifies each decoded JSON-RPC message and forwards it
//! in the appropriate direction.
//!
//! The router does not rewrite message bodies except to wrap forwarding
//! failures as in-band JSON-RPC errors; client request ids are forwarded
//! unchanged; no internal id remapping is needed.
//! Outstanding client request ids are tracked only for bookkeeping (pruned on
//! response or on session teardown) in the same `BoundedHashMap` type
//! `bounded_hashmap` already provides elsewhere in this codebase.

use crate::{
    bounded_hashmap::BoundedHashMap,
    codec,
    container::ExecStdin,
    rpc::{RpcMessage, internal_error_response, null_result_response},
};
use serde_json::Value;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

/// `textDocument/publishDiagnostics` gets special-cased only for logging;
/// the gateway otherwise implements no LSP semantics of its own.
pub const PUBLISH_DIAGNOSTICS_METHOD: &str = "textDocument/publishDiagnostics";

/// What a caller should do after routing one message.
#[derive(Debug, PartialEq)]
pub enum Directive {
    /// The message was forwarded; nothing further to do.
    Forwarded,
    /// Send this JSON value back on the client's WebSocket.
    Reply(Value),
    /// Drop the message silently (it didn't classify into any known shape).
    Drop,
}

/// Tracks outstanding client request ids. Bounded so a language server that
/// never replies cannot grow this map without limit.
pub struct Router {
    outstanding: Mutex<BoundedHashMap<String, ()>>,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            outstanding: Mutex::new(BoundedHashMap::default()),
        }
    }
}

impl Router {
    fn note_outstanding(&self, id: &Value) {
        self.outstanding
            .lock()
            .expect("router mutex poisoned")
            .insert(id.to_string(), ());
    }

    fn resolve(&self, id: &Value) {
        self.outstanding
            .lock()
            .expect("router mutex poisoned")
            .remove(&id.to_string());
    }

    /// Route one client → server message, writing it to the exec stdin
    /// stream as the Frame Codec's encoding of it. Forward errors become an
    /// in-band JSON-RPC error response rather than tearing the session down
    /// Forward errors never tear the session down.
    pub async fn route_client_message(&self, raw: &Value, server_in: &mut ExecStdin) -> Directive {
        match RpcMessage::classify(raw) {
            Some(RpcMessage::Request { id, .. }) => match write_frame(server_in, raw).await {
                Ok(()) => {
                    self.note_outstanding(&id);
                    Directive::Forwarded
                }
                Err(e) => Directive::Reply(internal_error_response(id, e)),
            },
            Some(RpcMessage::Notification { .. }) => {
                if let Err(e) = write_frame(server_in, raw).await {
                    warn!(error = %e, "failed to forward notification, swallowing");
                }
                Directive::Forwarded
            }
            // Rare: the language server issued its own request and the
            // client is replying. Forwarded as-is, no id bookkeeping needed.
            Some(RpcMessage::Response { .. }) => {
                if let Err(e) = write_frame(server_in, raw).await {
                    warn!(error = %e, "failed to forward client response, swallowing");
                }
                Directive::Forwarded
            }
            None => {
                warn!("dropping unclassifiable client message");
                Directive::Drop
            }
        }
    }

    /// Route one server → client message. Never touches the wire itself;
    /// the caller sends the returned [`Directive::Reply`] value on the
    /// client's WebSocket.
    pub fn route_server_message(&self, raw: Value) -> Directive {
        match RpcMessage::classify(&raw) {
            Some(RpcMessage::Notification { method, .. }) => {
                if method == PUBLISH_DIAGNOSTICS_METHOD {
                    trace!("forwarding publishDiagnostics notification");
                }
                Directive::Reply(raw)
            }
            // The gateway implements no client capabilities.
            Some(RpcMessage::Request { id, .. }) => Directive::Reply(null_result_response(id)),
            Some(RpcMessage::Response { id, .. }) => {
                self.resolve(&id);
                Directive::Reply(raw)
            }
            None => {
                warn!("dropping unclassifiable server message");
                Directive::Drop
            }
        }
    }
}

async fn write_frame(server_in: &mut ExecStdin, value: &Value) -> anyhow::Result<()> {
    let framed = codec::encode_message(value)?;
    server_in.write_all(&framed).await?;
    server_in.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, duplex};

    async fn read_all(mut reader: impl tokio::io::AsyncRead + Unpin, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn forwards_request_and_tracks_it() {
        let router = Router::default();
        let (client_side, mut test_side) = duplex(4096);
        let mut input: ExecStdin = Box::pin(client_side);

        let req = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let directive = router.route_client_message(&req, &mut input).await;
        assert_eq!(directive, Directive::Forwarded);

        let body = serde_json::to_vec(&req).unwrap();
        let expected = codec::encode_message(&req).unwrap();
        let got = read_all(&mut test_side, expected.len()).await;
        assert_eq!(got, expected);
        assert!(got.ends_with(&body));
    }

    #[tokio::test]
    async fn notification_swallows_write_errors() {
        let router = Router::default();
        let (client_side, test_side) = duplex(4096);
        drop(test_side); // closed reader -> writes will eventually fail
        let mut input: ExecStdin = Box::pin(client_side);

        let notif = json!({"jsonrpc": "2.0", "method": "initialized", "params": {}});
        let directive = router.route_client_message(&notif, &mut input).await;
        assert_eq!(directive, Directive::Forwarded);
    }

    #[test]
    fn server_notification_is_forwarded_verbatim() {
        let router = Router::default();
        let msg = json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///ws/a.rs", "diagnostics": []},
        });
        assert_eq!(
            router.route_server_message(msg.clone()),
            Directive::Reply(msg)
        );
    }

    #[test]
    fn server_request_gets_null_result_reply() {
        let router = Router::default();
        let msg = json!({"jsonrpc": "2.0", "id": 9, "method": "window/workDoneProgress/create"});
        match router.route_server_message(msg) {
            Directive::Reply(v) => {
                assert_eq!(v["id"], json!(9));
                assert_eq!(v["result"], Value::Null);
            }
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn server_response_is_forwarded_and_resolved() {
        let router = Router::default();
        let req_id = json!(1);
        router.note_outstanding(&req_id);

        let resp = json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        assert_eq!(
            router.route_server_message(resp.clone()),
            Directive::Reply(resp)
        );
        assert!(
            router
                .outstanding
                .lock()
                .unwrap()
                .remove(&req_id.to_string())
                .is_none()
        );
    }

    #[test]
    fn unclassifiable_message_is_dropped() {
        let router = Router::default();
        assert_eq!(
            router.route_server_message(json!({"jsonrpc": "2.0"})),
            Directive::Drop
        );
    }
}
