//! Frame Codec: LSP stdio framing (`Content-Length: <N>\r\n\r\n<payload>`) in
//! both directions, implemented as a [`tokio_util::codec::Decoder`] so it
//! plugs into the usual `Encoder`/`Decoder` pairing for custom byte-stream
//! protocols.
//!
//! Decoding is incremental and stateful: bytes arrive in arbitrary chunks
//! from the Stream Demuxer's stdout channel and [`LspDecoder::decode`] is
//! fed repeatedly until a full frame accumulates. A malformed header block
//! or an unparseable payload is logged and discarded; the decoder resumes
//! scanning for the next header rather than giving up on the stream.

use anyhow::{Error, Result};
use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::warn;

const HEADER_SEP: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH_HEADER: &str = "content-length";

/// Incremental parser from raw LSP stdio bytes to whole JSON-RPC messages.
#[derive(Debug, Default)]
pub struct LspDecoder {
    content_length: Option<usize>,
}

impl Decoder for LspDecoder {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Value>> {
        loop {
            if self.content_length.is_none() {
                let Some(header_end) = find(buf, HEADER_SEP) else {
                    return Ok(None);
                };
                let header_block = buf.split_to(header_end + HEADER_SEP.len());
                let header_text = &header_block[..header_block.len() - HEADER_SEP.len()];

                match parse_content_length(header_text) {
                    Some(len) => self.content_length = Some(len),
                    None => {
                        warn!("frame missing Content-Length header, discarding and resyncing");
                        continue;
                    }
                }
            }

            let len = self.content_length.expect("checked above");
            if buf.len() < len {
                return Ok(None);
            }

            let payload = buf.split_to(len);
            self.content_length = None;

            match serde_json::from_slice::<Value>(&payload) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(error = %e, "invalid JSON payload, discarding frame");
                    continue;
                }
            }
        }
    }
}

fn find(buf: &BytesMut, needle: &[u8]) -> Option<usize> {
    buf.chunk().windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(header_text: &[u8]) -> Option<usize> {
    std::str::from_utf8(header_text)
        .ok()?
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH_HEADER) {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
}

/// Serialize a JSON-RPC message and prepend its `Content-Length` header,
/// ready to be written to the exec stdin stream as a single write.
pub fn encode_message(value: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let mut framed = Vec::with_capacity(body.len() + 32);
    framed.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}
