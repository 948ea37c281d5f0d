//! Adapts the container engine's multiplexed exec stream into the stdout and
//! stderr channels the rest of the gateway cares about.
//!
//! The wire format is `[1 byte channel][3 reserved bytes][4 byte big-endian
//! length][payload]`, repeated. `bollard` already parses this envelope for us
//! at the transport layer and hands back [`bollard::container::LogOutput`]
//! values; [`Channel`] is the adapter that lets the rest of the gateway
//! ([`crate::session`]) stay agnostic of which transport produced the bytes.

use bollard::container::LogOutput;
use bytes::Bytes;

/// One demultiplexed chunk of container exec output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Channel {
    /// Payload from the exec's stdout; forwarded to the Frame Codec decoder.
    Stdout(Bytes),
    /// Payload from the exec's stderr; logged only, never forwarded.
    Stderr(Bytes),
}

impl From<LogOutput> for Channel {
    fn from(out: LogOutput) -> Self {
        match out {
            LogOutput::StdOut { message } => Channel::Stdout(message),
            LogOutput::StdErr { message } | LogOutput::Console { message } => {
                Channel::Stderr(message)
            }
            LogOutput::StdIn { message } => Channel::Stdout(message),
        }
    }
}
