#![doc = include_str!("../README.md")]

pub use server::Server;
pub use version::Version;

mod bounded_hashmap;
mod codec;
mod config;
mod container;
mod demux;
mod error;
mod listener;
mod router;
mod rpc;
mod server;
mod session;
mod signal;
mod telemetry;
mod version;
