//! # riperpc
//!
//! The wire protocol of ripermi: a peer-to-peer remote method invocation
//! protocol carried over one long-lived byte stream.
//!
//! ## Architecture
//!
//! - `pack`: the tag-length-value byte format.
//! - `value`: self-describing argument and return values, including the
//!   `RemoteInstance` handles that stand in for objects.
//! - `message` / `frame`: the `Call`, `Return` and `Beacon` frames.
//! - `filter`: the pluggable encode/decode strategy used by the runtime.
//!
//! This crate is synchronous and knows nothing about sockets or tasks.

pub mod error;
pub mod filter;
pub mod frame;
pub mod instance;
pub mod message;
pub mod pack;
pub mod value;

pub use error::Error;
pub use error::Fault;
pub use error::FaultKind;
pub use error::Result;
pub use filter::Filter;
pub use filter::PackFilter;
pub use frame::decode_message;
pub use frame::encode_message;
pub use instance::GLOBAL_INSTANCE_ID;
pub use instance::RemoteInstance;
pub use message::Beacon;
pub use message::Call;
pub use message::HANDSHAKE_BEACONS;
pub use message::Message;
pub use message::Return;
pub use value::Value;
