//! Administrative control-plane client for a silo cluster.
//!
//! Speaks the length-prefixed admin protocol over TCP against each node's
//! admin port: bulk entry streaming in and out, background partition
//! migration, and version-vector metadata updates. Start from
//! [`AdminClient`].

pub mod client;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod filter;
pub mod messages;
pub mod metadata;
pub mod pool;
pub mod proto;
pub mod stream;
pub mod versioning;

pub use client::{AdminClient, AsyncStatus};
pub use cluster::{Cluster, Node};
pub use config::AdminConfig;
pub use errors::{Error, ServerErrorKind};
pub use filter::{NamedFilter, StreamFilter};
pub use metadata::{ServerState, StoreDefinition};
pub use stream::{FetchEntriesStream, FetchKeysStream};
pub use versioning::{ClockEntry, Occurred, VectorClock, Versioned};
