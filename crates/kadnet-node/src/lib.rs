//! # kadnet-node
//!
//! The networked half of a Kademlia node: UDP transport, request handlers,
//! the in-memory value store, and the [`Node`] facade that ties them to
//! `kadnet-dht`'s routing table and lookup engine.
//!
//! `kadnet-dht` never touches a socket; everything here does.

pub mod config;
pub mod handlers;
pub mod node;
pub mod store;
pub mod transport;

pub use config::NodeConfig;
pub use node::{GetValueResult, Node, NodeError, Result};
pub use store::ValueStore;
pub use transport::TransportError;
