//! # kadnet-dht
//!
//! The routing and lookup engine of a Kademlia distributed hash table.
//!
//! This crate implements:
//! - Fixed-width XOR-distance identifiers with configurable bit width
//!   ([`identifier`])
//! - The k-bucket routing table with zig-zag closeness traversal
//!   ([`routing_table`])
//! - The transport-agnostic iterative `FIND_NODE`/`FIND_VALUE` lookup
//!   ([`lookup`])
//!
//! Network I/O, the wire encoding, and the request handlers that use this
//! crate live in `kadnet-wire` and `kadnet-node`.
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | `K` (bucket size) | 20 |
//! | `ALPHA` (lookup parallelism) | 3 |
//! | Default identifier width | 160 bits |
//! | Default UDP port | 1337 |
//! | Max datagram size | 2000 bytes |

pub mod identifier;
pub mod lookup;
pub mod routing_table;

pub use identifier::Identifier;
pub use routing_table::{Contact, RoutingTable};

/// Kademlia bucket size: maximum contacts per bucket.
pub const K: usize = 20;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Default identifier width in bits (a full Kademlia 160-bit key space).
pub const DEFAULT_ID_WIDTH_BITS: u32 = 160;

/// Default UDP port the reference node listens on.
pub const DEFAULT_PORT: u16 = 1337;

/// Maximum encoded wire message size in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 2000;

/// Error types for DHT routing and lookup operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The local routing table has no contacts to seed a lookup with.
    #[error("routing table is empty")]
    EmptyRoutingTable,

    /// Two identifiers of mismatched bit width were compared.
    #[error("identifier width mismatch: {a} bits vs {b} bits")]
    WidthMismatch { a: u32, b: u32 },

    /// A decimal string could not be parsed as an identifier.
    #[error("invalid decimal identifier: {0}")]
    InvalidDecimal(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
