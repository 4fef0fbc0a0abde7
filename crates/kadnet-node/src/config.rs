//! Node configuration.
//!
//! A plain struct with sane defaults, matching the shape of the teacher's
//! `ochra-daemon::config::DaemonConfig` minus file persistence: this
//! specification's non-goals exclude any persisted state, so there is no
//! `load()`/TOML step to carry over.

use std::net::IpAddr;
use std::time::Duration;

use kadnet_dht::{ALPHA, DEFAULT_ID_WIDTH_BITS, DEFAULT_PORT, K};

/// Node-wide tunables. Construct with [`NodeConfig::default`] and override
/// fields as needed, or build one directly from CLI arguments.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Local address to bind the listening socket to.
    pub listen_ip: IpAddr,
    /// UDP port, shared by all nodes in the network (spec's well-known
    /// port assumption — see the open question on contact insertion).
    pub port: u16,
    /// Identifier width in bits. 160 in production; narrower widths are
    /// only meaningful for tests.
    pub id_width_bits: u32,
    /// Bucket capacity.
    pub k: usize,
    /// Lookup parallelism factor.
    pub alpha: usize,
    /// Backoff between `join_network` PING retries.
    pub join_retry_backoff: Duration,
    /// Per-outbound-RPC response timeout.
    pub response_timeout: Duration,
    /// Receive-loop poll timeout, bounding shutdown latency.
    pub receive_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            id_width_bits: DEFAULT_ID_WIDTH_BITS,
            k: K,
            alpha: ALPHA,
            join_retry_backoff: Duration::from_secs(1),
            response_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_secs(1),
        }
    }
}
