//! The node facade: the object an application (the CLI, or any other
//! collaborator) drives. Owns the routing table, the value store, the
//! listening socket, and a stop flag; no other global mutable state exists.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use kadnet_dht::lookup::{iterative_lookup, LookupOutcome, LookupTransport, ProbeResponse};
use kadnet_dht::{Contact, Identifier, RoutingTable};
use kadnet_wire::{MsgType, Payload, RpcCommand, RpcMessage};
use sha1::{Digest, Sha1};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::handlers::handle_request;
use crate::store::ValueStore;
use crate::transport::{self, TransportError};

/// Errors surfaced by the node facade.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] kadnet_wire::WireError),
    #[error(transparent)]
    Dht(#[from] kadnet_dht::DhtError),
}

/// Convenience result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// A running Kademlia node.
pub struct Node {
    config: NodeConfig,
    local_id: Identifier,
    table: Arc<Mutex<RoutingTable>>,
    store: Arc<ValueStore>,
    listener: Arc<UdpSocket>,
    stop: Arc<AtomicBool>,
    receive_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Bind the listening socket and construct a node with a fresh random
    /// identifier.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let local_id = Identifier::random(config.id_width_bits, &mut rand::thread_rng());
        let bind_addr = SocketAddr::new(config.listen_ip, config.port);
        let listener = transport::bind_listener(bind_addr).await?;
        info!(id = %local_id, addr = %bind_addr, "node listening");

        let node = Self {
            table: Arc::new(Mutex::new(RoutingTable::new(local_id.clone(), config.k))),
            store: Arc::new(ValueStore::new()),
            listener: Arc::new(listener),
            stop: Arc::new(AtomicBool::new(false)),
            receive_handle: Mutex::new(None),
            local_id,
            config,
        };
        let handle = node.spawn_receive_loop();
        *node.receive_handle.lock().expect("receive handle mutex poisoned") = Some(handle);
        Ok(node)
    }

    /// This node's identifier.
    pub fn local_id(&self) -> &Identifier {
        &self.local_id
    }

    /// Number of contacts currently known, for the CLI's live prompt.
    pub fn routing_table_len(&self) -> usize {
        self.table.lock().expect("routing table mutex poisoned").len()
    }

    /// Signal the receive loop to stop, then await its termination. The loop
    /// observes the flag at its next 1-second receive-timeout tick, so this
    /// returns at most ~1 second after being called — mirrors the Python
    /// reference's `close()`, which joins its receive thread.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .receive_handle
            .lock()
            .expect("receive handle mutex poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "receive loop task panicked");
            }
        }
    }

    fn spawn_receive_loop(&self) -> JoinHandle<()> {
        let listener = self.listener.clone();
        let table = self.table.clone();
        let store = self.store.clone();
        let stop = self.stop.clone();
        let id_width_bits = self.config.id_width_bits;
        let receive_timeout = self.config.receive_timeout;
        let canonical_port = self.config.port;

        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let received = match transport::recv_with_timeout(&listener, receive_timeout).await {
                    Ok(Some(pair)) => pair,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "receive loop i/o error");
                        continue;
                    }
                };
                let (bytes, from) = received;
                let request = match RpcMessage::decode(&bytes, id_width_bits) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, from = %from, "dropping malformed datagram");
                        continue;
                    }
                };
                if request.msg_type != MsgType::Req {
                    debug!(from = %from, "dropping unsolicited response datagram");
                    continue;
                }

                let response = handle_request(&table, &store, &request, from.ip(), canonical_port);
                let Ok(encoded) = response.encode() else {
                    warn!("failed to encode response, dropping");
                    continue;
                };
                if let Err(e) = transport::send_to(&listener, &encoded, from).await {
                    warn!(error = %e, to = %from, "failed to send response");
                }
            }
            debug!("receive loop stopped");
        })
    }

    /// PING a peer; on response, learn it (at the canonical port) and
    /// return its id.
    pub async fn ping(&self, ip: IpAddr, port: u16) -> Result<Option<Identifier>> {
        let rpcid = self.random_rpcid();
        let request = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::Ping,
            sender: self.local_id.clone(),
            rpcid,
            payload: Payload::Empty,
        };
        let addr = SocketAddr::new(ip, port);
        let Some(response) = self.send_and_await(&request, addr).await? else {
            return Ok(None);
        };
        self.learn(Contact {
            addr: SocketAddr::new(ip, port),
            id: response.sender.clone(),
        });
        Ok(Some(response.sender))
    }

    /// Repeatedly PING `seed_ip` on the well-known port until it answers.
    /// Mirrors the Python reference's `while True: ... time.sleep(1)` retry
    /// loop; the distilled behavior is "repeatedly PINGs the seed", the
    /// 1-second cadence is recovered from the original source.
    pub async fn join_network(&self, seed_ip: IpAddr) -> Result<Identifier> {
        loop {
            match self.ping(seed_ip, self.config.port).await? {
                Some(seed_id) => return Ok(seed_id),
                None => {
                    debug!(seed = %seed_ip, "seed did not respond, retrying");
                    tokio::time::sleep(self.config.join_retry_backoff).await;
                }
            }
        }
    }

    /// `key = SHA-1(value) mod 2^id_width`, then STORE to each contact the
    /// lookup for `key` turns up. Returns `(key, success_count)`, or `None`
    /// if the lookup yielded no contacts.
    pub async fn store_value(&self, value: &[u8]) -> Result<Option<(Identifier, usize)>> {
        let key = self.derive_store_key(value);
        let seed = self.k_closest_snapshot(&key);
        let outcome = iterative_lookup(&seed, self, &key, false, self.config.alpha, self.config.k).await;
        let nodes = match outcome {
            Ok(LookupOutcome::Nodes(nodes)) => nodes,
            Ok(LookupOutcome::Value(_)) => unreachable!("find_value=false never returns Value"),
            Err(kadnet_dht::DhtError::EmptyRoutingTable) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if nodes.is_empty() {
            return Ok(None);
        }

        let mut success_count = 0usize;
        let text_value = String::from_utf8_lossy(value).into_owned();
        for contact in &nodes {
            let rpcid = self.random_rpcid();
            let request = RpcMessage {
                msg_type: MsgType::Req,
                command: RpcCommand::Store,
                sender: self.local_id.clone(),
                rpcid,
                payload: Payload::StoreRequest {
                    key: Some(key.clone()),
                    value: Some(text_value.clone()),
                },
            };
            if let Ok(Some(response)) = self.send_and_await(&request, contact.addr).await {
                if let Payload::StoreResponse { result: true } = response.payload {
                    success_count += 1;
                }
            }
        }
        Ok(Some((key, success_count)))
    }

    /// Perform a `find_value` lookup for `key`. Returns the value if some
    /// peer held it, else the closest-contacts list as seen by the lookup.
    pub async fn get_value(&self, key: &Identifier) -> Result<GetValueResult> {
        let seed = self.k_closest_snapshot(key);
        match iterative_lookup(&seed, self, key, true, self.config.alpha, self.config.k).await {
            Ok(LookupOutcome::Value(v)) => Ok(GetValueResult::Value(v)),
            Ok(LookupOutcome::Nodes(nodes)) => Ok(GetValueResult::ClosestContacts(nodes)),
            Err(kadnet_dht::DhtError::EmptyRoutingTable) => Ok(GetValueResult::ClosestContacts(Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    fn derive_store_key(&self, value: &[u8]) -> Identifier {
        let digest = Sha1::digest(value);
        Identifier::from_be_bytes(&digest, self.config.id_width_bits)
    }

    fn random_rpcid(&self) -> Identifier {
        Identifier::random(self.config.id_width_bits, &mut rand::thread_rng())
    }

    fn learn(&self, contact: Contact) {
        self.table.lock().expect("routing table mutex poisoned").add(contact);
    }

    /// A snapshot of the locally-known closest contacts to `target`, taken
    /// under a brief lock and then released — the lookup that follows does
    /// its own network I/O and must not hold the table lock across that.
    fn k_closest_snapshot(&self, target: &Identifier) -> Vec<Contact> {
        self.table.lock().expect("routing table mutex poisoned").k_closest(target)
    }

    async fn send_and_await(&self, request: &RpcMessage, addr: SocketAddr) -> Result<Option<RpcMessage>> {
        let encoded = request.encode()?;
        let Some(reply_bytes) = transport::send_request(&encoded, addr, self.config.response_timeout).await? else {
            return Ok(None);
        };
        match RpcMessage::decode(&reply_bytes, self.config.id_width_bits) {
            Ok(reply) if reply.rpcid == request.rpcid => Ok(Some(reply)),
            Ok(_mismatched) => {
                warn!(addr = %addr, "rpcid mismatch on response, discarding");
                Ok(None)
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "malformed response, discarding");
                Ok(None)
            }
        }
    }
}

/// The outcome of [`Node::get_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetValueResult {
    Value(Vec<u8>),
    ClosestContacts(Vec<Contact>),
}

impl LookupTransport for Node {
    async fn probe(&self, contact: &Contact, target: &Identifier, find_value: bool) -> ProbeResponse {
        let rpcid = self.random_rpcid();
        let command = if find_value {
            RpcCommand::FindValue
        } else {
            RpcCommand::FindNode
        };
        let payload = if find_value {
            Payload::FindValueRequest { key: target.clone() }
        } else {
            Payload::FindNodeRequest {
                node_id: target.clone(),
            }
        };
        let request = RpcMessage {
            msg_type: MsgType::Req,
            command,
            sender: self.local_id.clone(),
            rpcid,
            payload,
        };

        let response = match self.send_and_await(&request, contact.addr).await {
            Ok(Some(r)) => r,
            Ok(None) => return ProbeResponse::NoResponse,
            Err(_) => return ProbeResponse::NoResponse,
        };

        match response.payload {
            Payload::ValueFound { value } => ProbeResponse::Value(value.into_bytes()),
            Payload::Nodes { nodes } => {
                for node in &nodes {
                    self.learn(node.clone());
                }
                ProbeResponse::Nodes(nodes)
            }
            _ => ProbeResponse::NoResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> NodeConfig {
        config_at("127.0.0.1", 0)
    }

    /// A config bound to a specific loopback address and port. Used by the
    /// `join_network` tests, which rely on all nodes sharing a single
    /// well-known port (the canonical-port assumption in spec §9) — `0`
    /// would pick a different ephemeral port per node and defeat that.
    fn config_at(ip: &str, port: u16) -> NodeConfig {
        NodeConfig {
            listen_ip: ip.parse().expect("ip"),
            port,
            id_width_bits: 16,
            k: 20,
            alpha: 3,
            join_retry_backoff: Duration::from_millis(10),
            response_timeout: Duration::from_millis(200),
            receive_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn ping_between_two_nodes_learns_each_other() {
        let a = Node::start(test_config()).await.expect("start a");
        let b = Node::start(test_config()).await.expect("start b");

        let b_addr = b.listener.local_addr().expect("addr");
        let learned = a
            .ping(b_addr.ip(), b_addr.port())
            .await
            .expect("ping ok")
            .expect("b responded");
        assert_eq!(learned, *b.local_id());
        assert_eq!(a.routing_table_len(), 1);

        a.stop().await;
        b.stop().await;
    }

    // spec §4.3: "Close awaits task termination." `stop` must not return
    // until the receive loop has actually exited, not merely signaled.
    #[tokio::test]
    async fn stop_awaits_receive_loop_termination() {
        let node = Node::start(test_config()).await.expect("start node");

        node.stop().await;

        let handle = node
            .receive_handle
            .lock()
            .expect("receive handle mutex poisoned")
            .take();
        assert!(handle.is_none(), "stop() should have taken and awaited the handle");

        // A second call is a no-op (no handle left to await) rather than a
        // hang or a panic.
        node.stop().await;
    }

    #[tokio::test]
    async fn store_then_get_value_round_trips_through_network() {
        let a = Node::start(test_config()).await.expect("start a");
        let b = Node::start(test_config()).await.expect("start b");
        let b_addr = b.listener.local_addr().expect("addr");

        a.ping(b_addr.ip(), b_addr.port()).await.expect("ping ok");

        let (key, successes) = a
            .store_value(b"hello network")
            .await
            .expect("store ok")
            .expect("lookup found contacts");
        assert!(successes >= 1);

        let result = a.get_value(&key).await.expect("get ok");
        match result {
            GetValueResult::Value(v) => assert_eq!(v, b"hello network".to_vec()),
            GetValueResult::ClosestContacts(_) => panic!("expected value to be found"),
        }

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn get_value_on_unknown_key_returns_closest_contacts() {
        let a = Node::start(test_config()).await.expect("start a");
        let b = Node::start(test_config()).await.expect("start b");
        let b_addr = b.listener.local_addr().expect("addr");
        a.ping(b_addr.ip(), b_addr.port()).await.expect("ping ok");

        let unknown_key = Identifier::random(16, &mut rand::thread_rng());
        let result = a.get_value(&unknown_key).await.expect("get ok");
        match result {
            GetValueResult::ClosestContacts(nodes) => assert!(!nodes.is_empty()),
            GetValueResult::Value(_) => panic!("key was never stored"),
        }

        a.stop().await;
        b.stop().await;
    }

    // The seed only starts listening partway through `a`'s join attempt, so
    // `join_network` must survive at least one failed PING and retry.
    #[tokio::test]
    async fn join_network_retries_until_seed_responds() {
        let mut joiner_cfg = config_at("127.0.0.70", 19293);
        joiner_cfg.join_retry_backoff = Duration::from_millis(5);
        joiner_cfg.response_timeout = Duration::from_millis(30);
        let a = Node::start(joiner_cfg).await.expect("start joiner");

        let seed_ip: IpAddr = "127.0.0.71".parse().expect("ip");
        let (join_result, seed) = tokio::join!(a.join_network(seed_ip), async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Node::start(config_at("127.0.0.71", 19293))
                .await
                .expect("start seed")
        });

        let seed_id = join_result.expect("join eventually succeeds");
        assert_eq!(seed_id, *seed.local_id());

        a.stop().await;
        seed.stop().await;
    }

    #[tokio::test]
    async fn join_network_succeeds_immediately_when_seed_is_up() {
        let a = Node::start(config_at("127.0.0.72", 19294)).await.expect("start a");
        let b = Node::start(config_at("127.0.0.73", 19294)).await.expect("start b");

        let seed_id = a.join_network("127.0.0.73".parse().expect("ip")).await.expect("join ok");
        assert_eq!(seed_id, *b.local_id());

        a.stop().await;
        b.stop().await;
    }
}
