//! Request handlers: dispatch an incoming request to the routing table and
//! value store, and build the response.
//!
//! Every handler learns the sender's contact first, using the datagram's
//! source IP but the node's *listening* port rather than the datagram's
//! source port — the port on an incoming request is the sender's ephemeral
//! send port, and the listening port is assumed canonical across the
//! network. This precludes multiple nodes behind one NAT; the behavior is
//! preserved as-is rather than "fixed", per the design note it was recovered
//! from.

use std::net::{IpAddr, SocketAddr};

use kadnet_dht::{Contact, Identifier, RoutingTable};
use kadnet_wire::{MsgType, Payload, RpcCommand, RpcMessage};

use crate::store::ValueStore;

/// Handle one decoded request, learning the sender and returning the
/// response to send back (if any — all four RPCs here always produce one).
pub fn handle_request(
    table: &std::sync::Mutex<RoutingTable>,
    store: &ValueStore,
    request: &RpcMessage,
    source_ip: IpAddr,
    canonical_port: u16,
) -> RpcMessage {
    let sender_contact = Contact {
        addr: SocketAddr::new(source_ip, canonical_port),
        id: request.sender.clone(),
    };
    {
        let mut guard = table.lock().expect("routing table mutex poisoned");
        guard.add(sender_contact);
    }

    let local_id = table.lock().expect("routing table mutex poisoned").local_id().clone();

    let payload = match (&request.command, &request.payload) {
        (RpcCommand::Ping, _) => Payload::Empty,
        (RpcCommand::FindNode, Payload::FindNodeRequest { node_id }) => {
            if *node_id == local_id {
                tracing::warn!(node_id = %node_id, "FIND_NODE issued with responder's own id; weird, but ok");
            }
            let nodes = table
                .lock()
                .expect("routing table mutex poisoned")
                .k_closest(node_id);
            Payload::Nodes { nodes }
        }
        (RpcCommand::Store, Payload::StoreRequest { key, value }) => match (key, value) {
            (Some(key), Some(value)) => {
                store.put(key.clone(), value.clone().into_bytes());
                Payload::StoreResponse { result: true }
            }
            _ => Payload::StoreResponse { result: false },
        },
        (RpcCommand::FindValue, Payload::FindValueRequest { key }) => {
            match store.get(key) {
                Some(bytes) => Payload::ValueFound {
                    value: String::from_utf8_lossy(&bytes).into_owned(),
                },
                None => {
                    let nodes = table
                        .lock()
                        .expect("routing table mutex poisoned")
                        .k_closest(key);
                    Payload::Nodes { nodes }
                }
            }
        }
        // Any other (command, payload) pairing is unreachable by
        // construction of RpcMessage::decode, which always produces the
        // payload variant matching its own command.
        _ => Payload::StoreResponse { result: false },
    };

    RpcMessage {
        msg_type: MsgType::Resp,
        command: request.command,
        sender: local_id,
        rpcid: request.rpcid.clone(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn id(n: u64) -> Identifier {
        Identifier::from_decimal(&n.to_string(), 160).expect("parse")
    }

    fn fresh_table() -> Mutex<RoutingTable> {
        Mutex::new(RoutingTable::new(id(1), 20))
    }

    #[test]
    fn ping_learns_sender_and_echoes_rpcid() {
        let table = fresh_table();
        let store = ValueStore::new();
        let req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::Ping,
            sender: id(2),
            rpcid: id(42),
            payload: Payload::Empty,
        };
        let resp = handle_request(&table, &store, &req, "127.0.0.1".parse().expect("ip"), 1337);
        assert_eq!(resp.msg_type, MsgType::Resp);
        assert_eq!(resp.rpcid, id(42));
        assert_eq!(resp.payload, Payload::Empty);
        assert!(table.lock().expect("lock").get_info(&id(2)).is_some());
    }

    #[test]
    fn find_node_returns_k_closest() {
        let table = fresh_table();
        table.lock().expect("lock").add(Contact {
            addr: "127.0.0.1:9".parse().expect("addr"),
            id: id(9),
        });
        let store = ValueStore::new();
        let req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::FindNode,
            sender: id(2),
            rpcid: id(42),
            payload: Payload::FindNodeRequest { node_id: id(9) },
        };
        let resp = handle_request(&table, &store, &req, "127.0.0.1".parse().expect("ip"), 1337);
        match resp.payload {
            Payload::Nodes { nodes } => assert!(nodes.iter().any(|c| c.id == id(9))),
            _ => panic!("expected Nodes payload"),
        }
    }

    #[test]
    fn store_then_find_value_hits_local_store() {
        let table = fresh_table();
        let store = ValueStore::new();
        let store_req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::Store,
            sender: id(2),
            rpcid: id(10),
            payload: Payload::StoreRequest {
                key: Some(id(5)),
                value: Some("hello".to_string()),
            },
        };
        let store_resp = handle_request(&table, &store, &store_req, "127.0.0.1".parse().expect("ip"), 1337);
        assert_eq!(store_resp.payload, Payload::StoreResponse { result: true });

        let find_req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::FindValue,
            sender: id(2),
            rpcid: id(11),
            payload: Payload::FindValueRequest { key: id(5) },
        };
        let find_resp = handle_request(&table, &store, &find_req, "127.0.0.1".parse().expect("ip"), 1337);
        assert_eq!(
            find_resp.payload,
            Payload::ValueFound {
                value: "hello".to_string()
            }
        );
    }

    #[test]
    fn store_with_missing_value_returns_false_and_leaves_store_unchanged() {
        let table = fresh_table();
        let store = ValueStore::new();
        let req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::Store,
            sender: id(2),
            rpcid: id(10),
            payload: Payload::StoreRequest {
                key: Some(id(5)),
                value: None,
            },
        };
        let resp = handle_request(&table, &store, &req, "127.0.0.1".parse().expect("ip"), 1337);
        assert_eq!(resp.payload, Payload::StoreResponse { result: false });
        assert_eq!(store.get(&id(5)), None);
    }

    #[test]
    fn find_value_miss_falls_back_to_k_closest() {
        let table = fresh_table();
        table.lock().expect("lock").add(Contact {
            addr: "127.0.0.1:9".parse().expect("addr"),
            id: id(9),
        });
        let store = ValueStore::new();
        let req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::FindValue,
            sender: id(2),
            rpcid: id(12),
            payload: Payload::FindValueRequest { key: id(99) },
        };
        let resp = handle_request(&table, &store, &req, "127.0.0.1".parse().expect("ip"), 1337);
        match resp.payload {
            Payload::Nodes { .. } => {}
            _ => panic!("expected Nodes fallback"),
        }
    }

    #[test]
    fn sender_is_learned_at_canonical_port_not_source_port() {
        let table = fresh_table();
        let store = ValueStore::new();
        let req = RpcMessage {
            msg_type: MsgType::Req,
            command: RpcCommand::Ping,
            sender: id(2),
            rpcid: id(1),
            payload: Payload::Empty,
        };
        // Simulate a datagram that arrived from an ephemeral source port
        // far from the well-known listening port.
        handle_request(&table, &store, &req, "127.0.0.1".parse().expect("ip"), 1337);
        let info = table.lock().expect("lock").get_info(&id(2)).expect("learned");
        assert_eq!(info.addr.port(), 1337);
    }
}
