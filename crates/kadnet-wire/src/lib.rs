//! # kadnet-wire
//!
//! The RPC message envelope and its text encoding.
//!
//! A message on the wire is a single JSON object with keys `msgtype`
//! (`"req"`/`"resp"`), `command` (`1..=4`), `sender` (decimal node id),
//! `rpcid` (decimal correlation id), and an optional `data` object whose
//! shape depends on `command`. Node ids and rpcids are encoded as bare JSON
//! numbers, not quoted strings — they can exceed 160 bits' worth of digits,
//! so this crate relies on `serde_json`'s `arbitrary_precision` feature
//! rather than `u64`/`i64`.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use kadnet_dht::{Contact, Identifier};
use serde_json::{Map, Number, Value};

/// Maximum encoded message size in bytes. A 20-contact `FIND_NODE` response
/// at the default 160-bit width stays well under this.
pub const MAX_MSG_SIZE: usize = 2000;

/// Errors produced while encoding or decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The encoded message exceeds [`MAX_MSG_SIZE`].
    #[error("encoded message is {len} bytes, exceeds the {MAX_MSG_SIZE}-byte limit")]
    Oversized { len: usize },

    /// A required top-level or payload field was missing.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The `command` integer did not match a known RPC.
    #[error("unknown command: {0}")]
    UnknownCommand(i64),

    /// The `msgtype` string was neither `"req"` nor `"resp"`.
    #[error("unknown msgtype: {0}")]
    UnknownMsgType(String),

    /// A field expected to hold a decimal integer did not.
    #[error("malformed integer field `{field}`: {value}")]
    MalformedInteger { field: &'static str, value: String },

    /// The datagram was not valid JSON at all.
    #[error("malformed message body: {0}")]
    NotJson(String),
}

/// Convenience result type for wire encode/decode operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Whether a message is a request or a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgType {
    Req,
    Resp,
}

impl MsgType {
    fn as_str(self) -> &'static str {
        match self {
            MsgType::Req => "req",
            MsgType::Resp => "resp",
        }
    }
}

impl FromStr for MsgType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "req" => Ok(MsgType::Req),
            "resp" => Ok(MsgType::Resp),
            other => Err(WireError::UnknownMsgType(other.to_string())),
        }
    }
}

/// The four Kademlia RPCs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcCommand {
    Ping = 1,
    Store = 2,
    FindNode = 3,
    FindValue = 4,
}

impl RpcCommand {
    fn from_i64(v: i64) -> Result<Self> {
        match v {
            1 => Ok(RpcCommand::Ping),
            2 => Ok(RpcCommand::Store),
            3 => Ok(RpcCommand::FindNode),
            4 => Ok(RpcCommand::FindValue),
            other => Err(WireError::UnknownCommand(other)),
        }
    }

    fn as_i64(self) -> i64 {
        self as i64
    }
}

/// The command-specific `data` payload, typed by RPC and direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// `PING` request/response, or any message with no `data`.
    Empty,
    /// `STORE` request: key plus opaque value text, either of which may be
    /// absent — a missing field here is a valid request the handler
    /// answers with `result=false`, not a decode failure.
    StoreRequest {
        key: Option<Identifier>,
        value: Option<String>,
    },
    /// `STORE` response: whether the store succeeded.
    StoreResponse { result: bool },
    /// `FIND_NODE` request: the id being searched for.
    FindNodeRequest { node_id: Identifier },
    /// `FIND_NODE` response, and `FIND_VALUE` response when no value was
    /// found locally: the up-to-k closest known contacts.
    Nodes { nodes: Vec<Contact> },
    /// `FIND_VALUE` request: the key being searched for.
    FindValueRequest { key: Identifier },
    /// `FIND_VALUE` response when the value was found locally.
    ValueFound { value: String },
}

/// A fully-typed RPC message, ready to send or just decoded off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcMessage {
    pub msg_type: MsgType,
    pub command: RpcCommand,
    pub sender: Identifier,
    pub rpcid: Identifier,
    pub payload: Payload,
}

impl RpcMessage {
    /// Encode this message as a JSON-text datagram, rejecting the result if
    /// it would exceed [`MAX_MSG_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut obj = Map::new();
        obj.insert(
            "msgtype".to_string(),
            Value::String(self.msg_type.as_str().to_string()),
        );
        obj.insert(
            "command".to_string(),
            Value::Number(Number::from(self.command.as_i64())),
        );
        obj.insert("sender".to_string(), decimal_number(&self.sender)?);
        obj.insert("rpcid".to_string(), decimal_number(&self.rpcid)?);
        if let Some(data) = encode_payload(&self.payload)? {
            obj.insert("data".to_string(), data);
        }

        let text = serde_json::to_vec(&Value::Object(obj))
            .map_err(|e| WireError::NotJson(e.to_string()))?;
        if text.len() > MAX_MSG_SIZE {
            return Err(WireError::Oversized { len: text.len() });
        }
        Ok(text)
    }

    /// Decode a JSON-text datagram into a typed message.
    ///
    /// `id_width_bits` is the local node's identifier width, used to
    /// interpret `sender`/`rpcid`/key-bearing integer fields.
    pub fn decode(bytes: &[u8], id_width_bits: u32) -> Result<Self> {
        if bytes.len() > MAX_MSG_SIZE {
            return Err(WireError::Oversized { len: bytes.len() });
        }
        let text = std::str::from_utf8(bytes).map_err(|e| WireError::NotJson(e.to_string()))?;
        let value: Value = serde_json::from_str(text).map_err(|e| WireError::NotJson(e.to_string()))?;
        let obj = value.as_object().ok_or_else(|| WireError::NotJson("top-level value is not an object".to_string()))?;

        let msgtype_str = obj
            .get("msgtype")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("msgtype"))?;
        let msg_type: MsgType = msgtype_str.parse()?;

        let command_num = obj.get("command").ok_or(WireError::MissingField("command"))?;
        let command_i64 = command_num
            .as_i64()
            .ok_or_else(|| WireError::MalformedInteger {
                field: "command",
                value: command_num.to_string(),
            })?;
        let command = RpcCommand::from_i64(command_i64)?;

        let sender = identifier_field(obj, "sender", id_width_bits)?;
        let rpcid = identifier_field(obj, "rpcid", id_width_bits)?;

        let data = obj.get("data");
        let payload = decode_payload(command, msg_type, data, id_width_bits)?;

        Ok(RpcMessage {
            msg_type,
            command,
            sender,
            rpcid,
            payload,
        })
    }
}

fn decimal_number(id: &Identifier) -> Result<Value> {
    let decimal = id.to_decimal();
    // `serde_json::from_str::<Number>` is the documented route to an
    // arbitrary-precision JSON number from a decimal string; `Number` has
    // no public `FromStr` impl.
    serde_json::from_str::<Number>(&decimal)
        .map(Value::Number)
        .map_err(|e| WireError::MalformedInteger {
            field: "identifier",
            value: format!("{decimal} ({e})"),
        })
}

fn identifier_field(obj: &Map<String, Value>, field: &'static str, width: u32) -> Result<Identifier> {
    let v = obj.get(field).ok_or(WireError::MissingField(field))?;
    let decimal = match v {
        Value::Number(n) => n.to_string(),
        other => {
            return Err(WireError::MalformedInteger {
                field,
                value: other.to_string(),
            })
        }
    };
    Identifier::from_decimal(&decimal, width).map_err(|_| WireError::MalformedInteger {
        field,
        value: decimal,
    })
}

fn encode_payload(payload: &Payload) -> Result<Option<Value>> {
    match payload {
        Payload::Empty => Ok(None),
        Payload::StoreRequest { key, value } => {
            let mut m = Map::new();
            if let Some(key) = key {
                m.insert("key".to_string(), decimal_number(key)?);
            }
            if let Some(value) = value {
                m.insert("value".to_string(), Value::String(value.clone()));
            }
            Ok(Some(Value::Object(m)))
        }
        Payload::StoreResponse { result } => {
            let mut m = Map::new();
            m.insert("result".to_string(), Value::Bool(*result));
            Ok(Some(Value::Object(m)))
        }
        Payload::FindNodeRequest { node_id } => {
            let mut m = Map::new();
            m.insert("nodeid".to_string(), decimal_number(node_id)?);
            Ok(Some(Value::Object(m)))
        }
        Payload::FindValueRequest { key } => {
            let mut m = Map::new();
            m.insert("key".to_string(), decimal_number(key)?);
            Ok(Some(Value::Object(m)))
        }
        Payload::ValueFound { value } => {
            let mut m = Map::new();
            m.insert("value".to_string(), Value::String(value.clone()));
            Ok(Some(Value::Object(m)))
        }
        Payload::Nodes { nodes } => {
            let mut list = Vec::with_capacity(nodes.len());
            for c in nodes {
                let ip = c.addr.ip().to_string();
                let port = c.addr.port();
                list.push(Value::Array(vec![
                    Value::String(ip),
                    Value::Number(Number::from(port)),
                    decimal_number(&c.id)?,
                ]));
            }
            let mut m = Map::new();
            m.insert("nodes".to_string(), Value::Array(list));
            Ok(Some(Value::Object(m)))
        }
    }
}

fn decode_payload(
    command: RpcCommand,
    msg_type: MsgType,
    data: Option<&Value>,
    id_width_bits: u32,
) -> Result<Payload> {
    let empty = Map::new();
    let obj = data.and_then(Value::as_object).unwrap_or(&empty);

    match (command, msg_type) {
        (RpcCommand::Ping, _) => Ok(Payload::Empty),
        (RpcCommand::Store, MsgType::Req) => {
            let key = identifier_field(obj, "key", id_width_bits).ok();
            let value = obj.get("value").and_then(Value::as_str).map(str::to_string);
            Ok(Payload::StoreRequest { key, value })
        }
        (RpcCommand::Store, MsgType::Resp) => {
            let result = obj
                .get("result")
                .and_then(Value::as_bool)
                .ok_or(WireError::MissingField("result"))?;
            Ok(Payload::StoreResponse { result })
        }
        (RpcCommand::FindNode, MsgType::Req) => {
            let node_id = identifier_field(obj, "nodeid", id_width_bits)?;
            Ok(Payload::FindNodeRequest { node_id })
        }
        (RpcCommand::FindNode, MsgType::Resp) => decode_nodes(obj, id_width_bits),
        (RpcCommand::FindValue, MsgType::Req) => {
            let key = identifier_field(obj, "key", id_width_bits)?;
            Ok(Payload::FindValueRequest { key })
        }
        (RpcCommand::FindValue, MsgType::Resp) => {
            if let Some(value) = obj.get("value").and_then(Value::as_str) {
                Ok(Payload::ValueFound {
                    value: value.to_string(),
                })
            } else {
                decode_nodes(obj, id_width_bits)
            }
        }
    }
}

fn decode_nodes(obj: &Map<String, Value>, id_width_bits: u32) -> Result<Payload> {
    let arr = obj
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or(WireError::MissingField("nodes"))?;
    let mut nodes = Vec::with_capacity(arr.len());
    for entry in arr {
        let triple = entry
            .as_array()
            .ok_or(WireError::MissingField("nodes[i]"))?;
        if triple.len() != 3 {
            return Err(WireError::MissingField("nodes[i]"));
        }
        let ip_str = triple[0].as_str().ok_or(WireError::MissingField("nodes[i].ip"))?;
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| WireError::MalformedInteger {
                field: "nodes[i].ip",
                value: ip_str.to_string(),
            })?;
        let port = triple[1]
            .as_u64()
            .ok_or(WireError::MissingField("nodes[i].port"))? as u16;
        let id_decimal = match &triple[2] {
            Value::Number(n) => n.to_string(),
            other => {
                return Err(WireError::MalformedInteger {
                    field: "nodes[i].id",
                    value: other.to_string(),
                })
            }
        };
        let id = Identifier::from_decimal(&id_decimal, id_width_bits).map_err(|_| {
            WireError::MalformedInteger {
                field: "nodes[i].id",
                value: id_decimal,
            }
        })?;
        nodes.push(Contact {
            addr: SocketAddr::new(ip, port),
            id,
        });
    }
    Ok(Payload::Nodes { nodes })
}
