//! UDP transport: one bound listening socket plus ephemeral per-request
//! outbound sockets.
//!
//! The listening socket is read with a 1-second receive timeout so the
//! background receive task can observe a shutdown flag promptly; each
//! outbound RPC opens a fresh ephemeral socket so a late, unrelated
//! datagram can never be mistaken for the response to a different call.

use std::net::SocketAddr;
use std::time::Duration;

use kadnet_wire::MAX_MSG_SIZE;
use tokio::net::UdpSocket;

/// Errors that can occur sending or receiving over the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind the node's listening socket.
pub async fn bind_listener(addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    Ok(UdpSocket::bind(addr).await?)
}

/// Receive one datagram on `socket`, waiting at most `timeout`. `Ok(None)`
/// on timeout (no datagram arrived); this is the receive task's
/// shutdown-polling tick.
pub async fn recv_with_timeout(
    socket: &UdpSocket,
    timeout: Duration,
) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
    let mut buf = vec![0u8; MAX_MSG_SIZE];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => Ok(Some((buf[..len].to_vec(), from))),
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => Ok(None),
    }
}

/// Send `bytes` to `dest` from the listening socket (used to answer
/// requests on the same socket they arrived on).
pub async fn send_to(socket: &UdpSocket, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
    socket.send_to(bytes, dest).await?;
    Ok(())
}

/// Open a fresh ephemeral socket, send `bytes` to `dest`, and wait up to
/// `timeout` for one reply datagram. `Ok(None)` means "no response" (not an
/// error) — timeouts are not retried at this layer.
pub async fn send_request(
    bytes: &[u8],
    dest: SocketAddr,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, TransportError> {
    let bind_addr: SocketAddr = if dest.is_ipv6() {
        "[::]:0".parse().expect("valid wildcard addr")
    } else {
        "0.0.0.0:0".parse().expect("valid wildcard addr")
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.send_to(bytes, dest).await?;

    let mut buf = vec![0u8; MAX_MSG_SIZE];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _from))) => Ok(Some(buf[..len].to_vec())),
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trip_over_loopback() {
        let listener = bind_listener("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let listen_addr = listener.local_addr().expect("local addr");

        let responder = tokio::spawn(async move {
            let (bytes, from) = recv_with_timeout(&listener, Duration::from_secs(2))
                .await
                .expect("recv ok")
                .expect("datagram arrived");
            assert_eq!(bytes, b"ping");
            send_to(&listener, b"pong", from).await.expect("send ok");
        });

        let reply = send_request(b"ping", listen_addr, Duration::from_secs(2))
            .await
            .expect("send ok")
            .expect("reply arrived");
        assert_eq!(reply, b"pong");
        responder.await.expect("responder task");
    }

    #[tokio::test]
    async fn timeout_yields_no_response_not_error() {
        // A live but silent listener: the port stays open, but nothing
        // ever reads the datagram or replies to it, so the timeout (and
        // not an ICMP port-unreachable error) is what ends the wait.
        let silent_listener = bind_listener("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let silent_addr = silent_listener.local_addr().expect("local addr");

        let reply = send_request(b"ping", silent_addr, Duration::from_millis(50))
            .await
            .expect("send ok, no panic on timeout");
        assert!(reply.is_none());
        drop(silent_listener);
    }

    #[tokio::test]
    async fn recv_timeout_returns_none_when_idle() {
        let listener = bind_listener("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let result = recv_with_timeout(&listener, Duration::from_millis(50))
            .await
            .expect("recv ok");
        assert!(result.is_none());
    }
}
