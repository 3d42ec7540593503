//! UDP transport
//!
//! Messages travel as single datagrams. The node's long-lived listen socket
//! is used for traffic it answers; probes and chunk requests each open an
//! [`EphemeralSocket`] so that a reply can only reach the task waiting for
//! it. Choosing the next hop is always the caller's job.

use crate::{Endpoint, Message, Result};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Encode `message` and send it to `next_hop` over `socket`
pub async fn send_message(socket: &UdpSocket, message: &Message, next_hop: &Endpoint) -> Result<()> {
    let bytes = message.encode()?;
    socket.send_to(&bytes, next_hop.addr()).await?;
    tracing::trace!(
        "Sent {} for {} via {} ({} bytes)",
        message.kind(),
        message.destination,
        next_hop,
        bytes.len()
    );
    Ok(())
}

/// Receive one datagram, returning its bytes and sender
pub async fn receive(socket: &UdpSocket, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
    Ok(socket.recv_from(buf).await?)
}

/// A short-lived socket owned by a single request
pub struct EphemeralSocket {
    socket: UdpSocket,
    local: Endpoint,
}

impl EphemeralSocket {
    /// Bind a fresh socket on `ip` with an OS-chosen port
    pub async fn bind(ip: IpAddr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        let local = Endpoint::new(socket.local_addr()?);
        Ok(Self { socket, local })
    }

    /// The endpoint replies should be addressed to
    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub async fn send(&self, message: &Message, next_hop: &Endpoint) -> Result<()> {
        send_message(&self.socket, message, next_hop).await
    }

    /// Wait up to `timeout` for any datagram; `Ok(None)` on timeout
    pub async fn receive_timeout(
        &self,
        buffer_size: usize,
        timeout: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; buffer_size];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                buf.truncate(len);
                Ok(Some((buf, from)))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Wait up to `timeout` for a datagram and decode it as a message
    pub async fn receive_message(&self, buffer_size: usize, timeout: Duration) -> Result<Option<Message>> {
        match self.receive_timeout(buffer_size, timeout).await? {
            Some((data, _)) => Ok(Some(Message::decode(&data)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_ephemeral_request_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_ep = Endpoint::new(server.local_addr().unwrap());

        let client = EphemeralSocket::bind(LOCALHOST).await.unwrap();
        let request = Message::data_request(client.local_endpoint(), server_ep, "site", "aa");
        client.send(&request, &server_ep).await.unwrap();

        let mut buf = vec![0u8; 65_536];
        let (len, from) = receive(&server, &mut buf).await.unwrap();
        let received = Message::decode(&buf[..len]).unwrap();
        assert_eq!(received, request);
        assert_eq!(Endpoint::new(from), client.local_endpoint());

        let reply = Message::data_reply(&received, b"chunk".to_vec()).unwrap();
        send_message(&server, &reply, &reply.destination).await.unwrap();

        let got = client
            .receive_message(65_536, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        match got.payload {
            Payload::DataReply(r) => assert_eq!(r.data, b"chunk"),
            _ => panic!("Expected DataReply"),
        }
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let client = EphemeralSocket::bind(LOCALHOST).await.unwrap();
        let got = client
            .receive_timeout(512, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
    }
}
