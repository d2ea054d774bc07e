use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::common::Envelope;
use crate::error::{AuctionError, AuctionResult};

/// Largest datagram either side will send or accept.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Shared handle on a UDP socket carrying one JSON envelope per datagram.
#[derive(Debug, Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
}

impl Transport {
    pub async fn bind(addr: &str) -> AuctionResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> AuctionResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, envelope: &Envelope, to: SocketAddr) -> AuctionResult<()> {
        let frame = encode(envelope)?;
        self.send_frame(&frame, to).await
    }

    /// Sends an already encoded envelope, so a broadcast encodes once.
    pub async fn send_frame(&self, frame: &[u8], to: SocketAddr) -> AuctionResult<()> {
        self.socket.send_to(frame, to).await?;
        Ok(())
    }

    /// Waits for the next datagram. Decoding is left to the caller so a
    /// malformed frame can be reported against its sender.
    pub async fn recv(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }
}

pub fn encode(envelope: &Envelope) -> AuctionResult<Vec<u8>> {
    let frame = serde_json::to_vec(envelope)?;
    if frame.len() > MAX_FRAME_SIZE {
        return Err(AuctionError::FrameTooLarge(frame.len()));
    }
    Ok(frame)
}

pub fn decode(frame: &[u8]) -> AuctionResult<Envelope> {
    Ok(serde_json::from_slice(frame)?)
}
