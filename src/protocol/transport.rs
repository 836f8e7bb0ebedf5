use crate::prelude::*;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;

const RECV_BUFFER_SIZE: usize = 1024;

/// One datagram out, one datagram in. Implemented over UDP for devices and
/// by scripted doubles in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &[u8]) -> io::Result<()>;
    async fn recv(&self) -> io::Result<Vec<u8>>;

    /// Called before each command. After it returns, replies addressed to
    /// earlier commands are never received.
    async fn renew(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Connected UDP endpoint, replaced by a freshly bound one for every command.
pub struct UdpTransport {
    socket: Mutex<Arc<UdpSocket>>,
    peer: SocketAddr,
}

async fn bind(peer: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = if peer.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(peer).await?;
    debug!("udp socket {} bound for {}", socket.local_addr()?, peer);
    Ok(socket)
}

impl UdpTransport {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let peer = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}:{} did not resolve to any address", host, port),
                )
            })?;

        Ok(Self {
            socket: Mutex::new(Arc::new(bind(peer).await?)),
            peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn socket(&self) -> Arc<UdpSocket> {
        self.socket.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let sent = self.socket().send(frame).await?;
        if sent != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes to {}", sent, frame.len(), self.peer),
            ));
        }
        Ok(())
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let len = self.socket().recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }

    async fn renew(&self) -> io::Result<()> {
        let fresh = Arc::new(bind(self.peer).await?);
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = fresh;
        Ok(())
    }
}
