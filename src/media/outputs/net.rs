// SPDX-License-Identifier: GPL-3.0-only

use super::FrameWriter;
use crate::errors::OutputError;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use tracing::info;

/// Largest UDP payload over IPv4
const MAX_UDP_PAYLOAD: usize = 65507;

fn resolve(target: &str) -> Result<SocketAddr, OutputError> {
    // `udp://:5000` means every interface
    let target = if target.starts_with(':') {
        format!("0.0.0.0{}", target)
    } else {
        target.to_string()
    };
    if !target.contains(':') {
        return Err(OutputError::InvalidTarget(target));
    }
    target
        .to_socket_addrs()
        .map_err(|source| OutputError::Network {
            target: target.clone(),
            source,
        })?
        .next()
        .ok_or(OutputError::InvalidTarget(target))
}

/// Sends each encoded unit as one or more datagrams
pub struct UdpWriter {
    target: String,
    socket: UdpSocket,
}

impl UdpWriter {
    pub fn connect(target: &str) -> Result<Self, OutputError> {
        let addr = resolve(target)?;
        let net_err = |source| OutputError::Network {
            target: target.to_string(),
            source,
        };
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(net_err)?;
        socket.connect(addr).map_err(net_err)?;
        info!(%addr, "Streaming over UDP");
        Ok(Self {
            target: target.to_string(),
            socket,
        })
    }
}

impl FrameWriter for UdpWriter {
    fn write_frame(&mut self, data: &[u8], _timestamp_us: i64, _keyframe: bool) -> Result<(), OutputError> {
        for chunk in data.chunks(MAX_UDP_PAYLOAD) {
            self.socket
                .send(chunk)
                .map_err(|source| OutputError::Network {
                    target: self.target.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Byte stream to one TCP peer
pub struct TcpWriter {
    target: String,
    stream: TcpStream,
}

impl TcpWriter {
    pub fn connect(target: &str) -> Result<Self, OutputError> {
        let addr = resolve(target)?;
        let stream = TcpStream::connect(addr).map_err(|source| OutputError::Network {
            target: target.to_string(),
            source,
        })?;
        info!(%addr, "Streaming to TCP peer");
        Ok(Self {
            target: target.to_string(),
            stream,
        })
    }

    /// Block until one client connects
    pub fn listen(target: &str) -> Result<Self, OutputError> {
        let addr = resolve(target)?;
        let net_err = |source| OutputError::Network {
            target: target.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(net_err)?;
        info!(%addr, "Waiting for TCP client");
        let (stream, peer) = listener.accept().map_err(net_err)?;
        info!(%peer, "TCP client connected");
        Ok(Self {
            target: target.to_string(),
            stream,
        })
    }
}

impl FrameWriter for TcpWriter {
    fn write_frame(&mut self, data: &[u8], _timestamp_us: i64, _keyframe: bool) -> Result<(), OutputError> {
        self.stream
            .write_all(data)
            .map_err(|source| OutputError::Network {
                target: self.target.clone(),
                source,
            })
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.stream.flush().map_err(|source| OutputError::Network {
            target: self.target.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_udp_frames_arrive() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mut w = UdpWriter::connect(&format!("127.0.0.1:{}", port)).unwrap();
        w.write_frame(b"jpeg", 0, true).unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"jpeg");
    }

    #[test]
    fn test_tcp_client_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut w = TcpWriter::connect(&addr.to_string()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        w.write_frame(b"h264", 0, true).unwrap();
        drop(w);

        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"h264");
    }

    #[test]
    fn test_target_without_port_rejected() {
        assert!(matches!(
            resolve("localhost"),
            Err(OutputError::InvalidTarget(_))
        ));
    }
}
