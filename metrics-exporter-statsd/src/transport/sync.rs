use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
};

#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixStream};

use crossbeam_channel::Receiver;
use tracing::{debug, error, trace};

use super::{RemoteAddr, TransportConfiguration};
use crate::builder::ErrorHandler;

enum Client {
    Udp(UdpSocket),

    #[cfg(unix)]
    Unixgram(UnixDatagram),

    #[cfg(unix)]
    Unix(UnixStream),
}

impl Client {
    fn from_transport_config(config: &TransportConfiguration) -> io::Result<Self> {
        match &config.remote_addr {
            RemoteAddr::Udp(addrs) => {
                // Bind to the same address family as the first resolved remote address, otherwise connecting an
                // IPv4-bound socket to an IPv6 peer fails.
                let local: SocketAddr = match addrs.first() {
                    Some(SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
                    _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
                };

                UdpSocket::bind(local).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(Some(config.write_timeout))?;
                    Ok(Client::Udp(socket))
                })
            }

            #[cfg(unix)]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(config.write_timeout))?;
                Ok(Client::Unixgram(socket))
            }),

            #[cfg(unix)]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(Some(config.write_timeout))?;
                Ok(Client::Unix(socket))
            }),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Client::Udp(socket) => socket.send(buf),

            #[cfg(unix)]
            Client::Unixgram(socket) => socket.send(buf),

            #[cfg(unix)]
            Client::Unix(socket) => socket.write_all(buf).map(|()| buf.len()),
        }
    }
}

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Transport is currently disconnected.
    Disconnected,

    // Transport is connected and ready to send metrics.
    Ready(Client),
}

/// Synchronous transport to the remote StatsD server.
///
/// The underlying socket is created lazily on the first send. When a send fails, the payload is dropped and the socket
/// is discarded, so that the next send starts over with a fresh connection.
pub(crate) struct Transport {
    config: TransportConfiguration,
    state: ClientState,
}

impl Transport {
    pub fn new(config: TransportConfiguration) -> Self {
        Transport { config, state: ClientState::Disconnected }
    }

    pub fn transport_id(&self) -> &'static str {
        self.config.remote_addr.transport_id()
    }

    /// Sends a single payload.
    ///
    /// # Errors
    ///
    /// If the socket could not be created, or the write failed, an error is returned and the payload is not resent.
    pub fn try_send(&mut self, payload: &[u8]) -> io::Result<usize> {
        loop {
            let old_state = std::mem::replace(&mut self.state, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected => {
                    let client = match Client::from_transport_config(&self.config) {
                        Ok(client) => client,
                        Err(e) => {
                            self.state = ClientState::Disconnected;
                            return Err(e);
                        }
                    };

                    trace!(transport = self.transport_id(), "Connected to remote StatsD server.");
                    self.state = ClientState::Ready(client);
                }
                ClientState::Ready(mut client) => {
                    let result = client.send(payload);
                    if result.is_ok() {
                        self.state = ClientState::Ready(client);
                    } else {
                        self.state = ClientState::Disconnected;
                    }

                    return result;
                }
            };
        }
    }
}

/// Background sender that drains rendered payloads from the client's queue and writes them to the transport.
///
/// Blocking writes only ever stall this thread. The forwarder stops once every client handle feeding the queue has
/// been dropped.
pub(crate) struct Forwarder {
    transport: Transport,
    payloads: Receiver<Vec<u8>>,
    error_handler: Option<ErrorHandler>,
}

impl Forwarder {
    pub fn new(
        transport: Transport,
        payloads: Receiver<Vec<u8>>,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        Forwarder { transport, payloads, error_handler }
    }

    /// Runs the forwarder until the queue is closed.
    pub fn run(mut self) {
        while let Ok(payload) = self.payloads.recv() {
            if let Err(e) = self.transport.try_send(&payload) {
                error!(error = %e, transport = self.transport.transport_id(), "Failed to send metric.");
                if let Some(handler) = &self.error_handler {
                    handler(&e);
                }
            }
        }

        debug!(transport = self.transport.transport_id(), "All clients dropped; forwarder stopping.");
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::{Forwarder, Transport};
    use crate::transport::{RemoteAddr, TransportConfiguration};

    #[test]
    fn sends_datagram_over_udp() {
        let server = UdpSocket::bind("127.0.0.1:0").expect("bind server socket");
        server.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let server_addr = server.local_addr().expect("server address");

        let mut transport = Transport::new(TransportConfiguration {
            remote_addr: RemoteAddr::Udp(vec![server_addr]),
            write_timeout: Duration::from_secs(1),
        });

        let sent = transport.try_send(b"requests:1|c\n").expect("send payload");
        assert_eq!(sent, 13);

        let mut buf = [0u8; 64];
        let len = server.recv(&mut buf).expect("receive payload");
        assert_eq!(&buf[..len], b"requests:1|c\n");
    }

    #[cfg(unix)]
    #[test]
    fn connection_failure_is_reported_and_retried_lazily() {
        let mut transport = Transport::new(TransportConfiguration {
            remote_addr: RemoteAddr::Unix("/nonexistent/statsd.sock".into()),
            write_timeout: Duration::from_secs(1),
        });

        assert!(transport.try_send(b"requests:1|c\n").is_err());
        assert!(transport.try_send(b"requests:1|c\n").is_err());
    }

    #[test]
    fn forwarder_sends_queued_payloads_until_closed() {
        let server = UdpSocket::bind("127.0.0.1:0").expect("bind server socket");
        server.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let server_addr = server.local_addr().expect("server address");

        let transport = Transport::new(TransportConfiguration {
            remote_addr: RemoteAddr::Udp(vec![server_addr]),
            write_timeout: Duration::from_secs(1),
        });
        let (tx, rx) = crossbeam_channel::bounded(4);
        let handle = std::thread::spawn(move || Forwarder::new(transport, rx, None).run());

        tx.send(b"requests:1|c\n".to_vec()).expect("forwarder alive");
        tx.send(b"response_time:3|ms\n".to_vec()).expect("forwarder alive");
        drop(tx);
        handle.join().expect("forwarder thread");

        let mut buf = [0u8; 64];
        let len = server.recv(&mut buf).expect("receive first payload");
        assert_eq!(&buf[..len], b"requests:1|c\n");
        let len = server.recv(&mut buf).expect("receive second payload");
        assert_eq!(&buf[..len], b"response_time:3|ms\n");
    }
}
