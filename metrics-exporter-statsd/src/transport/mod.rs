use std::{
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

#[cfg(unix)]
use std::path::PathBuf;

pub(crate) mod sync;

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(unix)]
    Unixgram(PathBuf),

    #[cfg(unix)]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Resolves a host/port pair into a UDP remote address.
    pub fn udp(host: &str, port: u16) -> Result<Self, String> {
        resolve_udp((host, port), &format!("{host}:{port}"))
    }

    /// Returns the transport ID for the remote address.
    ///
    /// This is a simple acronym related to the transport that will be used for the remote address, such as `udp` for
    /// UDP, and so on.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(unix)]
            RemoteAddr::Unix(_) => "uds-stream",
            #[cfg(unix)]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }
}

impl Default for RemoteAddr {
    fn default() -> Self {
        RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))])
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        if let Some((scheme, path)) = addr.split_once("://") {
            return match scheme {
                #[cfg(unix)]
                "unix" => Ok(RemoteAddr::Unix(PathBuf::from(path))),
                #[cfg(unix)]
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(path))),
                "udp" => RemoteAddr::try_from(path),
                _ => Err(format!("invalid scheme '{scheme}' (expected 'udp', 'unix' or 'unixgram')")),
            };
        }

        resolve_udp(addr, addr)
    }
}

fn resolve_udp<A: ToSocketAddrs>(addr: A, display: &str) -> Result<RemoteAddr, String> {
    let addrs: Vec<_> = addr.to_socket_addrs().map_err(|e| e.to_string())?.collect();
    if addrs.is_empty() {
        return Err(format!("'{display}' did not resolve to any address"));
    }

    Ok(RemoteAddr::Udp(addrs))
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub(crate) struct TransportConfiguration {
    pub remote_addr: RemoteAddr,
    pub write_timeout: Duration,
}

impl TransportConfiguration {
    /// Returns `true` if the remote address requires a length prefix to be sent before each payload.
    pub fn requires_length_prefix(&self) -> bool {
        match self.remote_addr {
            RemoteAddr::Udp(_) => false,
            #[cfg(unix)]
            RemoteAddr::Unix(_) => true,
            #[cfg(unix)]
            RemoteAddr::Unixgram(_) => false,
        }
    }
}
