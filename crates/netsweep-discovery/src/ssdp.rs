//! SSDP M-SEARCH discovery
//!
//! Sends one `ssdp:all` search and collects unicast replies until the
//! response window closes.

use netsweep_core::ssdp::{SSDP_MULTICAST_ADDR, SSDP_PORT};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Largest reply we read; longer datagrams are truncated
const MAX_REPLY_LEN: usize = 4096;

#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Where the search is sent
    pub target: SocketAddr,
    /// How long replies are collected
    pub window: Duration,
    /// MX header value (seconds devices may wait before replying)
    pub mx: u8,
    /// Local address of the search socket
    pub bind: SocketAddr,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_ADDR, SSDP_PORT)),
            window: Duration::from_secs(5),
            mx: 2,
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

/// One reply to the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpFragment {
    pub ip: Ipv4Addr,
    /// Reply text as received
    pub raw: String,
}

/// The search request sent to the target
pub fn msearch_request(mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: ssdp:all\r\n\
         \r\n"
    )
}

/// An in-progress search
pub struct SsdpSearch {
    socket: Option<UdpSocket>,
    deadline: Instant,
    cancel: CancellationToken,
}

enum Received {
    Reply(usize, SocketAddr),
    Retry,
    Closed,
}

/// Receive errors that report an earlier send rather than a broken socket.
/// Windows surfaces an ICMP port-unreachable as a reset on the next receive.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

impl SsdpSearch {
    /// Bind, send the search and open the response window
    pub async fn start(config: SsdpConfig, cancel: CancellationToken) -> io::Result<Self> {
        let deadline = Instant::now().checked_add(config.window).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "SSDP response window too long")
        })?;

        let socket = UdpSocket::bind(config.bind).await?;
        socket.set_multicast_ttl_v4(2)?;

        let request = msearch_request(config.mx);
        socket.send_to(request.as_bytes(), config.target).await?;
        info!(
            target = %config.target,
            window_secs = config.window.as_secs_f64(),
            "Sent SSDP M-SEARCH"
        );

        Ok(Self {
            socket: Some(socket),
            deadline,
            cancel,
        })
    }

    /// Next reply, or `None` once the window has elapsed or the search was closed
    pub async fn next(&mut self) -> Option<SsdpFragment> {
        let mut buf = vec![0u8; MAX_REPLY_LEN];

        loop {
            let socket = self.socket.as_ref()?;
            let received = tokio::select! {
                _ = self.cancel.cancelled() => Received::Closed,
                _ = tokio::time::sleep_until(self.deadline) => Received::Closed,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => Received::Reply(len, from),
                    Err(e) if is_transient(&e) => {
                        debug!(error = %e, "Ignoring SSDP receive error");
                        Received::Retry
                    }
                    Err(e) => {
                        warn!(error = %e, "SSDP receive failed");
                        Received::Closed
                    }
                },
            };

            match received {
                Received::Reply(len, SocketAddr::V4(from)) => {
                    let raw = String::from_utf8_lossy(&buf[..len]).into_owned();
                    debug!(ip = %from.ip(), bytes = len, "SSDP reply");
                    return Some(SsdpFragment { ip: *from.ip(), raw });
                }
                Received::Reply(_, from) => {
                    trace!(from = %from, "Ignoring non-IPv4 SSDP reply");
                }
                Received::Retry => {}
                Received::Closed => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Release the socket now; safe to call more than once
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("SSDP search closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers the first search it receives with a fixed reply
    async fn responder(reply: &'static str) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..len]);
            if request.starts_with("M-SEARCH") && request.contains("ST: ssdp:all") {
                socket.send_to(reply.as_bytes(), from).await.unwrap();
            }
        });
        addr
    }

    fn loopback_config(target: SocketAddr) -> SsdpConfig {
        SsdpConfig {
            target,
            window: Duration::from_millis(300),
            bind: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_msearch_request() {
        let request = msearch_request(3);
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 3\r\n"));
        assert!(request.ends_with("ST: ssdp:all\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_single_responder() {
        let target = responder("HTTP/1.1 200 OK\r\nSERVER: TestDevice/1.0\r\nST: upnp:rootdevice\r\n\r\n").await;
        let mut search = SsdpSearch::start(loopback_config(target), CancellationToken::new())
            .await
            .unwrap();

        let fragment = search.next().await.unwrap();
        assert_eq!(fragment.ip, Ipv4Addr::LOCALHOST);
        assert!(fragment.raw.contains("SERVER: TestDevice/1.0"));

        assert_eq!(search.next().await, None);
        assert!(search.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let target = responder("HTTP/1.1 200 OK\r\n\r\n").await;
        let mut search = SsdpSearch::start(loopback_config(target), CancellationToken::new())
            .await
            .unwrap();

        search.close();
        search.close();
        assert!(search.is_closed());
        assert_eq!(search.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_ends_window() {
        let target = responder("HTTP/1.1 200 OK\r\n\r\n").await;
        let cancel = CancellationToken::new();
        let config = SsdpConfig {
            window: Duration::from_secs(30),
            ..loopback_config(target)
        };
        let mut search = SsdpSearch::start(config, cancel.clone()).await.unwrap();

        // Drain the one reply, then cancel instead of waiting out the window
        search.next().await.unwrap();
        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), search.next()).await;
        assert_eq!(next.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_window_rejected() {
        let config = SsdpConfig {
            window: Duration::MAX,
            ..loopback_config("127.0.0.1:1900".parse().unwrap())
        };
        let err = SsdpSearch::start(config, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_transient_receive_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::new(io::ErrorKind::Other, "socket gone")));
    }
}
