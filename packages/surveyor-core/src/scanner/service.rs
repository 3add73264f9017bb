//! Management-service probe: a plain TCP connect

use super::{Probe, ProbeOutcome};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Default management port (SSH)
pub const DEFAULT_SERVICE_PORT: u16 = 22;

/// Checks that something accepts TCP connections on `port`.
///
/// The connection is dropped as soon as it is established; no bytes are
/// exchanged.
#[derive(Debug, Clone)]
pub struct TcpServiceProbe {
    port: u16,
    timeout: Duration,
}

impl TcpServiceProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Probe for TcpServiceProbe {
    async fn probe(&self, address: IpAddr) -> ProbeOutcome {
        let target = SocketAddr::new(address, self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => ProbeOutcome::Responded,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ProbeOutcome::Refused,
            Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_responds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let probe = TcpServiceProbe::new(port, Duration::from_secs(2));
        let outcome = probe.probe("127.0.0.1".parse().unwrap()).await;
        assert_eq!(outcome, ProbeOutcome::Responded);
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_port_is_excluded() {
        // Bind then drop to find a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TcpServiceProbe::new(port, Duration::from_secs(2));
        let outcome = probe.probe("127.0.0.1".parse().unwrap()).await;
        assert!(!outcome.is_responded(), "got {:?}", outcome);
    }

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_SERVICE_PORT, 22);
        assert_eq!(TcpServiceProbe::new(2222, Duration::from_secs(1)).port(), 2222);
    }
}
