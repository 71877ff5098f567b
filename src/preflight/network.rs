//! Network reachability check.
//!
//! Verifies the tablet answers on its SSH port before any ssh invocation.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use super::CheckResult;
use crate::config::{DeviceTarget, DEVICE_PORT, PROBE_TIMEOUT};

/// Check that the device accepts TCP connections on port 22.
pub async fn check_network(target: &DeviceTarget) -> CheckResult {
    let addr = format!("{}:{}", target.address, DEVICE_PORT);
    probe(&addr, PROBE_TIMEOUT).await
}

async fn probe(addr: &str, timeout: Duration) -> CheckResult {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let peer = stream
                .peer_addr()
                .map(|a: SocketAddr| a.to_string())
                .unwrap_or_else(|_| addr.to_string());
            CheckResult::pass("Network", format!("Device reachable ({})", peer))
        }
        Ok(Err(e)) => CheckResult::fail(
            "Network",
            format!("Cannot connect to {}: {}", addr, e),
            "Connect the tablet over USB and make sure it is awake",
        ),
        Err(_) => CheckResult::fail(
            "Network",
            format!("Timed out connecting to {} after {}s", addr, timeout.as_secs()),
            "Connect the tablet over USB and make sure it is awake",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let result = probe(&addr, Duration::from_secs(2)).await;
        assert!(result.passed, "{}", result.message);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = probe(&addr, Duration::from_secs(2)).await;
        assert!(!result.passed);
        assert!(result.suggestion.is_some());
    }
}
