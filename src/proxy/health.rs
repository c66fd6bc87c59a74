//! HTTP health probe.
//!
//! Load balancers poke the Bolt listener with plain HTTP GETs. Any GET
//! that is not a WebSocket upgrade is treated as a health check, answered
//! 200 and closed. The listener being up is the health condition.

use tokio::io::AsyncWriteExt;

use super::error::ProxyResult;
use super::transport::BoxedIo;

/// Response body for health checks.
const HEALTH_BODY: &str = "bolt-proxy ok\n";

/// Whether a buffered HTTP request is a health check.
///
/// GET without an `Upgrade: websocket` header qualifies; the well-known
/// paths (`/`, `/health`, `/healthz`) are what probes actually send.
pub fn is_health_check(request: &[u8]) -> bool {
    if !request.starts_with(b"GET ") {
        return false;
    }
    let text = String::from_utf8_lossy(request).to_lowercase();
    !(text.contains("upgrade:") && text.contains("websocket"))
}

/// Answer a health check and leave the connection to be closed.
pub async fn respond(io: &mut BoxedIo) -> ProxyResult<()> {
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: text/plain\r\n\
         content-length: {}\r\n\
         connection: close\r\n\
         \r\n\
         {}",
        HEALTH_BODY.len(),
        HEALTH_BODY
    );
    io.write_all(response.as_bytes()).await?;
    io.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_plain_get_is_health_check() {
        assert!(is_health_check(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(is_health_check(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(is_health_check(b"GET /healthz HTTP/1.0\r\n\r\n"));
    }

    #[test]
    fn test_websocket_upgrade_is_not_health_check() {
        let req = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: abc\r\n\r\n";
        assert!(!is_health_check(req));
        // Header casing does not matter
        let req = b"GET / HTTP/1.1\r\nUPGRADE: WebSocket\r\n\r\n";
        assert!(!is_health_check(req));
    }

    #[test]
    fn test_non_get_is_not_health_check() {
        assert!(!is_health_check(b"POST / HTTP/1.1\r\n\r\n"));
        assert!(!is_health_check(b"\x60\x60\xB0\x17"));
    }

    #[tokio::test]
    async fn test_respond_is_http_200() {
        let (near, mut far) = duplex(1024);
        let mut io: BoxedIo = Box::new(near);
        respond(&mut io).await.unwrap();
        drop(io);

        let mut response = String::new();
        far.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(HEALTH_BODY));
    }
}
