//! 프런트엔드
//!
//! 리스너와 디스패처: 새 연결의 첫 4바이트로 Bolt 매직 / HTTP GET /
//! 그 외를 구분하고, 핸드셰이크를 중계한 뒤 세션 상태 기계에 넘깁니다.
//! HTTP는 헬스 체크면 즉답하고, 아니면 WebSocket으로 업그레이드해 같은
//! 세션 경로로 흘립니다.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::PrivateKeyDer;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::bolt::{handshake, BOLT_MAGIC, PROPOSALS_SIZE};

use super::backend::Backend;
use super::config::ProxyConfig;
use super::error::{ProxyError, ProxyResult};
use super::health;
use super::session::Session;
use super::transport::{direct_pair, ws_pair, BoxedIo, PrefixedStream};

/// 첫 바이트 스니핑 한도
const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP 요청 헤더 최대 크기
const MAX_HTTP_REQUEST: usize = 8192;

/// 리스너 기동과 수락 루프
///
/// 바인드 실패는 시작 에러로 전파됩니다. 수락 루프는 끝나지 않습니다.
pub async fn serve(config: ProxyConfig, backend: Arc<Backend>) -> ProxyResult<()> {
    let listener = TcpListener::bind(&config.bind).await.map_err(|e| {
        ProxyError::configuration(format!("cannot bind {}: {e}", config.bind))
    })?;

    let tls = match config.listener_tls() {
        Some((cert, key)) => {
            let acceptor = build_tls_acceptor(cert, key)?;
            info!("listening for TLS connections on {}", config.bind);
            Some(acceptor)
        }
        None => {
            info!("listening on {}", config.bind);
            None
        }
    };

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error: {e}");
                continue;
            }
        };
        socket.set_nodelay(true).ok();

        let backend = backend.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let peer = peer.to_string();
            let io: BoxedIo = match tls {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(stream) => Box::new(stream),
                    Err(e) => {
                        warn!(peer = %peer, "TLS accept failed: {e}");
                        return;
                    }
                },
                None => Box::new(socket),
            };
            handle_client(io, peer, backend).await;
        });
    }
}

/// 리스너 TLS 구성 로드
pub fn build_tls_acceptor(cert: &Path, key: &Path) -> ProxyResult<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::configuration(format!("bad certificate file: {e}")))?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))
            .map_err(|e| ProxyError::configuration(format!("bad key file: {e}")))?
            .ok_or_else(|| ProxyError::configuration("no private key found in key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::configuration(format!("TLS configuration failed: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// 연결 디스패치: Bolt / HTTP / 그 외 판별
async fn handle_client(mut io: BoxedIo, peer: String, backend: Arc<Backend>) {
    let mut head = [0u8; 4];
    match timeout(SNIFF_TIMEOUT, io.read_exact(&mut head)).await {
        Err(_) => {
            warn!(peer = %peer, "timed out sniffing first bytes");
            return;
        }
        Ok(Err(e)) => {
            warn!(peer = %peer, "bad connection: {e}");
            return;
        }
        Ok(Ok(_)) => {}
    }

    let result = if head == BOLT_MAGIC {
        serve_direct(io, &peer, backend).await
    } else if &head == b"GET " {
        serve_http(io, head, &peer, backend).await
    } else {
        // Bolt도 HTTP도 아닌 무언가
        info!(peer = %peer, "client is speaking gibberish: {head:02X?}");
        Ok(())
    };

    if let Err(e) = result {
        if e.is_hangup() {
            debug!(peer = %peer, "peer hung up during setup");
        } else {
            warn!(peer = %peer, "connection setup failed: {e}");
        }
    }
}

/// 직결 Bolt 클라이언트 경로
async fn serve_direct(mut io: BoxedIo, peer: &str, backend: Arc<Backend>) -> ProxyResult<()> {
    let mut proposals = [0u8; PROPOSALS_SIZE];
    io.read_exact(&mut proposals).await?;

    // 백엔드가 협상한 버전만 수락 가능
    let reply = handshake::negotiate(&proposals, backend.version())?;
    io.write_all(&reply).await?;
    io.flush().await?;

    let (reader, writer) = direct_pair(io);
    Session::new(backend, reader, writer, peer).run().await;
    Ok(())
}

/// HTTP 경로: 헬스 체크 또는 WebSocket 업그레이드
async fn serve_http(
    mut io: BoxedIo,
    head: [u8; 4],
    peer: &str,
    backend: Arc<Backend>,
) -> ProxyResult<()> {
    // 요청 헤더 블록 전체를 읽음
    let mut request = head.to_vec();
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        if request.len() >= MAX_HTTP_REQUEST {
            return Err(ProxyError::protocol("HTTP request header too large"));
        }
        let mut buf = [0u8; 1024];
        let n = io.read(&mut buf).await?;
        if n == 0 {
            return Err(ProxyError::protocol("connection closed mid-HTTP-request"));
        }
        request.extend_from_slice(&buf[..n]);
    }

    if health::is_health_check(&request) {
        health::respond(&mut io).await?;
        info!(peer = %peer, "healthcheck");
        return Ok(());
    }

    // 업그레이드 핸드셰이크에 소비한 요청 바이트를 되감아 넘김
    let rewound: BoxedIo = Box::new(PrefixedStream::new(request, io));
    let mut ws = tokio_tungstenite::accept_async(rewound)
        .await
        .map_err(|e| ProxyError::protocol(format!("websocket upgrade failed: {e}")))?;
    debug!(peer = %peer, "websocket upgraded");

    // 첫 바이너리 프레임은 매직 + 버전 제안이어야 함
    let first = loop {
        use futures::StreamExt;
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => break data,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => {
                return Err(ProxyError::protocol(format!(
                    "expected binary bolt handshake over websocket, got {other:?}"
                )))
            }
            Some(Err(e)) => {
                return Err(ProxyError::protocol(format!("websocket read failed: {e}")))
            }
            None => return Err(ProxyError::protocol("websocket closed before handshake")),
        }
    };
    if first.len() < 4 + PROPOSALS_SIZE {
        return Err(ProxyError::protocol("short bolt handshake over websocket"));
    }
    handshake::validate_magic(&first[..4])?;
    let reply = handshake::negotiate(&first[4..4 + PROPOSALS_SIZE], backend.version())?;

    // 4바이트 응답은 단일 바이너리 프레임으로
    {
        use futures::SinkExt;
        ws.send(Message::Binary(reply.to_vec()))
            .await
            .map_err(|e| ProxyError::protocol(format!("websocket write failed: {e}")))?;
    }

    let (reader, writer) = ws_pair(ws);
    Session::new(backend, reader, writer, peer).run().await;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
