//! Transport plumbing shared by the frontend, the authenticator and the
//! provider.
//!
//! Client connections arrive as plain TCP, TLS, or Bolt-over-WebSocket;
//! backend connections are plain TCP or TLS depending on the backend URI
//! scheme. Everything above this module works with [`BoxedIo`] byte
//! streams and [`ClientReader`]/[`ClientWriter`] halves, so the session
//! state machine never knows which transport it is driving.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Decoder, FramedRead};

use crate::bolt::codec::split_frames;
use crate::bolt::{BoltError, BoltFrame, BoltFrameCodec};

use super::config::BackendTlsMode;
use super::error::{ProxyError, ProxyResult};

/// Byte stream usable by any proxy component.
pub trait Io: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Io for T {}

/// Boxed transport stream.
pub type BoxedIo = Box<dyn Io>;

/// Read one framed Bolt message from a raw stream.
///
/// Used during handshake-adjacent exchanges (auth, provider sessions)
/// where exactly one reply is outstanding; steady-state traffic goes
/// through [`FramedRead`] instead.
pub async fn read_frame(io: &mut BoxedIo) -> ProxyResult<BoltFrame> {
    let mut codec = BoltFrameCodec::new();
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(frame) = codec.decode(&mut buf)? {
            return Ok(frame);
        }
        let n = io.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(ProxyError::Bolt(BoltError::ConnectionClosed));
        }
    }
}

// ============================================================================
// Backend connector
// ============================================================================

/// Dials backend hosts, plain or TLS per the backend URI scheme.
#[derive(Clone)]
pub enum BackendConnector {
    /// Plain TCP
    Plain,
    /// TLS with the given client configuration
    Tls(TlsConnector),
}

impl BackendConnector {
    /// Build a connector for the configured TLS mode.
    pub fn for_mode(mode: BackendTlsMode) -> ProxyResult<Self> {
        match mode {
            BackendTlsMode::Plain => Ok(Self::Plain),
            BackendTlsMode::Verified => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                let config = ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                Ok(Self::Tls(TlsConnector::from(Arc::new(config))))
            }
            BackendTlsMode::Insecure => {
                let config = ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
                    .with_no_client_auth();
                Ok(Self::Tls(TlsConnector::from(Arc::new(config))))
            }
        }
    }

    /// Connect to `addr` (`host:port`), returning a boxed stream.
    ///
    /// `host` is the bare hostname used for SNI when TLS is on.
    pub async fn connect(&self, host: &str, addr: &str) -> ProxyResult<BoxedIo> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true).ok();

        match self {
            Self::Plain => Ok(Box::new(tcp)),
            Self::Tls(connector) => {
                let name = ServerName::try_from(host.to_string()).map_err(|_| {
                    ProxyError::configuration(format!("invalid TLS server name: {host}"))
                })?;
                let stream = connector.connect(name, tcp).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Certificate verifier that accepts anything, for `+ssc` (self-signed)
/// backend schemes only.
mod danger {
    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

// ============================================================================
// Rewindable stream
// ============================================================================

/// Stream that replays already-consumed bytes before reading the inner
/// stream.
///
/// The dispatcher has to read an HTTP request to tell a health check from
/// a WebSocket upgrade; the upgrade handshake then needs those bytes back.
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    /// Wrap `inner`, replaying `prefix` first.
    pub fn new(prefix: impl Into<Bytes>, inner: S) -> Self {
        Self { prefix: prefix.into(), inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix = this.prefix.slice(n..);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Client halves
// ============================================================================

/// Reading half of a client connection.
pub enum ClientReader {
    /// Direct Bolt over TCP/TLS
    Direct(FramedRead<ReadHalf<BoxedIo>, BoltFrameCodec>),
    /// Bolt over WebSocket binary frames
    Ws {
        /// Incoming ws frames
        stream: SplitStream<WebSocketStream<BoxedIo>>,
        /// Bolt messages recovered from earlier ws frames, FIFO
        pending: VecDeque<BoltFrame>,
    },
}

impl ClientReader {
    /// Read the next logical Bolt message.
    ///
    /// `Ok(None)` means the client hung up cleanly.
    pub async fn next_frame(&mut self) -> ProxyResult<Option<BoltFrame>> {
        match self {
            Self::Direct(framed) => match framed.next().await {
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(e)) if e.is_hangup() => Ok(None),
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            },
            Self::Ws { stream, pending } => loop {
                if let Some(frame) = pending.pop_front() {
                    return Ok(Some(frame));
                }
                match stream.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        // One ws frame may pack several Bolt messages
                        pending.extend(split_frames(&data)?);
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue, // ping/pong/text noise
                    Some(Err(e)) => return Err(ws_error(e)),
                }
            },
        }
    }
}

/// Writing half of a client connection.
///
/// Shared between the session task (synthesized replies) and the relay
/// task (server traffic); callers wrap it in a `tokio::sync::Mutex`.
pub enum ClientWriter {
    /// Direct Bolt over TCP/TLS
    Direct(WriteHalf<BoxedIo>),
    /// Bolt over WebSocket binary frames
    Ws(SplitSink<WebSocketStream<BoxedIo>, Message>),
}

impl ClientWriter {
    /// Write one frame completely.
    ///
    /// Short writes are retried by `write_all`; partial writes would
    /// corrupt the framing.
    pub async fn write_frame(&mut self, frame: &BoltFrame) -> ProxyResult<()> {
        match self {
            Self::Direct(writer) => {
                writer.write_all(&frame.data).await?;
                writer.flush().await?;
                Ok(())
            }
            Self::Ws(sink) => sink
                .send(Message::Binary(frame.data.to_vec()))
                .await
                .map_err(ws_error),
        }
    }

    /// Close the transport.
    pub async fn shutdown(&mut self) {
        match self {
            Self::Direct(writer) => {
                let _ = writer.shutdown().await;
            }
            Self::Ws(sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

/// Split a direct stream into client halves.
pub fn direct_pair(io: BoxedIo) -> (ClientReader, ClientWriter) {
    let (read, write) = tokio::io::split(io);
    (
        ClientReader::Direct(FramedRead::new(read, BoltFrameCodec::new())),
        ClientWriter::Direct(write),
    )
}

/// Split an upgraded WebSocket stream into client halves.
pub fn ws_pair(stream: WebSocketStream<BoxedIo>) -> (ClientReader, ClientWriter) {
    let (sink, stream) = stream.split();
    (
        ClientReader::Ws { stream, pending: VecDeque::new() },
        ClientWriter::Ws(sink),
    )
}

/// Map a tungstenite error into the proxy taxonomy.
fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> ProxyError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ProxyError::Bolt(BoltError::ConnectionClosed)
        }
        WsError::Io(e) => ProxyError::Io(e),
        other => ProxyError::protocol(format!("websocket error: {other}")),
    }
}
