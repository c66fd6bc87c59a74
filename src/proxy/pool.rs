//! 주체별 연결 풀
//!
//! 인증 팬아웃이 만든 호스트별 백엔드 연결을 한 세션이 독점 소유합니다.
//! 각 연결은 읽기 태스크가 프레임을 mpsc 채널로 밀어 넣고, 릴레이가
//! 트랜잭션 동안 수신단을 빌려 씁니다. 세션 종료 시 풀 전체가 닫힙니다.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::bolt::{BoltFrame, BoltFrameCodec};

use super::error::ProxyResult;
use super::transport::BoxedIo;

/// 연결당 수신 버퍼 프레임 수
const FRAME_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// ServerLink - 인증된 백엔드 연결
// ============================================================================

/// 인증을 마친 백엔드 연결
///
/// 쓰기 반쪽은 세션이 직접 사용하고, 읽기 반쪽은 전용 태스크가 소유하며
/// 프레임 채널로만 노출됩니다. 수신단은 Mutex로 감싸 트랜잭션 릴레이가
/// 한 번에 하나만 빌릴 수 있습니다.
pub struct ServerLink {
    host: String,
    writer: WriteHalf<BoxedIo>,
    frames: Arc<Mutex<mpsc::Receiver<BoltFrame>>>,
    reader_task: JoinHandle<()>,
}

impl ServerLink {
    /// 핸드셰이크와 HELLO를 마친 스트림으로 링크 생성
    pub fn new(host: impl Into<String>, io: BoxedIo) -> Self {
        let host = host.into();
        let (read, writer) = tokio::io::split(io);
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let task_host = host.clone();
        let reader_task = tokio::spawn(async move {
            let mut framed = FramedRead::new(read, BoltFrameCodec::new());
            loop {
                match framed.next().await {
                    Some(Ok(frame)) => {
                        if tx.send(frame).await.is_err() {
                            // 수신단이 닫힘 (링크 폐기)
                            break;
                        }
                    }
                    Some(Err(e)) if e.is_hangup() => {
                        debug!(host = %task_host, "backend hung up");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(host = %task_host, "backend read error: {e}");
                        break;
                    }
                    None => {
                        debug!(host = %task_host, "backend connection closed");
                        break;
                    }
                }
            }
            // tx 드롭으로 수신단은 None을 관찰
        });

        Self {
            host,
            writer,
            frames: Arc::new(Mutex::new(rx)),
            reader_task,
        }
    }

    /// 호스트 (host:port)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 프레임을 그대로 백엔드에 기록
    pub async fn write_frame(&mut self, frame: &BoltFrame) -> ProxyResult<()> {
        self.writer.write_all(&frame.data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 수신 채널 핸들 (릴레이가 트랜잭션 동안 잠금)
    pub fn frames(&self) -> Arc<Mutex<mpsc::Receiver<BoltFrame>>> {
        self.frames.clone()
    }

    /// 연결 종료
    ///
    /// 인사 없이 닫습니다. 세션 종료가 인증 HELLO 이후 백엔드에 아무것도
    /// 쓰지 않아야 하는 경로(HELLO 직후 GOODBYE)가 있기 때문입니다.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for ServerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLink")
            .field("host", &self.host)
            .finish()
    }
}

// ============================================================================
// PrincipalPool - 세션 소유 연결 풀
// ============================================================================

/// 한 주체(principal)의 호스트별 백엔드 연결 풀
///
/// 키는 인증 시점 클러스터 정보의 호스트 부분집합입니다.
pub struct PrincipalPool {
    principal: String,
    links: HashMap<String, ServerLink>,
}

impl PrincipalPool {
    /// 빈 풀 생성
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            links: HashMap::new(),
        }
    }

    /// 인증된 주체
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// 링크 추가
    pub fn insert(&mut self, link: ServerLink) {
        self.links.insert(link.host().to_string(), link);
    }

    /// 호스트의 링크 (가변)
    pub fn get_mut(&mut self, host: &str) -> Option<&mut ServerLink> {
        self.links.get_mut(host)
    }

    /// 호스트의 링크 제거
    pub fn remove(&mut self, host: &str) -> Option<ServerLink> {
        self.links.remove(host)
    }

    /// 보유 호스트 여부
    pub fn contains(&self, host: &str) -> bool {
        self.links.contains_key(host)
    }

    /// 풀 크기
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// 풀이 비어 있는지 확인
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// 보유 호스트 목록
    pub fn hosts(&self) -> Vec<&str> {
        self.links.keys().map(String::as_str).collect()
    }

    /// 모든 링크 종료
    pub async fn close(self) {
        debug!(principal = %self.principal, links = self.links.len(), "closing pool");
        for (_, link) in self.links {
            link.close().await;
        }
    }
}

impl std::fmt::Debug for PrincipalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalPool")
            .field("principal", &self.principal)
            .field("links", &self.links.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{duplex, AsyncReadExt};

    use crate::bolt::message::empty_success;
    use crate::bolt::BoltTag;

    fn link_pair(host: &str) -> (ServerLink, tokio::io::DuplexStream) {
        let (near, far) = duplex(4096);
        (ServerLink::new(host, Box::new(near)), far)
    }

    #[tokio::test]
    async fn test_link_write_passes_bytes_verbatim() {
        let (mut link, mut far) = link_pair("a:7687");
        let frame = empty_success();
        link.write_frame(&frame).await.unwrap();

        let mut buf = vec![0u8; frame.len()];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &frame.data[..]);
    }

    #[tokio::test]
    async fn test_link_reader_feeds_channel() {
        let (link, mut far) = link_pair("a:7687");
        let frame = empty_success();
        far.write_all(&frame.data).await.unwrap();

        let frames = link.frames();
        let mut rx = frames.lock().await;
        let got = rx.recv().await.unwrap();
        assert_eq!(got.tag, BoltTag::Success);
        assert_eq!(got.data, frame.data);
    }

    #[tokio::test]
    async fn test_link_reader_channel_closes_on_eof() {
        let (link, far) = link_pair("a:7687");
        drop(far);

        let frames = link.frames();
        let mut rx = frames.lock().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_link_close_writes_nothing() {
        let (link, mut far) = link_pair("a:7687");
        link.close().await;

        // 종료는 추가 바이트 없이 EOF만 보여야 함
        let mut buf = [0u8; 1];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pool_bookkeeping() {
        let mut pool = PrincipalPool::new("alice");
        assert!(pool.is_empty());

        let (link_a, _far_a) = link_pair("a:7687");
        let (link_b, _far_b) = link_pair("b:7687");
        pool.insert(link_a);
        pool.insert(link_b);

        assert_eq!(pool.len(), 2);
        assert!(pool.contains("a:7687"));
        assert!(!pool.contains("c:7687"));
        assert!(pool.get_mut("b:7687").is_some());

        let removed = pool.remove("a:7687").unwrap();
        assert_eq!(removed.host(), "a:7687");
        assert_eq!(pool.len(), 1);

        pool.close().await;
    }
}
