//! 서버 읽기 릴레이
//!
//! 트랜잭션마다 하나씩 떠서 백엔드 프레임을 클라이언트로 흘려보내는
//! 태스크입니다. 정지는 halt/ack 단일 슬롯 신호쌍으로 관찰 가능하게
//! 처리합니다: 상태 기계가 halt를 보내고 ack를 기다린 뒤에야 다음
//! 트랜잭션의 릴레이를 시작합니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bolt::{BoltFrame, BoltTag};

use super::transport::ClientWriter;

/// 릴레이 종료 사유 (ack 페이로드)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// 상태 기계의 halt 요청
    Halted,
    /// 백엔드 채널 닫힘 (EOF)
    ServerHangup,
    /// 백엔드가 GOODBYE를 보냄
    ServerGoodbye,
    /// 유휴 타임아웃
    Timeout,
    /// 클라이언트 쓰기 실패
    ClientError,
}

impl RelayExit {
    /// 로그용 사유 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Halted => "halted",
            Self::ServerHangup => "server-hangup",
            Self::ServerGoodbye => "server-goodbye",
            Self::Timeout => "timeout",
            Self::ClientError => "client-error",
        }
    }
}

/// 실행 중인 릴레이의 핸들
pub struct RelayHandle {
    host: String,
    halt: Option<oneshot::Sender<()>>,
    ack: oneshot::Receiver<RelayExit>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// 릴레이 대상 호스트
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 릴레이가 스스로 종료했는지 확인
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// halt를 보내고 ack를 기다림
    ///
    /// `wait` 안에 ack가 오지 않으면 릴레이를 고착 상태로 보고 태스크를
    /// 중단한 뒤 `None`을 돌려줍니다. 호출자는 해당 호스트의 연결을
    /// 폐기해야 합니다.
    pub async fn halt(mut self, wait: Duration) -> Option<RelayExit> {
        if let Some(tx) = self.halt.take() {
            let _ = tx.send(());
        }
        match timeout(wait, &mut self.ack).await {
            Ok(Ok(exit)) => Some(exit),
            // ack 없이 종료: 이미 끝난 태스크로 간주
            Ok(Err(_)) => Some(RelayExit::ServerHangup),
            Err(_) => {
                warn!(host = %self.host, "timeout waiting for relay ack; abandoning it");
                self.task.abort();
                None
            }
        }
    }
}

/// 릴레이 태스크 기동
///
/// `frames`는 대상 백엔드 연결의 수신 채널, `client`는 공유 클라이언트
/// 쓰기 반쪽입니다. 유휴 타임아웃은 프레임이 올 때마다 초기화됩니다.
pub fn spawn_relay(
    host: impl Into<String>,
    frames: Arc<Mutex<mpsc::Receiver<BoltFrame>>>,
    client: Arc<Mutex<ClientWriter>>,
    idle: Duration,
) -> RelayHandle {
    let host = host.into();
    let (halt_tx, halt_rx) = oneshot::channel();
    let (ack_tx, ack_rx) = oneshot::channel();

    let task_host = host.clone();
    let task = tokio::spawn(async move {
        let exit = relay_loop(frames, client, idle, halt_rx).await;
        debug!(host = %task_host, reason = exit.as_str(), "relay finished");
        // 단일 슬롯 ack; 수신자가 이미 사라졌으면 무시
        let _ = ack_tx.send(exit);
    });

    RelayHandle { host, halt: Some(halt_tx), ack: ack_rx, task }
}

/// 릴레이 본체
async fn relay_loop(
    frames: Arc<Mutex<mpsc::Receiver<BoltFrame>>>,
    client: Arc<Mutex<ClientWriter>>,
    idle: Duration,
    mut halt: oneshot::Receiver<()>,
) -> RelayExit {
    let mut rx = frames.lock().await;

    loop {
        tokio::select! {
            _ = &mut halt => return RelayExit::Halted,

            received = timeout(idle, rx.recv()) => {
                let frame = match received {
                    Err(_) => {
                        warn!("timeout reading server");
                        return RelayExit::Timeout;
                    }
                    Ok(None) => return RelayExit::ServerHangup,
                    Ok(Some(frame)) => frame,
                };

                {
                    let mut writer = client.lock().await;
                    if let Err(e) = writer.write_frame(&frame).await {
                        if !e.is_hangup() {
                            warn!("client write failed mid-relay: {e}");
                        }
                        return RelayExit::ClientError;
                    }
                }

                // 서버측 GOODBYE는 릴레이도 함께 끝냄
                if frame.tag == BoltTag::Goodbye {
                    return RelayExit::ServerGoodbye;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use crate::bolt::message::{empty_success, goodbye};
    use crate::proxy::pool::ServerLink;
    use crate::proxy::transport::direct_pair;

    /// 릴레이 한 벌: (링크, 백엔드 far 반쪽, 클라이언트 far 반쪽, 핸들)
    fn relay_fixture(
        idle: Duration,
    ) -> (
        ServerLink,
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
        RelayHandle,
    ) {
        let (server_near, server_far) = duplex(4096);
        let link = ServerLink::new("a:7687", Box::new(server_near));

        let (client_near, client_far) = duplex(4096);
        let (_reader, writer) = direct_pair(Box::new(client_near));
        let writer = Arc::new(Mutex::new(writer));

        let handle = spawn_relay("a:7687", link.frames(), writer, idle);
        (link, server_far, client_far, handle)
    }

    #[tokio::test]
    async fn test_relay_forwards_frames_verbatim() {
        let (_link, mut server, mut client, handle) = relay_fixture(Duration::from_secs(60));

        let frame = empty_success();
        server.write_all(&frame.data).await.unwrap();

        let mut buf = vec![0u8; frame.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &frame.data[..]);
        assert!(!handle.is_finished());

        let exit = handle.halt(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(RelayExit::Halted));
    }

    #[tokio::test]
    async fn test_relay_acks_halt() {
        let (_link, _server, _client, handle) = relay_fixture(Duration::from_secs(60));
        let exit = handle.halt(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(RelayExit::Halted));
    }

    #[tokio::test]
    async fn test_relay_exits_on_server_goodbye() {
        let (_link, mut server, mut client, handle) = relay_fixture(Duration::from_secs(60));

        server.write_all(&goodbye().data).await.unwrap();

        // GOODBYE는 먼저 클라이언트로 중계된 뒤 릴레이를 끝냄
        let mut buf = vec![0u8; goodbye().len()];
        client.read_exact(&mut buf).await.unwrap();

        let exit = handle.halt(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(RelayExit::ServerGoodbye));
    }

    #[tokio::test]
    async fn test_relay_exits_on_server_hangup() {
        let (_link, server, _client, handle) = relay_fixture(Duration::from_secs(60));
        drop(server);

        let exit = handle.halt(Duration::from_secs(1)).await;
        assert!(matches!(exit, Some(RelayExit::ServerHangup)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_idle_timeout() {
        let (_link, _server, _client, handle) = relay_fixture(Duration::from_secs(5));

        // 유휴 한도를 넘길 때까지 시간 진행
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(handle.is_finished());

        let exit = handle.halt(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(RelayExit::Timeout));
    }
}
