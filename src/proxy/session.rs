//! 클라이언트 세션 상태 기계
//!
//! 핸드셰이크를 마친 클라이언트 연결 하나를 끝까지 책임집니다.
//! HELLO를 가로채 클러스터 전체에 인증을 팬아웃하고, 이후 메시지를
//! 관찰해 트랜잭션 경계와 모드를 판별하며, 트랜잭션마다 적절한 역할의
//! 백엔드 연결로 갈아탑니다. 상태는 단순한 플래그 두 개로 충분합니다:
//! manual_tx (명시적 BEGIN 안), starting_tx (다음 메시지가 새 트랜잭션의
//! 시작).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bolt::message::{empty_success, failure, hello_success};
use crate::bolt::packstream::message_map;
use crate::bolt::{BoltFrame, BoltTag};

use super::backend::{Backend, SERVER_AGENT};
use super::error::{ProxyError, ProxyResult};
use super::pool::PrincipalPool;
use super::relay::{spawn_relay, RelayHandle};
use super::routing::AccessMode;
use super::transport::{ClientReader, ClientWriter};

/// HELLO 대기 한도
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// 릴레이 halt 후 ack 대기 한도
const HALT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// 라우팅 실패 시 클라이언트에 보내는 FAILURE 코드
const DB_NOT_FOUND: &str = "Neo.ClientError.Database.DatabaseNotFound";

/// 클라이언트 세션
pub struct Session {
    backend: Arc<Backend>,
    reader: ClientReader,
    writer: Arc<Mutex<ClientWriter>>,
    peer: String,
    connection_id: String,
}

impl Session {
    /// 핸드셰이크를 마친 클라이언트로 세션 생성
    pub fn new(
        backend: Arc<Backend>,
        reader: ClientReader,
        writer: ClientWriter,
        peer: impl Into<String>,
    ) -> Self {
        let connection_id = backend.next_connection_id();
        Self {
            backend,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            peer: peer.into(),
            connection_id,
        }
    }

    /// 세션 실행 (종료까지)
    ///
    /// 프로토콜 위반이나 내부 오류는 로그만 남기고 조용히 연결을 닫습니다.
    /// 이미 보낸 것 이상을 클라이언트에 되돌리지 않습니다.
    pub async fn run(mut self) {
        let peer = self.peer.clone();
        debug!(peer = %peer, id = %self.connection_id, "session started");

        match self.drive().await {
            Ok(()) => debug!(peer = %peer, "session ended"),
            Err(e) if e.is_hangup() => debug!(peer = %peer, "client hung up"),
            Err(e) => warn!(peer = %peer, "session failed: {e}"),
        }

        let mut writer = self.writer.lock().await;
        writer.shutdown().await;
        info!(peer = %peer, id = %self.connection_id, "goodbye to client");
    }

    /// 인증 단계와 본 루프
    async fn drive(&mut self) -> ProxyResult<()> {
        // ---------- HELLO 가로채기
        let hello = match timeout(HELLO_TIMEOUT, self.reader.next_frame()).await {
            Err(_) => {
                return Err(ProxyError::timeout("waiting for client HELLO"));
            }
            Ok(frame) => match frame? {
                Some(frame) => frame,
                None => return Ok(()), // 인사도 없이 떠남
            },
        };
        log_frame("C->P", &hello);

        match hello.tag {
            BoltTag::Hello => {}
            BoltTag::Goodbye => {
                // 트랜잭션 없이 정중한 조기 퇴장
                debug!(peer = %self.peer, "goodbye without a tx");
                return Ok(());
            }
            other => {
                return Err(ProxyError::protocol(format!(
                    "expected HELLO, got {other}"
                )));
            }
        }

        // ---------- 클러스터 전체 인증
        let pool = match self.backend.authenticate(&hello).await {
            Ok(pool) => pool,
            Err(ProxyError::AuthRejected { message, frame }) => {
                // 백엔드의 FAILURE를 비트 그대로 중계
                info!(peer = %self.peer, "authentication rejected: {message}");
                self.write_client(&frame).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(peer = %self.peer, "authentication error: {e}");
                let frame = failure(
                    "Neo.ClientError.Security.AuthenticationFailed",
                    "proxy could not authenticate against the cluster",
                );
                let _ = self.write_client(&frame).await;
                return Ok(());
            }
        };

        info!(
            peer = %self.peer,
            principal = pool.principal(),
            version = %self.backend.version(),
            hosts = pool.len(),
            "authenticated client"
        );

        let success = hello_success(SERVER_AGENT, &self.connection_id);
        log_frame("P->C", &success);
        self.write_client(&success).await?;

        // ---------- 이벤트 루프
        self.event_loop(pool).await
    }

    /// 인증 이후의 메시지 루프
    async fn event_loop(&mut self, mut pool: PrincipalPool) -> ProxyResult<()> {
        let idle = self.backend.idle_timeout();

        let mut manual_tx = false;
        let mut starting_tx = false;
        let mut current: Option<String> = None;
        let mut relay: Option<RelayHandle> = None;

        let outcome = loop {
            // ---------- 클라이언트 읽기 (유휴 한도 포함)
            let frame = match timeout(idle, self.reader.next_frame()).await {
                Err(_) => {
                    warn!(peer = %self.peer, "client idle timeout");
                    break Ok(());
                }
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    debug!(peer = %self.peer, "client hangup");
                    break Ok(());
                }
                Ok(Err(e)) => break Err(e),
            };
            log_frame("C->P", &frame);

            // ---------- 트랜잭션 상태 관찰
            match frame.tag {
                BoltTag::Begin => {
                    starting_tx = true;
                    manual_tx = true;
                }
                BoltTag::Run if !manual_tx => starting_tx = true,
                BoltTag::Commit | BoltTag::Rollback => {
                    manual_tx = false;
                    starting_tx = false;
                }
                _ => {}
            }

            // ---------- 새 트랜잭션: 백엔드 선택과 릴레이 교체
            if starting_tx {
                match self
                    .begin_transaction(&frame, &mut pool, &mut relay, &mut current)
                    .await
                {
                    Ok(()) => starting_tx = false,
                    Err(e) => break Err(e),
                }
            }

            // ---------- 전달 또는 합성 응답
            if let Some(host) = &current {
                let link = match pool.get_mut(host) {
                    Some(link) => link,
                    None => {
                        break Err(ProxyError::pool(format!(
                            "no established connection for host {host}"
                        )))
                    }
                };
                if let Err(e) = link.write_frame(&frame).await {
                    warn!(peer = %self.peer, host = %host, "server write failed: {e}");
                    break Err(e);
                }
                log_frame("P->S", &frame);

                if frame.tag == BoltTag::Goodbye {
                    break Ok(());
                }
            } else {
                // 연결된 트랜잭션이 없을 때 처리 가능한 단순 메시지들
                match frame.tag {
                    BoltTag::Reset => {
                        // 백엔드를 건드리지 않는 빈 SUCCESS
                        self.write_client(&empty_success()).await?;
                    }
                    BoltTag::Goodbye => break Ok(()),
                    _ => {}
                }
            }
        };

        // ---------- 정리: 릴레이 halt 후 풀 닫기
        if let Some(handle) = relay.take() {
            let host = handle.host().to_string();
            if handle.halt(HALT_ACK_TIMEOUT).await.is_none() {
                if let Some(link) = pool.remove(&host) {
                    link.close().await;
                }
            }
        }
        pool.close().await;
        outcome
    }

    /// In-TX-Setup: db/mode 판별, 라우팅 조회, 릴레이 교체
    async fn begin_transaction(
        &mut self,
        frame: &BoltFrame,
        pool: &mut PrincipalPool,
        relay: &mut Option<RelayHandle>,
        current: &mut Option<String>,
    ) -> ProxyResult<()> {
        let info = self.backend.cluster_info()?;

        // 시작 메시지의 메타데이터에서 db/mode 힌트 추출.
        // RUN의 첫 필드는 쿼리 문자열이라 맵 파싱이 실패하고, 그 경우
        // 기본 데이터베이스에 WRITE로 라우팅됨.
        let map = message_map(&frame.data);
        let db = map
            .as_ref()
            .and_then(|m| m.get("db").and_then(|v| v.as_str()))
            .unwrap_or(&info.default_db)
            .to_string();
        let mode = if frame.tag == BoltTag::Begin {
            AccessMode::from_hint(map.as_ref().and_then(|m| {
                m.get("mode").and_then(|v| v.as_str())
            }))
        } else {
            AccessMode::Write
        };

        // 라우팅 테이블 조회 (만료 시 갱신)
        let table = match self.backend.router().lookup(&db).await {
            Ok(table) => table,
            Err(e) => {
                warn!(peer = %self.peer, db = %db, "routing lookup failed: {e}");
                let frame = failure(DB_NOT_FOUND, &format!("no routing table for database '{db}'"));
                self.write_client(&frame).await?;
                return Err(e);
            }
        };

        let hosts = table.hosts_for(mode);
        let host = match hosts.first() {
            Some(host) => host.clone(),
            None => {
                warn!(peer = %self.peer, db = %db, mode = mode.as_str(), "empty host list");
                let frame = failure(
                    DB_NOT_FOUND,
                    &format!("no {} hosts for database '{db}'", mode.as_str()),
                );
                self.write_client(&frame).await?;
                return Err(ProxyError::routing(format!(
                    "no {} hosts for database '{db}'",
                    mode.as_str()
                )));
            }
        };

        // 같은 호스트를 계속 쓰고 릴레이도 살아 있으면 그대로 둠
        let reuse = relay
            .as_ref()
            .map(|handle| handle.host() == host && !handle.is_finished())
            .unwrap_or(false);

        if !reuse {
            if let Some(handle) = relay.take() {
                let old_host = handle.host().to_string();
                debug!(peer = %self.peer, host = %old_host, "asking current tx relay to halt");
                if handle.halt(HALT_ACK_TIMEOUT).await.is_none() {
                    // 고착된 릴레이의 연결은 폐기
                    if let Some(link) = pool.remove(&old_host) {
                        link.close().await;
                    }
                }
            }

            let link = pool.get_mut(&host).ok_or_else(|| {
                ProxyError::pool(format!("no established connection for host {host}"))
            })?;
            *relay = Some(spawn_relay(
                host.clone(),
                link.frames(),
                self.writer.clone(),
                self.backend.idle_timeout(),
            ));
        }

        debug!(
            peer = %self.peer,
            db = %db,
            mode = mode.as_str(),
            host = %host,
            "transaction routed"
        );
        *current = Some(host);
        Ok(())
    }

    /// 클라이언트로 프레임 기록
    async fn write_client(&self, frame: &BoltFrame) -> ProxyResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_frame(frame).await
    }
}

/// 메시지 로깅 (자격 증명 보호)
///
/// HELLO는 페이로드를 절대 남기지 않고 태그와 길이만 기록합니다.
fn log_frame(who: &str, frame: &BoltFrame) {
    match frame.tag {
        BoltTag::Hello => debug!("[{who}] <HELLO> {} bytes (payload redacted)", frame.len()),
        tag => debug!("[{who}] <{tag}> {} bytes", frame.len()),
    }
}

// ============================================================================
// Tests
// ============================================================================
