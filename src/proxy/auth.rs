//! 인증 팬아웃
//!
//! 가로챈 HELLO를 주 호스트에 먼저 재생해 보고, 성공하면 나머지 클러스터
//! 호스트 전부에 동시에 재생합니다. 주 호스트가 FAILURE를 돌려주면 즉시
//! 중단하여 잘못된 자격 증명을 클러스터에 뿌리지 않습니다. 호출마다 새
//! 연결을 만들며 상태를 갖지 않습니다.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bolt::message::goodbye;
use crate::bolt::packstream::message_map;
use crate::bolt::{handshake, BoltFrame, BoltTag, BoltVersion, HANDSHAKE_RESPONSE_SIZE};

use super::error::{ProxyError, ProxyResult};
use super::pool::{PrincipalPool, ServerLink};
use super::provider::failure_message;
use super::routing::ClusterInfo;
use super::transport::{read_frame, BackendConnector};

/// HELLO에서 주체 이름 추출 (로그와 풀 키용)
///
/// 자격 증명은 절대 로그에 남기지 않습니다. 파싱 실패는 이름 없음으로
/// 처리할 뿐 인증을 막지 않습니다.
pub fn extract_principal(hello: &BoltFrame) -> String {
    message_map(&hello.data)
        .and_then(|map| {
            map.get("principal")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// 클러스터 전체 인증
///
/// 반환된 풀은 최소한 주 호스트(클러스터 정보의 첫 항목)를 포함합니다.
/// 주 호스트 외 실패는 경고만 남기고 집계를 계속합니다.
pub async fn authenticate(
    hello: &BoltFrame,
    version: BoltVersion,
    info: &ClusterInfo,
    connector: &BackendConnector,
) -> ProxyResult<PrincipalPool> {
    let primary = info
        .hosts
        .first()
        .ok_or_else(|| ProxyError::service_unavailable("cluster info lists no hosts"))?;

    let principal = extract_principal(hello);
    let mut pool = PrincipalPool::new(principal.clone());

    // 1단계: 주 호스트에서 빠른 실패
    let link = auth_host(primary.clone(), hello.clone(), version, connector.clone()).await?;
    pool.insert(link);

    // 2단계: 나머지 호스트 동시 인증
    let mut join_set = JoinSet::new();
    for host in info.hosts.iter().skip(1) {
        join_set.spawn(auth_host(
            host.clone(),
            hello.clone(),
            version,
            connector.clone(),
        ));
    }
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(link)) => {
                debug!(host = link.host(), "fan-out auth succeeded");
                pool.insert(link);
            }
            Ok(Err(e)) => warn!("fan-out auth failed: {e}"),
            Err(e) => warn!("fan-out auth task failed: {e}"),
        }
    }

    info!(
        principal = %principal,
        hosts = pool.len(),
        of = info.hosts.len(),
        "authenticated principal against cluster"
    );
    Ok(pool)
}

/// 한 호스트에 대한 핸드셰이크 + HELLO 재생
async fn auth_host(
    host: String,
    hello: BoltFrame,
    version: BoltVersion,
    connector: BackendConnector,
) -> ProxyResult<ServerLink> {
    let bare_host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(&host);
    let mut io = connector.connect(bare_host, &host).await?;

    // 이미 협상된 버전 하나만 제안
    io.write_all(&handshake::backend_handshake(version)).await?;
    io.flush().await?;

    let mut reply = [0u8; HANDSHAKE_RESPONSE_SIZE];
    io.read_exact(&mut reply).await?;
    if BoltVersion::from_wire(reply) != Some(version) {
        return Err(ProxyError::protocol(format!(
            "host {host} refused version {version}"
        )));
    }

    // 클라이언트의 HELLO 바이트를 그대로 재생
    io.write_all(&hello.data).await?;
    io.flush().await?;

    let response = read_frame(&mut io).await?;
    match response.tag {
        BoltTag::Success => Ok(ServerLink::new(host, io)),
        BoltTag::Failure => {
            let message = failure_message(&response);
            // 원본 FAILURE 프레임을 보존해 클라이언트로 그대로 중계
            Err(ProxyError::AuthRejected { message, frame: response })
        }
        other => {
            // 실패를 알았으니 정중히 작별 인사 시도
            let _ = io.write_all(&goodbye().data).await;
            Err(ProxyError::protocol(format!(
                "unexpected auth response from {host}: {other}"
            )))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
