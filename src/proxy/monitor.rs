//! 클러스터 모니터
//!
//! 프로바이더를 통해 클러스터 정보를 주기적으로 읽어 단일 슬롯 채널
//! (watch)에 게재합니다. 게재는 교체 방식이라 읽지 않은 값은 버려지고,
//! 소비자는 created_at으로 신선도를 판단합니다. 갱신 주기는
//! min(30초, 마지막 TTL)이며, 갱신 실패는 이전 스냅샷을 유지한 채
//! 다음 주기에 재시도합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bolt::BoltVersion;

use super::error::{ProxyError, ProxyResult};
use super::provider::RoutingProvider;
use super::routing::ClusterInfo;

/// 기본 갱신 주기 상한
pub const MAX_REFRESH_PERIOD: Duration = Duration::from_secs(30);

/// 연속 실패 허용 횟수 (초과 시 성능 저하 경고)
pub const DEGRADED_AFTER_FAILURES: u32 = 5;

/// 클러스터 정보 신선도 한계 배수 (TTL 기준)
pub const STALE_TTL_FACTOR: u32 = 5;

/// 클러스터 모니터
pub struct ClusterMonitor {
    provider: Arc<dyn RoutingProvider>,
    info_rx: watch::Receiver<Arc<ClusterInfo>>,
    degraded: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ClusterMonitor {
    /// 모니터 시작
    ///
    /// 최초 클러스터 정보 조회는 동기적으로 수행되며, 실패하면 시작
    /// 에러로 전파됩니다 (프로세스는 비정상 종료해야 함).
    pub async fn start(provider: Arc<dyn RoutingProvider>) -> ProxyResult<Self> {
        let initial = provider.cluster_info().await?;
        info!(
            default_db = %initial.default_db,
            hosts = initial.hosts.len(),
            ttl_secs = initial.ttl.as_secs(),
            "cluster monitor started"
        );

        let (tx, info_rx) = watch::channel(Arc::new(initial));
        let degraded = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(Self::refresh_loop(
            provider.clone(),
            tx,
            degraded.clone(),
        ));

        Ok(Self { provider, info_rx, degraded, task })
    }

    /// 주기적 갱신 루프
    async fn refresh_loop(
        provider: Arc<dyn RoutingProvider>,
        tx: watch::Sender<Arc<ClusterInfo>>,
        degraded: Arc<AtomicBool>,
    ) {
        let mut failures: u32 = 0;
        loop {
            let ttl = tx.borrow().ttl;
            let period = MAX_REFRESH_PERIOD.min(ttl.max(Duration::from_secs(1)));
            tokio::time::sleep(period).await;

            match provider.cluster_info().await {
                Ok(info) => {
                    if failures > 0 {
                        info!("cluster refresh recovered after {failures} failure(s)");
                    }
                    failures = 0;
                    degraded.store(false, Ordering::Relaxed);
                    debug!(
                        hosts = info.hosts.len(),
                        ttl_secs = info.ttl.as_secs(),
                        "cluster info refreshed"
                    );
                    // 교체 게재: 읽지 않은 이전 값은 버려짐
                    let _ = tx.send_replace(Arc::new(info));
                }
                Err(e) => {
                    failures += 1;
                    warn!(attempt = failures, "cluster refresh failed: {e}");
                    if failures >= DEGRADED_AFTER_FAILURES {
                        degraded.store(true, Ordering::Relaxed);
                        warn!(
                            "cluster monitor degraded after {failures} consecutive failures; \
                             serving existing pools"
                        );
                    }
                }
            }
        }
    }

    /// 현재 클러스터 정보 스냅샷 (신선도 무관)
    pub fn cluster_info(&self) -> Arc<ClusterInfo> {
        self.info_rx.borrow().clone()
    }

    /// 신선한 클러스터 정보 스냅샷
    ///
    /// 5 x TTL을 넘긴 스냅샷은 치명적 상태로 간주하여 에러를 돌려줍니다.
    pub fn fresh_cluster_info(&self) -> ProxyResult<Arc<ClusterInfo>> {
        let info = self.cluster_info();
        if info.stale(STALE_TTL_FACTOR) {
            return Err(ProxyError::service_unavailable(format!(
                "cluster info stale beyond {STALE_TTL_FACTOR}x ttl ({:?})",
                info.ttl
            )));
        }
        Ok(info)
    }

    /// 백엔드가 협상한 프로토콜 버전
    pub fn version(&self) -> BoltVersion {
        self.provider.version()
    }

    /// 성능 저하 상태 여부
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// 모니터 정지
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ClusterMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use futures::future::BoxFuture;

    use crate::proxy::routing::RoutingTable;

    /// 호출 횟수를 세고, 지정 횟수부터 실패하는 테스트 프로바이더
    struct ScriptedProvider {
        ttl: Duration,
        calls: AtomicUsize,
        fail_from: usize,
    }

    impl RoutingProvider for ScriptedProvider {
        fn cluster_info(&self) -> BoxFuture<'_, ProxyResult<ClusterInfo>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n >= self.fail_from {
                    return Err(ProxyError::service_unavailable("scripted failure"));
                }
                Ok(ClusterInfo::new(
                    "zeta4g",
                    vec!["a:7687".to_string(), "b:7687".to_string()],
                    self.ttl,
                ))
            })
        }

        fn routing_table<'a>(
            &'a self,
            database: &'a str,
        ) -> BoxFuture<'a, ProxyResult<RoutingTable>> {
            Box::pin(async move {
                Ok(RoutingTable::new(database, vec![], vec![], vec![], self.ttl))
            })
        }

        fn version(&self) -> BoltVersion {
            BoltVersion::new(4, 2)
        }
    }

    #[tokio::test]
    async fn test_start_publishes_initial_info() {
        let provider = Arc::new(ScriptedProvider {
            ttl: Duration::from_secs(300),
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        });
        let monitor = ClusterMonitor::start(provider).await.unwrap();

        let info = monitor.cluster_info();
        assert_eq!(info.default_db, "zeta4g");
        assert_eq!(info.hosts, vec!["a:7687", "b:7687"]);
        assert_eq!(monitor.version(), BoltVersion::new(4, 2));
        assert!(!monitor.is_degraded());
    }

    #[tokio::test]
    async fn test_start_fails_when_initial_fetch_fails() {
        let provider = Arc::new(ScriptedProvider {
            ttl: Duration::from_secs(300),
            calls: AtomicUsize::new(0),
            fail_from: 0,
        });
        assert!(ClusterMonitor::start(provider).await.is_err());
    }

    #[tokio::test]
    async fn test_fresh_cluster_info_when_fresh() {
        let provider = Arc::new(ScriptedProvider {
            ttl: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        });
        let monitor = ClusterMonitor::start(provider).await.unwrap();
        // 막 시작한 모니터의 스냅샷은 신선함; 한계 판정 자체는
        // ClusterInfo::stale 테스트가 커버함
        assert!(monitor.fresh_cluster_info().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_snapshot() {
        let provider = Arc::new(ScriptedProvider {
            ttl: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        });
        let monitor = ClusterMonitor::start(provider.clone()).await.unwrap();
        let first = monitor.cluster_info();

        // 갱신 주기(=TTL 5초)를 넘겨 한 번의 틱을 보장
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let second = monitor.cluster_info();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_after_consecutive_failures() {
        // 최초 조회만 성공하고 이후 갱신은 모두 실패
        let provider = Arc::new(ScriptedProvider {
            ttl: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
            fail_from: 1,
        });
        let monitor = ClusterMonitor::start(provider).await.unwrap();
        assert!(!monitor.is_degraded());

        // 실패 5회 이상 누적될 때까지 시간 진행
        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert!(monitor.is_degraded());
        // 이전 스냅샷은 그대로 제공됨
        assert_eq!(monitor.cluster_info().hosts.len(), 2);
    }
}
