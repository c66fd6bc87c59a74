//! 백엔드 묶음
//!
//! 세션들이 공유하는 클러스터측 기반: 모니터, 라우팅 캐시, 커넥터와
//! 세션 전역 설정을 한데 묶습니다. 세션은 이 묶음 하나만 들고 다닙니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bolt::{BoltFrame, BoltVersion};

use super::auth;
use super::config::ProxyConfig;
use super::error::ProxyResult;
use super::monitor::ClusterMonitor;
use super::pool::PrincipalPool;
use super::provider::{BoltRoutingProvider, RoutingProvider};
use super::routing::{ClusterInfo, RoutingCache};
use super::transport::BackendConnector;

/// 클라이언트에 알리는 프록시 식별자
pub const SERVER_AGENT: &str = concat!("Zeta4G-Proxy/", env!("CARGO_PKG_VERSION"));

/// 백엔드 묶음
pub struct Backend {
    monitor: ClusterMonitor,
    router: RoutingCache,
    connector: BackendConnector,
    idle_timeout: Duration,
    connection_seq: AtomicU64,
}

impl Backend {
    /// 설정으로부터 백엔드 기동
    ///
    /// 모니터의 최초 세션 수립에 실패하면 시작 에러로 전파됩니다.
    pub async fn start(config: &ProxyConfig) -> ProxyResult<Self> {
        let backend_uri = config.backend()?;
        let connector = BackendConnector::for_mode(backend_uri.tls)?;

        let provider: Arc<dyn RoutingProvider> = Arc::new(
            BoltRoutingProvider::connect(backend_uri, &config.user, &config.password).await?,
        );
        let monitor = ClusterMonitor::start(provider.clone()).await?;
        let router = RoutingCache::new(provider);

        Ok(Self {
            monitor,
            router,
            connector,
            idle_timeout: config.idle_timeout(),
            connection_seq: AtomicU64::new(1),
        })
    }

    /// 구성 요소를 직접 조립 (테스트용)
    pub fn assemble(
        monitor: ClusterMonitor,
        router: RoutingCache,
        connector: BackendConnector,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            monitor,
            router,
            connector,
            idle_timeout,
            connection_seq: AtomicU64::new(1),
        }
    }

    /// 백엔드가 협상한 프로토콜 버전
    pub fn version(&self) -> BoltVersion {
        self.monitor.version()
    }

    /// 현재 클러스터 정보 (신선도 검사 포함)
    pub fn cluster_info(&self) -> ProxyResult<Arc<ClusterInfo>> {
        self.monitor.fresh_cluster_info()
    }

    /// 라우팅 캐시
    pub fn router(&self) -> &RoutingCache {
        &self.router
    }

    /// 세션/릴레이 유휴 타임아웃
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// 세션 연결 ID 발급
    pub fn next_connection_id(&self) -> String {
        format!("bolt-{}", self.connection_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// 가로챈 HELLO로 클러스터 전체 인증
    pub async fn authenticate(&self, hello: &BoltFrame) -> ProxyResult<PrincipalPool> {
        let info = self.cluster_info()?;
        auth::authenticate(hello, self.version(), &info, &self.connector).await
    }
}
