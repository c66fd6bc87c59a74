//! # 프록시 오케스트레이션 계층
//!
//! 와이어 계층([`crate::bolt`]) 위에서 프록시의 실제 동작을 구성합니다:
//!
//! - [`frontend`] - 리스너, 연결 스니핑, WebSocket 업그레이드, 헬스 체크
//! - [`session`] - 클라이언트별 상태 기계 (HELLO 가로채기, 트랜잭션 관찰)
//! - [`auth`] - 클러스터 전체 인증 팬아웃
//! - [`pool`] - 주체별 백엔드 연결 풀
//! - [`relay`] - 트랜잭션 단위 서버→클라이언트 릴레이
//! - [`routing`] / [`monitor`] / [`provider`] - 라우팅 테이블과 클러스터 정보
//!
//! 세션 간 공유 상태는 없습니다. 라우팅 캐시와 클러스터 정보만 모니터가
//! 쓰고 세션들이 읽는 스냅샷으로 공유됩니다.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod health;
pub mod monitor;
pub mod pool;
pub mod provider;
pub mod relay;
pub mod routing;
pub mod session;
pub mod transport;

pub use backend::Backend;
pub use config::{BackendTlsMode, BackendUri, ProxyConfig};
pub use error::{ProxyError, ProxyResult};
pub use monitor::ClusterMonitor;
pub use pool::{PrincipalPool, ServerLink};
pub use provider::{BoltRoutingProvider, RoutingProvider};
pub use relay::{RelayExit, RelayHandle};
pub use routing::{AccessMode, ClusterInfo, RoutingCache, RoutingTable};
pub use session::Session;
