//! 라우팅 테이블 캐시
//!
//! 데이터베이스 이름별 라우팅 스냅샷을 보관합니다. 조회 시 만료되지 않은
//! 스냅샷이 있으면 그대로 반환하고, 없거나 만료되었으면 프로바이더를 통해
//! 갱신합니다. 쓰기는 Arc 스냅샷 교체 한 번이므로 세션 태스크들은 락을
//! 오래 잡지 않습니다.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::super::error::ProxyResult;
use super::super::provider::RoutingProvider;
use super::table::RoutingTable;

/// 라우팅 테이블 캐시
pub struct RoutingCache {
    /// 라우팅 프로바이더
    provider: Arc<dyn RoutingProvider>,
    /// 데이터베이스별 스냅샷
    tables: RwLock<HashMap<String, Arc<RoutingTable>>>,
}

impl RoutingCache {
    /// 새 캐시 생성
    pub fn new(provider: Arc<dyn RoutingProvider>) -> Self {
        Self {
            provider,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// 스냅샷 조회 (만료 시 갱신)
    ///
    /// 갱신 실패는 호출자에게 그대로 전달됩니다. 사용하지 않는
    /// 데이터베이스는 조회되지 않는 한 갱신되지 않습니다.
    pub async fn lookup(&self, database: &str) -> ProxyResult<Arc<RoutingTable>> {
        if let Some(table) = self.cached(database) {
            return Ok(table);
        }

        let fresh = Arc::new(self.provider.routing_table(database).await?);
        debug!(
            db = database,
            readers = fresh.readers.len(),
            writers = fresh.writers.len(),
            ttl_secs = fresh.ttl.as_secs(),
            "routing table refreshed"
        );
        self.tables
            .write()
            .insert(database.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// 만료되지 않은 스냅샷만 반환
    pub fn cached(&self, database: &str) -> Option<Arc<RoutingTable>> {
        let tables = self.tables.read();
        tables
            .get(database)
            .filter(|table| !table.expired())
            .cloned()
    }

    /// 보관 중인 테이블 수 (만료 포함)
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// 캐시가 비어 있는지 확인
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
