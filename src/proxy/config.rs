//! Proxy Configuration
//!
//! CLI 플래그와 환경 변수로부터 프록시 설정을 구성합니다.
//! 모든 플래그는 대응하는 `ZETA4G_PROXY_*` 환경 변수를 기본값으로 사용합니다.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::error::{ProxyError, ProxyResult};

/// 기본 백엔드 포트
pub const DEFAULT_BOLT_PORT: u16 = 7687;

// ============================================================================
// ProxyConfig - 프록시 설정
// ============================================================================

/// 프록시 설정
///
/// | 옵션 | 환경 변수 | 기본값 |
/// |------|-----------|--------|
/// | `--bind` | `ZETA4G_PROXY_BIND` | `localhost:8888` |
/// | `--uri` | `ZETA4G_PROXY_URI` | `bolt://localhost:7687` |
/// | `--user` | `ZETA4G_PROXY_USER` | `zeta4g` |
/// | `--password` | `ZETA4G_PROXY_PASSWORD` | (없음) |
/// | `--cert`/`--key` | `ZETA4G_PROXY_CERT`/`_KEY` | (없으면 평문 리스너) |
/// | `--debug` | `ZETA4G_PROXY_DEBUG` | false |
#[derive(Parser, Debug, Clone)]
#[command(
    name = "zeta4g-proxy",
    version,
    about = "Transparent cluster-aware Bolt proxy for Zeta4G"
)]
pub struct ProxyConfig {
    /// 리스너 바인드 주소 (host:port)
    #[arg(long, env = "ZETA4G_PROXY_BIND", default_value = "localhost:8888")]
    pub bind: String,

    /// 백엔드 Bolt URI
    #[arg(long, env = "ZETA4G_PROXY_URI", default_value = "bolt://localhost:7687")]
    pub uri: String,

    /// 모니터 세션용 사용자명
    #[arg(long, env = "ZETA4G_PROXY_USER", default_value = "zeta4g")]
    pub user: String,

    /// 모니터 세션용 비밀번호
    #[arg(
        long,
        env = "ZETA4G_PROXY_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub password: String,

    /// 리스너 TLS x509 인증서 경로
    #[arg(long, env = "ZETA4G_PROXY_CERT")]
    pub cert: Option<PathBuf>,

    /// 리스너 TLS 개인키 경로
    #[arg(long, env = "ZETA4G_PROXY_KEY")]
    pub key: Option<PathBuf>,

    /// 디버그 로깅 활성화
    #[arg(long, env = "ZETA4G_PROXY_DEBUG")]
    pub debug: bool,

    /// 세션/릴레이 유휴 타임아웃 (초, 최소 30분)
    #[arg(long, env = "ZETA4G_PROXY_IDLE_TIMEOUT_SECS", default_value_t = 1800)]
    pub idle_timeout_secs: u64,
}

impl ProxyConfig {
    /// 유휴 타임아웃
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1800))
    }

    /// 리스너 TLS 사용 여부 (인증서와 키가 모두 주어진 경우)
    pub fn listener_tls(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    /// 백엔드 URI 파싱
    pub fn backend(&self) -> ProxyResult<BackendUri> {
        BackendUri::parse(&self.uri)
    }
}

// ============================================================================
// BackendUri - 백엔드 주소
// ============================================================================

/// 백엔드 TLS 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTlsMode {
    /// 평문 TCP
    Plain,
    /// TLS, 시스템 루트로 검증 (`+s`)
    Verified,
    /// TLS, 인증서 검증 생략 (`+ssc`, 자체 서명용)
    Insecure,
}

/// 파싱된 백엔드 URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUri {
    /// 호스트명
    pub host: String,
    /// 포트
    pub port: u16,
    /// TLS 모드
    pub tls: BackendTlsMode,
}

impl BackendUri {
    /// `scheme://host[:port]` 형식 파싱
    ///
    /// 허용 스킴: `bolt`, `neo4j`, `zeta4g` 및 각각의 `+s`/`+ssc` 변형.
    pub fn parse(uri: &str) -> ProxyResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ProxyError::configuration(format!("invalid backend URI: {uri}")))?;

        let tls = match scheme {
            "bolt" | "neo4j" | "zeta4g" => BackendTlsMode::Plain,
            "bolt+s" | "neo4j+s" | "zeta4g+s" => BackendTlsMode::Verified,
            "bolt+ssc" | "neo4j+ssc" | "zeta4g+ssc" => BackendTlsMode::Insecure,
            other => {
                return Err(ProxyError::configuration(format!(
                    "unsupported backend URI scheme: {other}"
                )))
            }
        };

        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(ProxyError::configuration("backend URI missing host"));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    ProxyError::configuration(format!("invalid backend port: {port}"))
                })?;
                (host.to_string(), port)
            }
            None => (rest.to_string(), DEFAULT_BOLT_PORT),
        };

        Ok(Self { host, port, tls })
    }

    /// `host:port` 문자열
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_uri_plain() {
        let uri = BackendUri::parse("bolt://localhost:7687").unwrap();
        assert_eq!(uri.host, "localhost");
        assert_eq!(uri.port, 7687);
        assert_eq!(uri.tls, BackendTlsMode::Plain);
        assert_eq!(uri.address(), "localhost:7687");
    }

    #[test]
    fn test_backend_uri_default_port() {
        let uri = BackendUri::parse("neo4j://db.internal").unwrap();
        assert_eq!(uri.port, DEFAULT_BOLT_PORT);
    }

    #[test]
    fn test_backend_uri_tls_schemes() {
        assert_eq!(
            BackendUri::parse("bolt+s://h:1").unwrap().tls,
            BackendTlsMode::Verified
        );
        assert_eq!(
            BackendUri::parse("neo4j+s://h:1").unwrap().tls,
            BackendTlsMode::Verified
        );
        assert_eq!(
            BackendUri::parse("bolt+ssc://h:1").unwrap().tls,
            BackendTlsMode::Insecure
        );
        assert_eq!(
            BackendUri::parse("zeta4g+ssc://h:1").unwrap().tls,
            BackendTlsMode::Insecure
        );
    }

    #[test]
    fn test_backend_uri_invalid() {
        assert!(BackendUri::parse("http://h:1").is_err());
        assert!(BackendUri::parse("localhost:7687").is_err());
        assert!(BackendUri::parse("bolt://").is_err());
        assert!(BackendUri::parse("bolt://h:notaport").is_err());
    }

    #[test]
    fn test_config_parse_defaults() {
        let config = ProxyConfig::parse_from(["zeta4g-proxy"]);
        assert_eq!(config.bind, "localhost:8888");
        assert_eq!(config.uri, "bolt://localhost:7687");
        assert_eq!(config.user, "zeta4g");
        assert!(!config.debug);
        assert!(config.listener_tls().is_none());
    }

    #[test]
    fn test_config_parse_flags() {
        let config = ProxyConfig::parse_from([
            "zeta4g-proxy",
            "--bind",
            "0.0.0.0:9999",
            "--uri",
            "neo4j+s://cluster:7687",
            "--user",
            "svc",
            "--password",
            "secret",
            "--debug",
        ]);
        assert_eq!(config.bind, "0.0.0.0:9999");
        assert!(config.debug);
        let backend = config.backend().unwrap();
        assert_eq!(backend.tls, BackendTlsMode::Verified);
    }

    #[test]
    fn test_idle_timeout_floor() {
        let config = ProxyConfig::parse_from(["zeta4g-proxy", "--idle-timeout-secs", "60"]);
        // 30분 아래로는 내려가지 않음
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
    }
}
