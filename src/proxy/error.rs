//! Proxy Error Types
//!
//! 프록시 오케스트레이션 계층 에러 정의

use std::io;

use thiserror::Error;

use crate::bolt::{BoltError, BoltFrame};

// ============================================================================
// ProxyError - 프록시 에러
// ============================================================================

/// 프록시 에러
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Bolt 프로토콜 에러
    #[error("Bolt error: {0}")]
    Bolt(#[from] BoltError),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 백엔드가 인증을 거부함 (원본 FAILURE 프레임 보존)
    #[error("Authentication rejected: {message}")]
    AuthRejected {
        /// 백엔드 FAILURE의 message 필드
        message: String,
        /// 클라이언트로 그대로 중계할 원본 프레임
        frame: BoltFrame,
    },

    /// 인증 처리 에러 (거부가 아닌 실패)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 라우팅 에러 (해당 데이터베이스의 호스트 없음 등)
    #[error("Routing error: {0}")]
    Routing(String),

    /// 풀 에러 (선택된 호스트의 연결 없음)
    #[error("Pool error: {0}")]
    Pool(String),

    /// 프로토콜 위반
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 타임아웃
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 서비스 불가 (클러스터 정보 없음/만료 등)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 라우팅 에러 생성
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    /// 풀 에러 생성
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 내부 에러 생성
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 피어 단절 여부
    ///
    /// 단절은 조용히 세션을 끝내고, 그 외에는 경고 로그를 남깁니다.
    pub fn is_hangup(&self) -> bool {
        match self {
            Self::Bolt(e) => e.is_hangup(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// 프록시 결과 타입
pub type ProxyResult<T> = Result<T, ProxyError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ProxyError::routing("no readers for db 'sales'");
        assert!(matches!(err, ProxyError::Routing(_)));
        assert_eq!(err.to_string(), "Routing error: no readers for db 'sales'");

        let err = ProxyError::pool("no link for host a:7687");
        assert!(matches!(err, ProxyError::Pool(_)));
    }

    #[test]
    fn test_hangup_classification() {
        let err = ProxyError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_hangup());

        let err = ProxyError::Bolt(BoltError::ConnectionClosed);
        assert!(err.is_hangup());

        let err = ProxyError::protocol("unexpected message");
        assert!(!err.is_hangup());
    }

    #[test]
    fn test_auth_rejected_keeps_frame() {
        let frame = crate::bolt::message::failure(
            "Neo.ClientError.Security.Unauthorized",
            "invalid credentials",
        );
        let err = ProxyError::AuthRejected {
            message: "invalid credentials".to_string(),
            frame: frame.clone(),
        };
        assert!(err.to_string().contains("invalid credentials"));
        match err {
            ProxyError::AuthRejected { frame: kept, .. } => assert_eq!(kept, frame),
            _ => unreachable!(),
        }
    }
}
