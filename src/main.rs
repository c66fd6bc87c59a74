//! zeta4g-proxy 실행 파일
//!
//! 설정 파싱, 로깅 초기화, 백엔드 모니터 기동, 리스너 수락 루프.
//! 시작 단계 실패(바인드 불가, 백엔드 도달 불가, 잘못된 URI)는 비정상
//! 종료 코드로 이어집니다.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zeta4g_proxy::proxy::{frontend, Backend, ProxyConfig};

fn init_logging(debug: bool) {
    let default_filter = if debug { "zeta4g_proxy=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = ProxyConfig::parse();
    init_logging(config.debug);

    info!("starting zeta4g-proxy backend");
    let backend = match Backend::start(&config).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("connected to backend {}", config.uri);
    info!("backend speaks bolt {}", backend.version());

    info!("starting zeta4g-proxy frontend");
    if let Err(e) = frontend::serve(config, backend).await {
        error!("frontend failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
