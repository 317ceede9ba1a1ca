//! Helpdesk HTTP 服务
//!
//! 入口：加载并校验配置、初始化日志、启动后台会话清理与 HTTP 服务；
//! 收到 Ctrl+C / SIGTERM 后优雅关闭，并在退出前清理一次过期会话。
//!
//! 启动: cargo run --bin helpdesk [config.toml]
//!
//! 环境变量:
//! - OPENAI_API_KEY: LLM API Key（未设置时进入离线模式）
//! - HELPDESK__SECTION__KEY: 覆盖配置项，如 HELPDESK__LLM__OFFLINE_MODE=true
//! - RUST_LOG: 覆盖日志级别

#[cfg(feature = "web")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use helpdesk::api::{create_router, ApiState};
    use helpdesk::config::load_config;
    use helpdesk::core::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
    use helpdesk::memory::spawn_sweeper;
    use helpdesk::{observability, ChatService};

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.logging).context("Failed to open log file")?;
    cfg.validate().context("Invalid config")?;

    let service = Arc::new(ChatService::from_config(&cfg));
    let store = Arc::clone(service.store());

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let sweeper = spawn_sweeper(
        Arc::clone(&store),
        Duration::from_secs(cfg.conversation.sweep_interval_secs),
        shutdown.token(),
    );

    let state = Arc::new(ApiState {
        service,
        app: cfg.app.clone(),
    });
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("{} v{} listening on http://{}", cfg.app.name, cfg.app.version, addr);
    tracing::info!(
        "Model: {}, max history pairs: {}, conversation timeout: {} min",
        cfg.llm.model,
        cfg.conversation.max_history_pairs,
        cfg.conversation.timeout_minutes
    );

    let graceful = {
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.wait_for_shutdown().await }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
    {
        tracing::error!("HTTP server error: {}", e);
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    let reason = shutdown.reason();
    if let Some(reason) = &reason {
        tracing::info!("Shutting down: {}", reason);
    }
    shutdown.token().cancel();
    let _ = sweeper.await;

    ShutdownCoordinator::new(store)
        .with_timeout(cfg.server.shutdown_timeout_secs)
        .run(reason.as_ref())
        .await;

    tracing::info!("Helpdesk stopped");
    Ok(())
}

#[cfg(not(feature = "web"))]
fn main() {
    eprintln!("请使用 --features web 编译: cargo run --bin helpdesk --features web");
    std::process::exit(1);
}
