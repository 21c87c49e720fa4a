mod api;
mod notify;
mod shutdown;

use anyhow::Result;
use apm_alert::{AlertService, FilePolicySource, RateLimit};
use apm_collector::{
    Collector, Forwarder, HttpTransport, InProcessTransport, MemoryStorage, Transport,
};
use apm_config::{ApmConfig, ConfigLoader};
use apm_core::{ConsistentHashRouter, PoolConfig, SharedClock, SystemClock, TickerPool};
use apm_logging::init_logging;
use apm_types::TimeBounds;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use api::{create_router, AppState};
use shutdown::SignalHandler;

/// 运行角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// 二级评估与告警
    Alert,
    /// 一级聚合与转发
    Collector,
    /// 两级同进程
    Standalone,
}

impl Role {
    fn runs_alert(self) -> bool {
        matches!(self, Role::Alert | Role::Standalone)
    }

    fn runs_collector(self) -> bool {
        matches!(self, Role::Collector | Role::Standalone)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "APM windowed aggregation and alerting engine")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/apm.toml")]
    config: String,

    #[arg(short, long, value_enum, default_value_t = Role::Standalone)]
    role: Role,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn pool_config(config: &ApmConfig) -> PoolConfig {
    PoolConfig {
        queue_capacity: config.worker.queue_capacity,
        max_workers: config.worker.max_workers,
        idle_ticks: config.worker.idle_ticks,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new(&args.config).load()?;

    if args.print_config {
        print!("{}", ConfigLoader::to_toml(&config)?);
        return Ok(());
    }

    init_logging(&config.logging.level, config.logging.json)?;
    info!(
        name = %config.system.name,
        instance = %config.system.instance,
        role = ?args.role,
        "Starting APM server with config: {}",
        args.config
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut tickers: Vec<Arc<TickerPool>> = Vec::new();
    let mut state = AppState::default();

    // 告警端
    if args.role.runs_alert() {
        let notify = notify::build_manager(&config.notify, &config.alerting.detail_url).await;
        if let Some(path) = &config.notify.users_path {
            match notify::load_users(path).await {
                Ok(users) => notify.directory().refresh(users).await,
                Err(e) => warn!(path = %path.display(), error = %e, "User directory not loaded"),
            }
            tasks.push(notify::start_directory_refresh(
                notify.directory().clone(),
                path.clone(),
                Duration::from_secs(config.policy.reload_interval_secs),
            ));
        }

        let ticker = Arc::new(TickerPool::new(
            Duration::from_secs(config.ticker.interval_secs),
            config.ticker.pool_size,
        ));
        let alert = Arc::new(AlertService::new(
            RateLimit {
                interval_secs: config.alerting.alarm_interval_secs as i64,
                max_alarm_count: config.alerting.max_alarm_count,
            },
            pool_config(&config),
            ticker.clone(),
            Arc::new(FilePolicySource::new(&config.policy.source_path)),
            notify.clone(),
            clock.clone(),
        )
        .with_bounds(TimeBounds::new(
            config.worker.max_point_ahead_secs as i64,
            config.worker.max_point_age_secs as i64,
        )));

        if let Err(e) = alert.reload_policies().await {
            warn!(error = %e, "Initial policy load failed, will retry on next poll");
        }
        tasks.extend(alert.start(Duration::from_secs(config.policy.reload_interval_secs)));
        ticker.start().await;
        tickers.push(ticker);

        state.history = Some(notify.history().clone());
        state.alert = Some(alert);
    }

    // 采集端
    if args.role.runs_collector() {
        let mut evaluators = config.collector.evaluators.clone();
        let transport: Arc<dyn Transport> = match (&state.alert, args.role) {
            (Some(alert), Role::Standalone) => {
                let transport = InProcessTransport::new();
                transport
                    .register(config.system.instance.clone(), alert.clone())
                    .await;
                evaluators = vec![config.system.instance.clone()];
                Arc::new(transport)
            }
            _ => Arc::new(HttpTransport::new(Duration::from_secs(5))?),
        };
        if evaluators.is_empty() {
            warn!("No evaluators configured, summaries will be persisted but not forwarded");
        }

        let router = Arc::new(ConsistentHashRouter::new(
            config.collector.virtual_nodes,
            evaluators,
        ));
        let ticker = Arc::new(TickerPool::new(
            Duration::from_secs(config.collector.flush_interval_secs),
            config.ticker.pool_size,
        ));
        let collector = Arc::new(Collector::new(
            config.collector.defer_secs as i64,
            pool_config(&config),
            ticker.clone(),
            Arc::new(MemoryStorage::new()),
            Arc::new(Forwarder::new(router, transport)),
            clock.clone(),
        )
        .with_bounds(TimeBounds::new(
            config.collector.defer_secs as i64,
            config.worker.max_point_age_secs as i64,
        )));
        tasks.push(collector.start());
        ticker.start().await;
        tickers.push(ticker);

        state.collector = Some(collector);
    }

    // 信号
    let signals = Arc::new(SignalHandler::new());
    let shutdown = signals.wait();
    {
        let signals = signals.clone();
        tokio::spawn(async move {
            if let Err(e) = signals.wait_for_system_signal().await {
                warn!(error = %e, "Signal handler failed, triggering shutdown");
                signals.trigger_shutdown();
            }
        });
    }

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!("HTTP API listening on {}", config.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
        })
        .await?;

    // 停止节拍，停止工作者，丢弃队列
    for ticker in &tickers {
        ticker.stop().await;
    }
    if let Some(collector) = &state.collector {
        collector.shutdown().await;
    }
    if let Some(alert) = &state.alert {
        alert.shutdown().await;
    }
    for task in tasks {
        task.abort();
    }

    info!("APM server stopped");
    Ok(())
}
