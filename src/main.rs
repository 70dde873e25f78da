mod cli;

use std::sync::Arc;

use qos_pipeline::aggregator::{run_flush_loop, run_worker_loop, AggregatorState};
use qos_pipeline::bus::{EventBus, NatsBus};
use qos_pipeline::clock::{SharedClock, SystemClock};
use qos_pipeline::config::PipelineConfig;
use qos_pipeline::diagnoser::{run_diagnoser_loop, DiagnoserState};
use qos_pipeline::error::PipelineError;
use qos_pipeline::ingest::{build_router, run_rate_limiter_eviction_loop, IngestState, RateLimiter};
use qos_pipeline::logging;
use qos_pipeline::metrics::Metrics;
use qos_pipeline::retention::run_retention_loop;
use qos_pipeline::store::{AggregateStore, PostgresStore};
use tokio::net::TcpListener;
use tracing::info;

use cli::{Cli, Command, DlqAction};

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    logging::init();
    let cli = Cli::parse_args();
    let config = PipelineConfig::load(cli.config.as_deref()).map_err(PipelineError::Config)?;

    match cli.command {
        Command::Run => run_all(config).await,
        Command::ServeIngest => run_ingest_only(config).await,
        Command::RunAggregator => run_aggregator_only(config).await,
        Command::RunDiagnoser => run_diagnoser_only(config).await,
        Command::Dlq { action } => run_dlq(config, action).await,
    }
}

fn shutdown_channel() -> (tokio::sync::watch::Sender<bool>, tokio::sync::watch::Receiver<bool>) {
    tokio::sync::watch::channel(false)
}

async fn wait_for_shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight work");
    let _ = tx.send(true);
}

async fn connect_store(config: &PipelineConfig) -> Result<Arc<dyn AggregateStore>, PipelineError> {
    let store = PostgresStore::connect(&config.store).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

async fn connect_bus(config: &PipelineConfig) -> Result<Arc<dyn EventBus>, PipelineError> {
    let bus = NatsBus::connect(&config.bus).await?;
    Ok(Arc::new(bus))
}

async fn run_ingest_only(config: PipelineConfig) -> Result<(), PipelineError> {
    let bus = connect_bus(&config).await?;
    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let rate_limiter = Arc::new(RateLimiter::new(config.ingest.rate_limit_rps, config.ingest.rate_limit_burst));

    let (tx, rx) = shutdown_channel();
    let eviction = tokio::spawn(run_rate_limiter_eviction_loop(rate_limiter.clone(), clock.clone(), rx.clone()));

    let state = IngestState {
        bus,
        clock,
        config: config.ingest.clone(),
        rate_limiter,
        metrics,
    };
    let ingest_task = tokio::spawn(serve_ingest(state, rx));

    wait_for_shutdown_signal(tx).await;
    let _ = ingest_task.await;
    let _ = eviction.await;
    Ok(())
}

async fn serve_ingest(state: IngestState, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<(), PipelineError> {
    let listen_addr = state.config.listen_addr.clone();
    let router = build_router(state);
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "ingest server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn run_aggregator_only(config: PipelineConfig) -> Result<(), PipelineError> {
    let bus = connect_bus(&config).await?;
    let store = connect_store(&config).await?;
    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let state = AggregatorState::new(bus, store, clock, config.agg.clone(), metrics);

    let (tx, rx) = shutdown_channel();
    let mut workers = Vec::new();
    for _ in 0..config.agg.worker_concurrency {
        workers.push(tokio::spawn(run_worker_loop(state.clone(), rx.clone())));
    }
    let flush = tokio::spawn(run_flush_loop(state.clone(), rx.clone()));

    wait_for_shutdown_signal(tx).await;
    for worker in workers {
        let _ = worker.await;
    }
    let _ = flush.await;
    Ok(())
}

async fn run_diagnoser_only(config: PipelineConfig) -> Result<(), PipelineError> {
    let store = connect_store(&config).await?;
    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let state = DiagnoserState {
        store,
        clock,
        config: config.diag.clone(),
        lateness_ms: config.agg.lateness_ms,
        metrics,
    };

    let (tx, rx) = shutdown_channel();
    let diagnoser = tokio::spawn(run_diagnoser_loop(state, rx));
    wait_for_shutdown_signal(tx).await;
    let _ = diagnoser.await;
    Ok(())
}

async fn run_all(config: PipelineConfig) -> Result<(), PipelineError> {
    let bus = connect_bus(&config).await?;
    let store = connect_store(&config).await?;
    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());

    let agg_state = AggregatorState::new(bus.clone(), store.clone(), clock.clone(), config.agg.clone(), metrics.clone());
    let diag_state = DiagnoserState {
        store: store.clone(),
        clock: clock.clone(),
        config: config.diag.clone(),
        lateness_ms: config.agg.lateness_ms,
        metrics: metrics.clone(),
    };
    let rate_limiter = Arc::new(RateLimiter::new(config.ingest.rate_limit_rps, config.ingest.rate_limit_burst));
    let ingest_state = IngestState {
        bus,
        clock,
        config: config.ingest.clone(),
        rate_limiter,
        metrics,
    };

    let (tx, rx) = shutdown_channel();
    let mut tasks = Vec::new();
    for _ in 0..config.agg.worker_concurrency {
        tasks.push(tokio::spawn(run_worker_loop(agg_state.clone(), rx.clone())));
    }
    tasks.push(tokio::spawn(run_flush_loop(agg_state.clone(), rx.clone())));
    tasks.push(tokio::spawn(run_diagnoser_loop(diag_state, rx.clone())));
    tasks.push(tokio::spawn(run_retention_loop(store, agg_state.clock.clone(), config.store.clone(), rx.clone())));
    tasks.push(tokio::spawn(run_rate_limiter_eviction_loop(
        ingest_state.rate_limiter.clone(),
        ingest_state.clock.clone(),
        rx.clone(),
    )));

    let ingest_task = tokio::spawn(serve_ingest(ingest_state, rx.clone()));

    wait_for_shutdown_signal(tx).await;
    for task in tasks {
        let _ = task.await;
    }
    let _ = ingest_task.await;
    Ok(())
}

async fn run_dlq(config: PipelineConfig, action: DlqAction) -> Result<(), PipelineError> {
    let client = async_nats::connect(&config.bus.nats_url)
        .await
        .map_err(|e| PipelineError::Config(format!("connecting to NATS for DLQ inspection: {e}")))?;
    let context = async_nats::jetstream::new(client);
    let stream = context
        .get_stream(&config.bus.stream_name)
        .await
        .map_err(|e| PipelineError::Config(format!("DLQ stream not found: {e}")))?;

    let (limit, drain) = match action {
        DlqAction::List { limit } => (limit, false),
        DlqAction::Drain { limit } => (limit, true),
    };

    let mut consumer = stream
        .create_consumer(async_nats::jetstream::consumer::pull::Config {
            filter_subject: config.bus.dlq_subject.clone(),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        })
        .await
        .map_err(|e| PipelineError::Config(format!("creating ephemeral DLQ consumer: {e}")))?;

    use futures::StreamExt;
    let mut batch = consumer
        .fetch()
        .max_messages(limit)
        .expires(std::time::Duration::from_secs(2))
        .messages()
        .await
        .map_err(|e| PipelineError::Config(format!("fetching DLQ batch: {e}")))?;

    let mut count = 0;
    while let Some(message) = batch.next().await {
        let message = message.map_err(|e| PipelineError::Config(e.to_string()))?;
        println!("{}", String::from_utf8_lossy(&message.payload));
        if drain {
            message.ack().await.map_err(|e| PipelineError::Config(e.to_string()))?;
        } else {
            message
                .ack_with(async_nats::jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| PipelineError::Config(e.to_string()))?;
        }
        count += 1;
    }
    println!("{count} message(s) {}", if drain { "drained" } else { "listed" });
    Ok(())
}
