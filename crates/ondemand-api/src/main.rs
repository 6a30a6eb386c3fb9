//! ondemand API server

use anyhow::Context;
use clap::Parser;
use ondemand_api::{AppState, routes};
use ondemand_config::{SchedulerConfig, open_library, parse_scheduler_config};
use ondemand_executor::KubernetesOrchestrator;
use ondemand_scheduler::worker::DEFAULT_BATCH_SIZE;
use ondemand_scheduler::{BatchHandler, ChannelQueue, Dispatcher, Submitter, Worker};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ondemand-server")]
#[command(about = "Schedules CI jobs as on-demand agent tasks", long_about = None)]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ONDEMAND_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// KDL scheduler configuration; the environment is used when absent
    #[arg(short, long, env = "ONDEMAND_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace task templates and jobs are created in
    #[arg(long, env = "KUBERNETES_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Queued jobs dispatched together
    #[arg(long, env = "ONDEMAND_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Emit JSON logs
    #[arg(long, env = "ONDEMAND_LOG_JSON")]
    log_json: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(parse_scheduler_config(&content)?)
        }
        None => Ok(SchedulerConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_config(args.config.as_ref())?;
    info!(
        cluster = ?config.cluster,
        queue = ?config.queue,
        namespace = %args.namespace,
        "Loaded configuration"
    );

    let orchestrator = KubernetesOrchestrator::new(args.namespace.clone()).await?;
    let mut dispatcher = Dispatcher::new(config.clone(), Submitter::new(Arc::new(orchestrator)));
    if let Some(location) = config.template_library.as_deref() {
        info!(location = %location, "Using template library");
        dispatcher = dispatcher.with_library(open_library(location)?);
    }
    let handler = BatchHandler::new(Arc::new(dispatcher));

    let (queue, receiver) = ChannelQueue::new(config.max_deliveries);
    let worker = Worker::new(queue.clone(), receiver, handler.clone()).with_batch_size(args.batch_size);
    tokio::spawn(worker.run());

    let state = AppState::new(Arc::new(queue), handler);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", args.listen);
    let listener = TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
