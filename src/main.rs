use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use command_cluster::cluster;
use command_cluster::command::pattern::{Command, Functor};
use command_cluster::command::registry::CommandRegistry;
use command_cluster::command::types::ContextId;
use command_cluster::config::NodeConfig;
use command_cluster::context::environment::ExecutionEnvironment;
use command_cluster::context::types::ManagementStrategy;
use command_cluster::engine::engine::CommandEngine;
use command_cluster::engine::submitter::{CommandSubmitter, FunctorSubmitter};
use command_cluster::membership::service::{MembershipService, default_http_addr};
use command_cluster::storage::partitioner::PartitionManager;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Replaces the counter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetValue(i64);

impl Command<i64> for SetValue {
    const NAME: &'static str = "set_value";

    fn execute(&self, env: &mut ExecutionEnvironment<i64>) -> anyhow::Result<()> {
        env.set_context(self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Add(i64);

impl Command<i64> for Add {
    const NAME: &'static str = "add";

    fn execute(&self, env: &mut ExecutionEnvironment<i64>) -> anyhow::Result<()> {
        let current = *env.context();
        let next = current
            .checked_add(self.0)
            .ok_or_else(|| anyhow::anyhow!("counter overflow: {} + {}", current, self.0))?;
        env.set_context(next);
        Ok(())
    }
}

/// Returns the current value and increments it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NextValue;

impl Functor<i64> for NextValue {
    const NAME: &'static str = "next_value";
    type Output = i64;

    fn execute(&self, env: &mut ExecutionEnvironment<i64>) -> anyhow::Result<i64> {
        let current = *env.context();
        env.set_context(current + 1);
        Ok(current)
    }
}

#[derive(Debug, Deserialize)]
struct CounterRequest {
    value: i64,
}

#[derive(Debug, Serialize)]
struct CounterResponse {
    context_id: String,
    value: Option<i64>,
    error: Option<String>,
}

impl CounterResponse {
    fn ok(context_id: String, value: Option<i64>) -> Json<Self> {
        Json(Self {
            context_id,
            value,
            error: None,
        })
    }

    fn failed(context_id: String, error: impl ToString) -> Json<Self> {
        Json(Self {
            context_id,
            value: None,
            error: Some(error.to_string()),
        })
    }
}

async fn handle_get_counter(
    Extension(engine): Extension<Arc<CommandEngine<i64>>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<CounterResponse>) {
    match engine.get_context(&ContextId::new(id.clone())).await {
        Some(value) => (StatusCode::OK, CounterResponse::ok(id, Some(value))),
        None => (StatusCode::NOT_FOUND, CounterResponse::ok(id, None)),
    }
}

async fn handle_create_counter(
    Extension(engine): Extension<Arc<CommandEngine<i64>>>,
    Path(id): Path<String>,
    Json(req): Json<CounterRequest>,
) -> (StatusCode, Json<CounterResponse>) {
    match engine
        .register_context(id.as_str(), req.value, ManagementStrategy::Distributed)
        .await
    {
        Ok(true) => (StatusCode::CREATED, CounterResponse::ok(id, Some(req.value))),
        Ok(false) => (StatusCode::CONFLICT, CounterResponse::failed(id, "counter already exists")),
        Err(e) => (StatusCode::BAD_REQUEST, CounterResponse::failed(id, e)),
    }
}

async fn handle_add_counter(
    Extension(submitter): Extension<CommandSubmitter<i64>>,
    Path(id): Path<String>,
    Json(req): Json<CounterRequest>,
) -> (StatusCode, Json<CounterResponse>) {
    match submitter.submit_command(id.as_str(), Add(req.value)).await {
        Ok(key) => {
            tracing::debug!("Queued {}", key);
            (StatusCode::ACCEPTED, CounterResponse::ok(id, None))
        }
        Err(e) => (StatusCode::BAD_REQUEST, CounterResponse::failed(id, e)),
    }
}

async fn handle_set_counter(
    Extension(submitter): Extension<CommandSubmitter<i64>>,
    Path(id): Path<String>,
    Json(req): Json<CounterRequest>,
) -> (StatusCode, Json<CounterResponse>) {
    match submitter.submit_command(id.as_str(), SetValue(req.value)).await {
        Ok(_) => (StatusCode::ACCEPTED, CounterResponse::ok(id, None)),
        Err(e) => (StatusCode::BAD_REQUEST, CounterResponse::failed(id, e)),
    }
}

async fn handle_next_counter(
    Extension(functors): Extension<FunctorSubmitter<i64>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<CounterResponse>) {
    let future = match functors.submit_functor(id.as_str(), NextValue).await {
        Ok(future) => future,
        Err(e) => return (StatusCode::BAD_REQUEST, CounterResponse::failed(id, e)),
    };

    match future.get_timeout(Duration::from_secs(30)).await {
        Ok(value) => (StatusCode::OK, CounterResponse::ok(id, Some(value))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, CounterResponse::failed(id, e)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--http <addr:port>] [--workers <n>] [--config <file>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    // --config is applied first so flags always win over the file.
    let mut config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
            NodeConfig::load(path)?
        }
        None => NodeConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind", Some(value)) => {
                config.bind = Some(value.parse()?);
                i += 2;
            }
            ("--seed", Some(value)) => {
                config.seeds.push(value.parse()?);
                i += 2;
            }
            ("--http", Some(value)) => {
                config.http = Some(value.parse()?);
                i += 2;
            }
            ("--workers", Some(value)) => {
                config.engine.workers = value.parse()?;
                i += 2;
            }
            ("--config", Some(_)) => {
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr: SocketAddr = config
        .bind
        .ok_or_else(|| anyhow::anyhow!("--bind is required"))?;

    tracing::info!("Starting node on {}", bind_addr);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let membership = MembershipService::with_config(
        bind_addr,
        config.http,
        config.seeds.clone(),
        config.membership.clone(),
    )
    .await?;
    tracing::info!("Node ID: {}", membership.local_id());
    membership.start();

    // 2. Engine:
    let partitioner = Arc::new(PartitionManager::with_partitions(
        membership.clone(),
        config.engine.partitions,
    ));

    let registry = CommandRegistry::new(config.engine.codec);
    registry.register_command::<SetValue>();
    registry.register_command::<Add>();
    registry.register_functor::<NextValue>();
    tracing::info!("Registered handlers: {:?}", registry.list_handlers());

    let engine = CommandEngine::new(config.engine.clone(), membership.clone(), partitioner, registry);
    engine.start()?;

    // 3. HTTP Router:
    let app = Router::new()
        .route("/contexts/:id", get(handle_get_counter))
        .route("/counters/:id", post(handle_create_counter))
        .route("/counters/:id/add", post(handle_add_counter))
        .route("/counters/:id/set", post(handle_set_counter))
        .route("/counters/:id/next", post(handle_next_counter))
        .layer(Extension(engine.command_submitter()))
        .layer(Extension(engine.functor_submitter()))
        .layer(Extension(engine.clone()))
        .merge(cluster::router(engine.clone()));

    // 4. Spawn stats reporter:
    let stats_engine = engine.clone();
    let stats_membership = membership.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let alive = stats_membership.get_alive_members();
            let pool = stats_engine.processors();
            tracing::info!(
                "Cluster stats: {} alive nodes, {} workers, {} reassignments",
                alive.len(),
                pool.worker_ids().len(),
                pool.reassignments()
            );
            for worker in pool.worker_ids() {
                tracing::info!("  - {} in progress={}", worker, pool.tasks_in_progress(&worker));
            }
        }
    });

    // 5. Start HTTP server:
    let http_addr = config.http.unwrap_or_else(|| default_http_addr(bind_addr));

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown();
    membership.shutdown();
    Ok(())
}
