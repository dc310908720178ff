use clap::{Args, Parser, Subcommand};
use distributed_taskqueue::abort;
use distributed_taskqueue::collective::adapters::Collectives;
use distributed_taskqueue::comm::Communicator;
use distributed_taskqueue::comm::local::run_local;
use distributed_taskqueue::comm::tcp::TcpTransport;
use distributed_taskqueue::comm::types::Rank;
use distributed_taskqueue::config::{FailurePolicy, QueueConfig};
use distributed_taskqueue::error::Result;
use distributed_taskqueue::executor::executor::TaskQueue;
use distributed_taskqueue::executor::registry::TaskHandlerRegistry;
use distributed_taskqueue::executor::types::Task;
use distributed_taskqueue::roles::gate::{Role, gate};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Master/worker task queue over a message-passing process group
#[derive(Parser)]
#[command(name = "distributed-taskqueue")]
#[command(about = "Run the square-numbers demo workload on a task queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every rank inside this process
    Local {
        /// Number of processes, including the root
        #[arg(long, default_value_t = 4)]
        ranks: usize,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run one rank of a TCP mesh
    ///
    /// Start one node per address in `--peers`; node `R` listens on the
    /// `R`-th address.
    Node {
        #[arg(long)]
        rank: Rank,

        /// Listen address of every rank, in rank order
        #[arg(long, value_delimiter = ',', required = true)]
        peers: Vec<SocketAddr>,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Number of tasks the root submits
    #[arg(long, default_value_t = 16)]
    tasks: u64,

    /// Make the task with this index fail
    #[arg(long)]
    fail_task: Option<u64>,

    /// Record failed tasks instead of aborting the run
    #[arg(long)]
    continue_on_failure: bool,

    /// Extra attempts for a failing task
    #[arg(long)]
    max_retries: Option<u32>,

    /// Operator used to combine the per-rank task counts
    #[arg(long, default_value = "sum")]
    reduce: String,
}

impl RunArgs {
    fn queue_config(&self) -> Result<QueueConfig> {
        let mut config = QueueConfig::from_env()?;
        if self.continue_on_failure {
            config = config.with_failure_policy(FailurePolicy::ContinueOnFailure);
        }
        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level, e.g. RUST_LOG=distributed_taskqueue=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        tracing::error!("Run failed: {}", error);
        std::process::exit(error.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Local { ranks, run: args } => {
            let config = args.queue_config()?;
            tracing::info!("Starting {} local ranks", ranks);

            let outcomes = run_local(ranks, |comm| demo(comm, args.clone(), config.clone())).await?;
            outcomes.into_iter().collect::<Result<Vec<()>>>()?;
            Ok(())
        }
        Commands::Node { rank, peers, run: args } => {
            let config = args.queue_config()?;
            tracing::info!("Starting rank {} of {}", rank, peers.len());

            let comm = TcpTransport::connect(rank, peers).await?;
            abort::guard(&comm, async {
                demo(comm.clone(), args, config).await?;
                // An abort raised after this rank's last message still fails the node
                comm.finalize().await
            })
            .await
        }
    }
}

fn demo_registry() -> Arc<TaskHandlerRegistry> {
    let registry = TaskHandlerRegistry::new();

    registry.register("square", |task| async move {
        let n = task.parameters["n"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("Missing n"))?;
        // Uneven work so faster workers pick up more tasks
        tokio::time::sleep(Duration::from_millis(n % 4 * 25)).await;
        Ok(serde_json::json!(n * n))
    });

    registry.register("fail", |task| async move {
        Err(anyhow::anyhow!("Task {} failed on purpose", task.task_id))
    });

    registry
}

/// The per-rank demo: every rank runs this same sequence of collective calls.
async fn demo(comm: Communicator, args: RunArgs, config: QueueConfig) -> Result<()> {
    let collectives = Collectives::new(comm.clone());
    let reducer = collectives.reducer(&args.reduce)?;

    let requested = args.tasks;
    let task_count = collectives.broadcast_from_main(move || Ok(requested)).await?;

    let mut queue = TaskQueue::new(comm.clone(), demo_registry(), config);
    abort::guard(&comm, async {
        gate(&comm.identity(), &Role::Root, || {
            for n in 0..task_count {
                let kind = if args.fail_task == Some(n) { "fail" } else { "square" };
                queue.submit(Task::with_id(
                    format!("task-{}", n),
                    kind,
                    serde_json::json!({ "n": n }),
                ))?;
            }
            Ok(())
        })
        .map(|_| ())
    })
    .await?;

    let store = queue.run_until_complete().await?;
    if let Some(store) = store.executed() {
        let total: u64 = store
            .iter()
            .filter_map(|result| result.value()?.as_u64())
            .sum();
        tracing::info!(
            "Collected {} results ({} failed), sum of squares = {}",
            store.len(),
            store.failures().len(),
            total
        );
    }

    let executed = queue.executed_count() as u64;
    let combined = reducer.reduce_to_all(move || Ok(executed)).await?;
    tracing::info!(
        "Rank {} executed {} tasks ({} over all ranks: {})",
        comm.rank(),
        executed,
        reducer.op(),
        combined
    );

    Ok(())
}
