use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use pregel_conductor::conductor::DEFAULT_STEP_TIMEOUT;
use pregel_conductor::storage::CollectionKind;
use pregel_conductor::{
    Algorithm, Conductor, ConductorConfig, ConductorResult, DelimiterValidator, DispatchBody,
    ExecutionOptions, JobState, MemoryExecutionRegistry, MemoryGraphStore, MemoryKeyValueStore,
    StepReport, TokioScheduler, Topology, WorkerExecutor,
};
use serde_json::json;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use storage_seed::seed_social_graph;
use tracing::{error, warn};

/// Coordinate BSP graph computations
#[derive(Parser)]
#[command(name = "pregel-conductor")]
#[command(about = "Conductor for bulk-synchronous-parallel graph computations", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo execution against an in-memory graph and print the result
    Demo {
        /// Number of vertices to seed
        #[arg(long, default_value = "100")]
        vertices: u64,

        /// Watchdog timeout per step, in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Demo {
            vertices,
            timeout_secs,
        } => run_demo(vertices, Duration::from_secs(timeout_secs)).await,
    }
}

async fn run_demo(vertices: u64, timeout: Duration) -> anyhow::Result<()> {
    let graphs = Arc::new(MemoryGraphStore::new());
    seed_social_graph(&graphs, vertices);

    let worker = Arc::new(QuiescingWorker::default());
    let conductor = Conductor::new(ConductorConfig {
        server_name: "conductor".to_string(),
        topology: Topology::Local,
        kv: Arc::new(MemoryKeyValueStore::new()),
        graphs,
        registry: Arc::new(MemoryExecutionRegistry::new()),
        cluster: None,
        scheduler: Arc::new(TokioScheduler::new()),
        worker: Some(worker.clone()),
        validator: Arc::new(DelimiterValidator),
        default_timeout: DEFAULT_STEP_TIMEOUT,
    });
    worker.attach(Arc::downgrade(&conductor));

    let algorithm = Algorithm::new("function (vertex) { vertex.deactivate(); }")
        .with_superstep(|mut globals, summary| {
            let seen = globals["stepsSeen"].as_i64().unwrap_or(0);
            globals["stepsSeen"] = json!(seen + 1);
            globals["lastActive"] = json!(summary.active);
            globals
        });
    let execution = conductor
        .start_execution(
            "social",
            algorithm,
            ExecutionOptions {
                timeout: Some(timeout),
                ..Default::default()
            },
        )
        .await
        .context("starting execution")?;

    // The conductor never blocks for completion; poll like a client would.
    let mut result = conductor.get_result(&execution).await?;
    let mut remaining = 200u32;
    while result.state == JobState::Running && remaining > 0 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        result = conductor.get_result(&execution).await?;
        remaining -= 1;
    }
    if result.state == JobState::Running {
        warn!(%execution, "execution still running, giving up on the demo");
    }

    let info = conductor.get_info(&execution).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

mod storage_seed {
    use super::*;
    use pregel_conductor::storage::EdgeDefinition;

    /// Seeds the demo graph: one vertex collection, one edge collection, one
    /// graph named `social`, all on the local pseudo-server.
    pub fn seed_social_graph(graphs: &MemoryGraphStore, vertices: u64) {
        graphs.add_collection("profiles", CollectionKind::Vertex, &["localhost"], &["_key"]);
        graphs.add_collection("knows", CollectionKind::Edge, &["localhost"], &["_key"]);
        graphs.add_graph(
            "social",
            vec![EdgeDefinition {
                collection: "knows".to_string(),
                from: vec!["profiles".to_string()],
                to: vec!["profiles".to_string()],
            }],
            vec![],
        );
        graphs.set_vertex_count("profiles", vertices);
    }
}

/// Local worker that quiesces immediately: every dispatched step reports no
/// remaining activity, so the job finishes after one superstep.
#[derive(Default)]
struct QuiescingWorker {
    conductor: OnceLock<Weak<Conductor>>,
}

impl QuiescingWorker {
    fn attach(&self, conductor: Weak<Conductor>) {
        let _ = self.conductor.set(conductor);
    }

    fn conductor(&self) -> Option<Arc<Conductor>> {
        self.conductor.get().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl WorkerExecutor for QuiescingWorker {
    async fn execute_step(
        &self,
        execution: &str,
        step: u64,
        _body: DispatchBody,
    ) -> ConductorResult<()> {
        let Some(conductor) = self.conductor() else {
            return Ok(());
        };
        let execution = execution.to_string();
        tokio::spawn(async move {
            let report = StepReport {
                step: Some(step),
                active: Some(0),
                messages: Some(0),
                ..Default::default()
            };
            if let Err(err) = conductor
                .finished_step(&execution, Topology::LOCAL_PARTICIPANT, report)
                .await
            {
                error!(%execution, %err, "step report rejected");
            }
        });
        Ok(())
    }

    async fn clean_up(&self, execution: &str) -> ConductorResult<()> {
        let Some(conductor) = self.conductor() else {
            return Ok(());
        };
        let execution = execution.to_string();
        tokio::spawn(async move {
            if let Err(err) = conductor
                .finished_cleanup(&execution, Topology::LOCAL_PARTICIPANT)
                .await
            {
                error!(%execution, %err, "cleanup report rejected");
            }
        });
        Ok(())
    }
}
