//! End-to-end lifecycle of a distributed execution, driven through the
//! public API with recorded cluster traffic standing in for workers.

use pregel_conductor::storage::CollectionKind;
use pregel_conductor::storage::EdgeDefinition;
use pregel_conductor::testing::{ManualScheduler, RecordingCluster};
use pregel_conductor::{
    Algorithm, Conductor, ConductorConfig, DelimiterValidator, ExecutionOptions, JobState,
    MemoryExecutionRegistry, MemoryGraphStore, MemoryKeyValueStore, StepReport, Topology,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SERVERS: [&str; 2] = ["db1", "db2"];

fn conductor_with(cluster: Arc<RecordingCluster>) -> Arc<Conductor> {
    let graphs = Arc::new(MemoryGraphStore::new());
    graphs.add_collection("cities", CollectionKind::Vertex, &SERVERS, &["_key"]);
    graphs.add_collection("roads", CollectionKind::Edge, &SERVERS, &["_key"]);
    graphs.add_graph(
        "routes",
        vec![EdgeDefinition {
            collection: "roads".to_string(),
            from: vec!["cities".to_string()],
            to: vec!["cities".to_string()],
        }],
        vec![],
    );
    graphs.set_vertex_count("cities", 10);

    Conductor::new(ConductorConfig {
        server_name: "coordinator".to_string(),
        topology: Topology::Distributed {
            servers: SERVERS.iter().map(|s| s.to_string()).collect(),
        },
        kv: Arc::new(MemoryKeyValueStore::new()),
        graphs,
        registry: Arc::new(MemoryExecutionRegistry::new()),
        cluster: Some(cluster),
        scheduler: Arc::new(ManualScheduler::new()),
        worker: None,
        validator: Arc::new(DelimiterValidator),
        default_timeout: Duration::from_secs(5),
    })
}

fn quiescent(step: u64) -> StepReport {
    StepReport {
        step: Some(step),
        active: Some(0),
        messages: Some(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn two_step_run_to_completion() {
    let cluster = Arc::new(RecordingCluster::new());
    let conductor = conductor_with(cluster.clone());

    let execution = conductor
        .start_execution(
            "routes",
            Algorithm::new("function (vertex) { vertex.vote(); }"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    // Step 0: both workers still have activity.
    for server in SERVERS {
        conductor
            .finished_step(
                &execution,
                server,
                StepReport {
                    step: Some(0),
                    active: Some(3),
                    messages: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    let info = conductor.get_info(&execution).await.unwrap();
    assert_eq!(info.step, 1);
    assert_eq!(info.state, JobState::Running);

    // Step 1: quiescence, so the conductor dispatches cleanup.
    for server in SERVERS {
        conductor
            .finished_step(&execution, server, quiescent(1))
            .await
            .unwrap();
    }
    let cleanup_prefix = format!("/_api/pregel/cleanup/{execution}");
    assert_eq!(cluster.requests_to(&cleanup_prefix).len(), 2);

    for server in SERVERS {
        conductor.finished_cleanup(&execution, server).await.unwrap();
    }

    let result = conductor.get_result(&execution).await.unwrap();
    assert!(!result.error);
    assert_eq!(result.state, JobState::Finished);
    let graph = result.graph_name.expect("finished run names its result");
    assert_eq!(graph, format!("P_{execution}_RESULT_routes"));

    // Three dispatch batches total: step 0, step 1, cleanup.
    assert_eq!(cluster.sent().len(), 6);
    let step_bodies: Vec<_> = cluster.requests_to("/_api/pregel/nextStep");
    assert_eq!(step_bodies.len(), 4);
    assert_eq!(step_bodies[0].body["step"], json!(0));
    assert_eq!(step_bodies[3].body["step"], json!(1));

    conductor.drop_result(&execution).await.unwrap();
    assert!(conductor.get_result(&execution).await.is_err());
}
