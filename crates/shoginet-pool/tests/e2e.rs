//! End-to-end scenarios (spec §8): a mock HTTP backend plus a tiny shell
//! USI stub stand in for the server and the engine binaries, driving the
//! pool through its public API exactly as the binary crate would.

use std::time::Duration;

use shoginet_core::{ClientInfo, EngineFlavor, Job, Settings, Work};
use shoginet_pool::{start_pool, PoolConfig, PoolEvent, WorkerError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START_SFEN: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";
const TIMEOUT: Duration = Duration::from_secs(10);

fn settings(endpoint: &str, engine_cmd: &str) -> Settings {
    Settings {
        engine_dir: None,
        std_engine_cmd: engine_cmd.to_string(),
        variant_engine_cmd: engine_cmd.to_string(),
        key: "testkey".to_string(),
        cores: 1,
        threads: 1,
        memory: 64,
        endpoint: endpoint.to_string(),
        fixed_backoff: true,
        engine_std_options: Default::default(),
        engine_variant_options: Default::default(),
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        version: "test".to_string(),
        runtime: "rust".to_string(),
        apikey: "testkey".to_string(),
    }
}

/// Shell stub speaking just enough USI to drive the worker: answers the
/// handshake, then replies to every `go` with `go_reply` verbatim.
fn fake_engine(go_reply: &str) -> String {
    format!(
        "while IFS= read -r line; do case \"$line\" in \
            usi) printf 'id name fake\\nid author test\\nusiok\\n' ;; \
            isready) printf 'readyok\\n' ;; \
            go*) printf '{go_reply}' ;; \
            quit) exit 0 ;; \
         esac; done"
    )
}

/// As [`fake_engine`], but exits without answering the first `go` it
/// receives, simulating a crashed engine process.
fn crashing_engine() -> String {
    "while IFS= read -r line; do case \"$line\" in \
        usi) printf 'id name fake\\nid author test\\nusiok\\n' ;; \
        isready) printf 'readyok\\n' ;; \
        go*) exit 1 ;; \
     esac; done"
        .to_string()
}

fn analysis_job(id: &str, moves: &str) -> Job {
    Job {
        work: Work::Analysis {
            id: id.to_string(),
            flavor: EngineFlavor::Yaneuraou,
            multipv: None,
        },
        position: START_SFEN.to_string(),
        moves: moves.to_string(),
        variant: "standard".to_string(),
        game_id: None,
        skip_positions: vec![],
        nodes: None,
    }
}

fn move_job(id: &str) -> Job {
    Job {
        work: Work::Move {
            id: id.to_string(),
            level: 5,
            flavor: EngineFlavor::Yaneuraou,
            clock: None,
        },
        position: START_SFEN.to_string(),
        moves: String::new(),
        variant: "standard".to_string(),
        game_id: None,
        skip_positions: vec![],
        nodes: None,
    }
}

async fn next_matching<F>(events: &mut tokio::sync::broadcast::Receiver<PoolEvent>, mut pred: F) -> PoolEvent
where
    F: FnMut(&PoolEvent) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let evt = events.recv().await.expect("event stream closed early");
            if pred(&evt) {
                return evt;
            }
        }
    })
    .await
    .expect("timed out waiting for expected event")
}

#[tokio::test(flavor = "multi_thread")]
async fn acquire_with_no_job_available_idles_without_acquiring() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let engine_cmd = fake_engine("info depth 1 score cp 0\\nbestmove 7g7f\\n");
    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &engine_cmd),
        client_info: client_info(),
    })
    .expect("pool starts");

    let mut events = pool.subscribe();
    next_matching(&mut events, |e| matches!(e, PoolEvent::WorkerStarted { .. })).await;
    let saw_job = tokio::time::timeout(Duration::from_millis(500), next_matching(&mut events, |e| {
        matches!(e, PoolEvent::JobAcquired { .. })
    }))
    .await;
    assert!(saw_job.is_err(), "no job should ever be acquired from a 204 acquire response");

    pool.request_stop().await;
    assert!(matches!(pool.wait().await, Ok(())));
}

#[tokio::test(flavor = "multi_thread")]
async fn analysis_job_runs_to_completion_and_reports() {
    let server = MockServer::start().await;
    let job = analysis_job("job-an-1", "");
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(202).set_body_json(&job))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/analysis/job-an-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let engine_cmd = fake_engine("info depth 12 score cp 80 nodes 12345 time 900 pv 7g7f\\nbestmove 7g7f\\n");
    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &engine_cmd),
        client_info: client_info(),
    })
    .expect("pool starts");

    let mut events = pool.subscribe();
    let acquired = next_matching(&mut events, |e| matches!(e, PoolEvent::JobAcquired { .. })).await;
    assert!(matches!(&acquired, PoolEvent::JobAcquired { path, .. } if path == "analysis/job-an-1"));
    let finished = next_matching(&mut events, |e| matches!(e, PoolEvent::JobFinished { .. })).await;
    assert!(matches!(&finished, PoolEvent::JobFinished { path, .. } if path == "analysis/job-an-1"));

    pool.request_stop().await;
    assert!(matches!(pool.wait().await, Ok(())));
}

#[tokio::test(flavor = "multi_thread")]
async fn move_job_at_level_five_reports_bestmove() {
    let server = MockServer::start().await;
    let job = move_job("job-mv-1");
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(202).set_body_json(&job))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/move/job-mv-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let engine_cmd = fake_engine("bestmove 2g2f\\n");
    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &engine_cmd),
        client_info: client_info(),
    })
    .expect("pool starts");

    let mut events = pool.subscribe();
    let finished = next_matching(&mut events, |e| matches!(e, PoolEvent::JobFinished { .. })).await;
    assert!(matches!(&finished, PoolEvent::JobFinished { path, .. } if path == "move/job-mv-1"));

    pool.request_stop().await;
    assert!(matches!(pool.wait().await, Ok(())));
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_engine_is_reported_and_worker_respawns() {
    let server = MockServer::start().await;
    let job = analysis_job("job-dead-1", "");
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(202).set_body_json(&job))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/abort/job-dead-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &crashing_engine()),
        client_info: client_info(),
    })
    .expect("pool starts");

    let mut events = pool.subscribe();
    next_matching(&mut events, |e| matches!(e, PoolEvent::EngineDied { .. })).await;

    pool.request_stop().await;
    assert!(matches!(pool.wait().await, Ok(())));
}

#[tokio::test(flavor = "multi_thread")]
async fn update_required_response_stops_the_pool_with_that_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "Please restart shoginet to upgrade."
        })))
        .mount(&server)
        .await;

    let engine_cmd = fake_engine("bestmove 7g7f\\n");
    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &engine_cmd),
        client_info: client_info(),
    })
    .expect("pool starts");

    let result = tokio::time::timeout(TIMEOUT, pool.wait()).await.expect("pool did not stop in time");
    assert!(matches!(result, Err(WorkerError::UpdateRequired)));
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_stop_lets_the_in_flight_job_finish_before_exiting() {
    let server = MockServer::start().await;
    let job = analysis_job("job-grace-1", "");
    Mock::given(method("POST"))
        .and(path("/acquire"))
        .respond_with(ResponseTemplate::new(202).set_body_json(&job))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/analysis/job-grace-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    // Sleeps briefly before answering `go` so the stop request lands
    // while the job is still in flight.
    let engine_cmd = "while IFS= read -r line; do case \"$line\" in \
            usi) printf 'id name fake\\nid author test\\nusiok\\n' ;; \
            isready) printf 'readyok\\n' ;; \
            go*) sleep 0.3; printf 'info depth 1 score cp 0\\nbestmove 7g7f\\n' ;; \
            quit) exit 0 ;; \
         esac; done"
        .to_string();
    let pool = start_pool(PoolConfig {
        settings: settings(&server.uri(), &engine_cmd),
        client_info: client_info(),
    })
    .expect("pool starts");

    let mut events = pool.subscribe();
    next_matching(&mut events, |e| matches!(e, PoolEvent::JobAcquired { .. })).await;
    pool.request_stop_soon();

    let finished = next_matching(&mut events, |e| matches!(e, PoolEvent::JobFinished { .. })).await;
    assert!(matches!(&finished, PoolEvent::JobFinished { path, .. } if path == "analysis/job-grace-1"));

    assert!(matches!(pool.wait().await, Ok(())));
}
