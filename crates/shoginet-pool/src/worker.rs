//! Worker (spec §4.D): owns one pair of engine sessions for one core
//! bucket and drives the acquire/execute/report loop against them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use shoginet_core::{
    AnalysisPly, AnalysisResult, Backoff, Censor, Clock, ClientInfo, EngineFlavor, EngineInfo,
    EngineOptions, Envelope, Job, MoveResult, MultiPvAnalysis, PuzzleResult, Work,
};
use tokio::sync::{broadcast, Mutex, Notify};

use crate::backend::{self, PostOutcome};
use crate::events::{LogLevel, PoolEvent};
use crate::reporter::ProgressHandle;
use crate::usi::{kill_pid_group, AnalysisReading, EngineError, EngineKind, EngineSession};

const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_ANALYSIS_NODES: u64 = 3_500_000;
const ANALYSIS_MOVETIME_MS: u64 = 7_000;
const PUZZLE_DEPTH: u32 = 18;
const PUZZLE_MOVETIME_MS: u64 = 3_000;
const NPS_MIN_TIME_MS: u64 = 200;

/// Error surfaced out of [`Worker::run`]; anything else is handled
/// internally as a dead-engine respawn.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The server signaled that this client build must be restarted.
    #[error("server requires a client restart")]
    UpdateRequired,
    /// An unrecoverable condition outside the normal dead-engine path
    /// (e.g. the engine binary could not be spawned at all).
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

enum IterationError {
    Engine(EngineError),
    UpdateRequired,
}

impl From<EngineError> for IterationError {
    fn from(err: EngineError) -> Self {
        IterationError::Engine(err)
    }
}

/// Static configuration for one worker, handed down by the supervisor.
pub struct WorkerConfig {
    /// 0-based index, used only for log/event labeling.
    pub worker_idx: usize,
    /// Threads given to each managed engine.
    pub threads: u32,
    /// Total hash-table memory (MiB) for this worker, split in half
    /// between the two engines.
    pub memory_mib: u32,
    /// Shell command/path used to start the standard engine.
    pub std_engine_cmd: String,
    /// Shell command/path used to start the variant engine.
    pub variant_engine_cmd: String,
    /// Working directory for spawned engines, if configured.
    pub engine_dir: Option<PathBuf>,
    /// User overrides applied after the invariant option set, standard engine.
    pub std_options: EngineOptions,
    /// User overrides applied after the invariant option set, variant engine.
    pub variant_options: EngineOptions,
    /// Server base URL.
    pub endpoint: Url,
    /// Client identity block reused on every submission.
    pub client_info: ClientInfo,
    /// Use jittered-fixed backoff instead of jittered-exponential.
    pub fixed_backoff: bool,
}

/// Shared control surface the supervisor holds to stop a worker, without
/// needing to reach into the task that owns its engine sessions.
#[derive(Clone)]
pub struct WorkerHandle {
    alive: Arc<AtomicBool>,
    notify: Arc<Notify>,
    pids: Arc<Mutex<(Option<u32>, Option<u32>)>>,
}

impl WorkerHandle {
    /// Lets the in-flight job finish, reports it with `stop=true`, then
    /// exits without acquiring another.
    pub fn stop_soon(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// As [`Self::stop_soon`], but also kills both engine processes right
    /// away. The worker's current blocking engine read observes EOF and
    /// handles it through the ordinary dead-engine path; since `alive` is
    /// already false by then, it exits instead of respawning.
    pub async fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        let (std_pid, variant_pid) = *self.pids.lock().await;
        if let Some(pid) = std_pid {
            kill_pid_group(pid);
        }
        if let Some(pid) = variant_pid {
            kill_pid_group(pid);
        }
    }
}

/// Owns both engine sessions for one bucket and runs the poll/work/report
/// loop against them.
pub struct Worker {
    config: WorkerConfig,
    http: reqwest::Client,
    events: broadcast::Sender<PoolEvent>,
    progress: ProgressHandle,
    alive: Arc<AtomicBool>,
    notify: Arc<Notify>,
    pids: Arc<Mutex<(Option<u32>, Option<u32>)>>,
    censor: Censor,
    std_engine: Option<EngineSession>,
    variant_engine: Option<EngineSession>,
    std_info: Option<EngineInfo>,
    variant_info: Option<EngineInfo>,
    backoff: Backoff,
    current_job: Option<Job>,
}

impl Worker {
    /// Builds a worker and the [`WorkerHandle`] the supervisor uses to
    /// stop it later.
    pub fn new(
        config: WorkerConfig,
        http: reqwest::Client,
        events: broadcast::Sender<PoolEvent>,
        progress: ProgressHandle,
    ) -> (Self, WorkerHandle) {
        let alive = Arc::new(AtomicBool::new(true));
        let notify = Arc::new(Notify::new());
        let pids = Arc::new(Mutex::new((None, None)));
        let censor = Censor::new(Some(&config.client_info.apikey));
        let backoff = Backoff::new(config.fixed_backoff);
        let handle = WorkerHandle {
            alive: alive.clone(),
            notify: notify.clone(),
            pids: pids.clone(),
        };
        let worker = Worker {
            config,
            http,
            events,
            progress,
            alive,
            notify,
            pids,
            censor,
            std_engine: None,
            variant_engine: None,
            std_info: None,
            variant_info: None,
            backoff,
            current_job: None,
        };
        (worker, handle)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = self.censor.apply(&message.into());
        let _ = self.events.send(PoolEvent::Log { level, message });
    }

    /// Runs the outer loop until a fatal condition or `UpdateRequired`
    /// terminates it, then kills whatever engines are still running.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let result = self.run_inner().await;
        self.kill_engines().await;
        result
    }

    async fn run_inner(&mut self) -> Result<(), WorkerError> {
        loop {
            if !self.alive.load(Ordering::SeqCst) && self.current_job.is_none() {
                return Ok(());
            }
            match self.iteration().await {
                Ok(()) => {}
                Err(IterationError::UpdateRequired) => return Err(WorkerError::UpdateRequired),
                Err(IterationError::Engine(err)) => {
                    let _ = self.events.send(PoolEvent::EngineDied {
                        worker_idx: self.config.worker_idx,
                    });
                    let still_alive = self.alive.load(Ordering::SeqCst);
                    if still_alive {
                        self.log(LogLevel::Error, format!("engine died: {err}"));
                        if let Some(job) = self.current_job.take() {
                            self.abort_job(&job).await;
                        }
                        self.wait_backoff(Duration::ZERO).await;
                    } else {
                        self.current_job = None;
                    }
                    self.kill_engines().await;
                    if !still_alive {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn iteration(&mut self) -> Result<(), IterationError> {
        self.ensure_engines_started().await?;

        if self.current_job.is_none() {
            let stopping = !self.alive.load(Ordering::SeqCst);
            let envelope = self.envelope();
            let body = envelope.with_outcome(serde_json::json!({}));
            let outcome = backend::report_and_fetch(&self.http, &self.config.endpoint, "acquire", &body, stopping).await;
            match outcome {
                Err(err) => {
                    self.log(LogLevel::Warn, format!("acquire failed: {err:#}"));
                    self.wait_backoff(Duration::ZERO).await;
                    return Ok(());
                }
                Ok(PostOutcome::Job(job)) => {
                    self.backoff = Backoff::new(self.config.fixed_backoff);
                    let path = format!("{}/{}", job.work.path_prefix(), job.work.id());
                    let _ = self.events.send(PoolEvent::JobAcquired {
                        worker_idx: self.config.worker_idx,
                        path,
                    });
                    self.current_job = Some(job);
                }
                Ok(PostOutcome::NoJob) => {
                    if !stopping {
                        self.wait_backoff(Duration::ZERO).await;
                    }
                    return Ok(());
                }
                Ok(PostOutcome::UpdateRequired) => return Err(IterationError::UpdateRequired),
                Ok(PostOutcome::ServerError { status }) => {
                    self.log(LogLevel::Warn, format!("acquire: server error {status}"));
                    self.wait_backoff(Duration::ZERO).await;
                    return Ok(());
                }
                Ok(PostOutcome::ClientError { status, extra_backoff }) => {
                    self.log(LogLevel::Warn, format!("acquire: client error {status}"));
                    self.wait_backoff(extra_backoff).await;
                    return Ok(());
                }
                Ok(PostOutcome::Unexpected { status }) => {
                    self.log(LogLevel::Warn, format!("acquire: unexpected status {status}"));
                    self.wait_backoff(Duration::ZERO).await;
                    return Ok(());
                }
            }
        }

        let job = self.current_job.clone().expect("checked above");
        let outcome_json = self.execute(&job).await?;

        let path = format!("{}/{}", job.work.path_prefix(), job.work.id());
        let stopping = !self.alive.load(Ordering::SeqCst);
        let envelope = self.envelope();
        let body = envelope.with_outcome(outcome_json);
        if let Err(err) = backend::report_and_fetch(&self.http, &self.config.endpoint, &path, &body, stopping).await {
            self.log(LogLevel::Warn, format!("failed to submit {path}: {err:#}"));
        }
        let _ = self.events.send(PoolEvent::JobFinished {
            worker_idx: self.config.worker_idx,
            path,
        });
        self.current_job = None;
        Ok(())
    }

    async fn wait_backoff(&mut self, extra: Duration) {
        let duration = self.backoff.next_duration() + extra;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            client: self.config.client_info.clone(),
            yaneuraou: self.std_info.clone(),
            fairy: self.variant_info.clone(),
        }
    }

    fn engine_mut(&mut self, flavor: EngineFlavor) -> &mut EngineSession {
        match flavor {
            EngineFlavor::Yaneuraou => self.std_engine.as_mut().expect("engines started before use"),
            EngineFlavor::Fairy => self.variant_engine.as_mut().expect("engines started before use"),
        }
    }

    async fn ensure_engines_started(&mut self) -> Result<(), EngineError> {
        let std_dead = self.std_engine.as_mut().map_or(true, EngineSession::has_exited);
        let variant_dead = self.variant_engine.as_mut().map_or(true, EngineSession::has_exited);
        if !std_dead && !variant_dead {
            return Ok(());
        }
        if self.std_engine.is_some() || self.variant_engine.is_some() {
            self.kill_engines().await;
        }
        self.start_engines().await
    }

    async fn start_engines(&mut self) -> Result<(), EngineError> {
        let threads = self.config.threads;
        let memory_per_engine = self.config.memory_mib / 2;

        let mut std_engine = EngineSession::spawn(EngineKind::Std, &self.config.std_engine_cmd, self.config.engine_dir.as_deref())?;
        let mut variant_engine =
            EngineSession::spawn(EngineKind::Variant, &self.config.variant_engine_cmd, self.config.engine_dir.as_deref())?;

        let std_info = self
            .handshake(&mut std_engine, threads, memory_per_engine, &self.config.std_options.clone())
            .await?;
        let variant_info = self
            .handshake(&mut variant_engine, threads, memory_per_engine, &self.config.variant_options.clone())
            .await?;

        *self.pids.lock().await = (Some(std_engine.pid()), Some(variant_engine.pid()));
        self.std_engine = Some(std_engine);
        self.variant_engine = Some(variant_engine);
        self.std_info = Some(std_info);
        self.variant_info = Some(variant_info);

        let _ = self.events.send(PoolEvent::WorkerStarted {
            worker_idx: self.config.worker_idx,
        });
        Ok(())
    }

    async fn handshake(
        &self,
        engine: &mut EngineSession,
        threads: u32,
        memory_mib: u32,
        user_options: &EngineOptions,
    ) -> Result<EngineInfo, EngineError> {
        let (mut identity, unexpected) = engine.usi().await?;
        identity.remove("author");
        for u in unexpected {
            self.log(LogLevel::Warn, format!("unexpected usi response: {} {}", u.command, u.args));
        }

        let mut options = EngineOptions::new();

        engine.setoption("Threads", &threads.to_string()).await?;
        options.insert("Threads".to_string(), threads.to_string());
        engine.setoption("USI_Hash", &memory_mib.to_string()).await?;
        options.insert("USI_Hash".to_string(), memory_mib.to_string());

        if engine.kind() == EngineKind::Std {
            for (name, value) in [
                ("EnteringKingRule", "CSARule27H"),
                ("BookFile", "no_book"),
                ("ConsiderationMode", "true"),
                ("OutputFailLHPV", "true"),
            ] {
                engine.setoption(name, value).await?;
                options.insert(name.to_string(), value.to_string());
            }
        }

        for (name, value) in user_options {
            engine.setoption(name, value).await?;
            options.insert(name.clone(), value.clone());
        }

        let unexpected = engine.isready().await?;
        for u in unexpected {
            self.log(LogLevel::Warn, format!("unexpected isready response: {} {}", u.command, u.args));
        }

        Ok(EngineInfo { identity, options })
    }

    async fn kill_engines(&mut self) {
        if let Some(engine) = self.std_engine.take() {
            engine.kill().await;
        }
        if let Some(engine) = self.variant_engine.take() {
            engine.kill().await;
        }
        self.std_info = None;
        self.variant_info = None;
        *self.pids.lock().await = (None, None);
    }

    async fn abort_job(&mut self, job: &Job) {
        let envelope = self.envelope();
        let body = envelope.with_outcome(serde_json::json!({}));
        match backend::abort_job(&self.http, &self.config.endpoint, job.work.id(), &body).await {
            Ok(status) => self.log(LogLevel::Info, format!("aborted {}: {status}", job.work.id())),
            Err(err) => self.log(LogLevel::Warn, format!("failed to abort {}: {err:#}", job.work.id())),
        }
    }

    async fn execute(&mut self, job: &Job) -> Result<serde_json::Value, IterationError> {
        match job.work.clone() {
            Work::Analysis { multipv, .. } => self.run_analysis(job, multipv).await.map_err(Into::into),
            Work::Move { level, clock, .. } => self.run_move(job, level, clock).await.map_err(Into::into),
            Work::Puzzle { .. } => self.run_puzzle(job).await.map_err(Into::into),
        }
    }

    async fn run_move(&mut self, job: &Job, level: u8, clock: Option<Clock>) -> Result<serde_json::Value, EngineError> {
        let idx = (level.clamp(1, 8) - 1) as usize;
        let flavor = job.work.flavor();
        let threads = self.config.threads;
        let moves: Vec<String> = job.moves().into_iter().map(str::to_string).collect();

        let engine = self.engine_mut(flavor);
        let skill = shoginet_core::LVL_SKILL[idx];
        if engine.kind() == EngineKind::Variant {
            engine.setoption("Skill_Level", &skill.to_string()).await?;
        } else {
            engine.setoption("SkillLevel", &skill.max(0).to_string()).await?;
        }
        engine.setoption("MultiPV", "1").await?;
        engine.usinewgame().await?;
        engine.set_variant_options(&job.variant).await?;
        engine.isready().await?;

        let movetime = shoginet_core::movetime_ms(idx, threads) as u64;
        let depth = shoginet_core::LVL_DEPTHS[idx];
        let nodes = if engine.kind() == EngineKind::Std {
            let n = shoginet_core::LVL_NODES[idx];
            (n > 0).then_some(n)
        } else {
            None
        };

        let move_refs: Vec<&str> = moves.iter().map(String::as_str).collect();
        engine.go(&job.position, &move_refs, Some(movetime), clock, Some(depth), nodes).await?;
        let bestmove = engine.recv_bestmove().await?;
        Ok(serde_json::json!({ "move": MoveResult { bestmove } }))
    }

    async fn run_analysis(&mut self, job: &Job, multipv: Option<u32>) -> Result<serde_json::Value, EngineError> {
        let flavor = job.work.flavor();
        let moves: Vec<String> = job.moves().into_iter().map(str::to_string).collect();
        let total = moves.len();
        let nodes = job.nodes.unwrap_or(DEFAULT_ANALYSIS_NODES);

        {
            let engine = self.engine_mut(flavor);
            if engine.kind() == EngineKind::Variant {
                engine.setoption("Skill_Level", "20").await?;
                engine.setoption("USI_AnalyseMode", "true").await?;
            } else {
                engine.setoption("SkillLevel", "20").await?;
            }
            engine.setoption("MultiPV", &multipv.unwrap_or(1).to_string()).await?;
            engine.usinewgame().await?;
            engine.set_variant_options(&job.variant).await?;
            engine.isready().await?;
        }

        let mut single_plies: Vec<AnalysisPly> = Vec::new();
        let mut multi = MultiPvAnalysis::default();
        let mut last_report = tokio::time::Instant::now();

        for ply in (0..=total).rev() {
            if job.skip_positions.contains(&ply) {
                single_plies.push(AnalysisPly::Skipped { skipped: true });
                multi.time.push(Vec::new());
                multi.nodes.push(Vec::new());
                multi.score.push(Vec::new());
                multi.pv.push(Vec::new());
                continue;
            }

            let move_refs: Vec<&str> = moves[..ply].iter().map(String::as_str).collect();
            let engine = self.engine_mut(flavor);
            engine.go(&job.position, &move_refs, Some(ANALYSIS_MOVETIME_MS), None, None, Some(nodes)).await?;
            let reading = engine.recv_analysis().await?;

            if multipv.is_none() {
                single_plies.push(summarize_ply(&reading));
            } else {
                multi.score.push(reading.scores);
                multi.nodes.push(reading.nodes);
                multi.time.push(reading.times);
                multi.pv.push(reading.pvs);
            }

            if last_report.elapsed() >= PROGRESS_REPORT_INTERVAL {
                let partial = if multipv.is_none() {
                    AnalysisResult::Single(single_plies.clone())
                } else {
                    AnalysisResult::MultiPv(multi.clone())
                };
                let body = self.envelope().with_outcome(serde_json::json!({ "analysis": partial }));
                if let Ok(bytes) = serde_json::to_vec(&body) {
                    self.progress.send(job.work.id(), bytes).await;
                }
                last_report = tokio::time::Instant::now();
            }
        }

        let result = if multipv.is_none() {
            AnalysisResult::Single(single_plies)
        } else {
            AnalysisResult::MultiPv(multi)
        };
        Ok(serde_json::json!({ "analysis": result }))
    }

    async fn run_puzzle(&mut self, job: &Job) -> Result<serde_json::Value, EngineError> {
        let flavor = job.work.flavor();
        let mut moves: Vec<String> = job.moves().into_iter().map(str::to_string).collect();
        let original_len = moves.len();

        {
            let engine = self.engine_mut(flavor);
            if engine.kind() == EngineKind::Variant {
                engine.setoption("Skill_Level", "20").await?;
                engine.setoption("USI_AnalyseMode", "true").await?;
            } else {
                engine.setoption("SkillLevel", "20").await?;
            }
            engine.setoption("MultiPV", "3").await?;
            engine.usinewgame().await?;
            engine.set_variant_options(&job.variant).await?;
            engine.isready().await?;
        }

        let side_to_move_is_white = job.position.split(' ').nth(1) == Some("w");
        let mut winner_is_white = side_to_move_is_white;
        if moves.len() % 2 == 1 {
            winner_is_white = !winner_is_white;
        }
        let mut turn_is_white = winner_is_white;

        loop {
            let move_refs: Vec<&str> = moves.iter().map(String::as_str).collect();
            let engine = self.engine_mut(flavor);
            engine
                .go(&job.position, &move_refs, Some(PUZZLE_MOVETIME_MS), None, Some(PUZZLE_DEPTH), None)
                .await?;
            let reading = engine.recv_puzzle_analysis().await?;

            let stop = match reading.bestmove.as_deref() {
                None => true,
                Some("win") => true,
                Some(_) if turn_is_white == winner_is_white && shoginet_core::is_ambiguous(&reading.scores_per_pv) => true,
                _ => false,
            };
            if stop {
                break;
            }
            moves.push(reading.bestmove.expect("checked above"));
            turn_is_white = !turn_is_white;
        }

        Ok(serde_json::json!({ "puzzle": PuzzleResult { result: moves.len() > original_len } }))
    }
}

fn summarize_ply(reading: &AnalysisReading) -> AnalysisPly {
    let Some(first_pv) = reading.scores.first() else {
        return AnalysisPly::Skipped { skipped: true };
    };
    let depth = first_pv.len().saturating_sub(1);
    let Some(Some(score)) = first_pv.get(depth).cloned() else {
        return AnalysisPly::Skipped { skipped: true };
    };

    let nodes = reading.nodes.first().and_then(|row| row.get(depth).copied().flatten());
    let time = reading.times.first().and_then(|row| row.get(depth).copied().flatten());
    let nps = match (nodes, time) {
        (Some(n), Some(t)) if t > NPS_MIN_TIME_MS => Some(n * 1000 / t),
        _ => None,
    };
    let pv = reading.pvs.first().and_then(|row| row.get(depth).cloned().flatten());

    AnalysisPly::Scored {
        depth,
        score: shoginet_core::decode_score(score),
        nodes,
        time,
        nps,
        pv,
    }
}
