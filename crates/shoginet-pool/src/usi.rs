//! Engine session (spec §4.A): owns one engine subprocess and speaks the
//! USI line protocol against it.

use std::collections::BTreeMap;
use std::process::Stdio;

use shoginet_core::{AnalysisTables, Clock, Variant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

/// Which of the two managed engines a session represents. Only `Variant`
/// sessions accept `USI_Variant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// The standard engine (no `USI_Variant` support).
    Std,
    /// The variant-capable engine.
    Variant,
}

impl EngineKind {
    /// Short name used in log lines, matching the reference's
    /// `"yaneuraou"`/`"fairy"` session names.
    pub fn label(self) -> &'static str {
        match self {
            EngineKind::Std => "yaneuraou",
            EngineKind::Variant => "fairy",
        }
    }
}

/// Failure reading or writing a session. Any of these is a "dead engine"
/// condition at the worker layer (spec §4.A "Failure semantics").
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level I/O failure (broken pipe, spawn failure, ...).
    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The child closed its stdout.
    #[error("engine closed stdout (EOF)")]
    Eof,
}

/// A response line the session did not expect in the current context.
/// Logged as a warning; execution continues (error kind 4 in spec §7).
#[derive(Debug, Clone)]
pub struct UnexpectedResponse {
    /// The USI command token.
    pub command: String,
    /// The remainder of the line.
    pub args: String,
}

/// Result of [`EngineSession::recv_analysis`].
#[derive(Debug, Clone, Default)]
pub struct AnalysisReading {
    /// Score table, `[multipv-1][depth]`.
    pub scores: Vec<Vec<Option<i64>>>,
    /// Nodes table, `[multipv-1][depth]`.
    pub nodes: Vec<Vec<Option<u64>>>,
    /// Time table, `[multipv-1][depth]`.
    pub times: Vec<Vec<Option<u64>>>,
    /// PV table, `[multipv-1][depth]`.
    pub pvs: Vec<Vec<Option<String>>>,
}

/// Result of [`EngineSession::recv_puzzle_analysis`].
#[derive(Debug, Clone, Default)]
pub struct PuzzleReading {
    /// The chosen move, or `None`/`"(none)"`/`"resign"`.
    pub bestmove: Option<String>,
    /// Final score per tracked PV line, in `multipv` order.
    pub scores_per_pv: Vec<i64>,
}

/// Owns one engine child process: stdin/stdout line-buffered text, stderr
/// merged into the same logical stream, isolated into its own process
/// group so parent signals never reach it.
pub struct EngineSession {
    kind: EngineKind,
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
    pub(crate) pid: u32,
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::UnboundedSender<std::io::Result<String>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(Ok(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    return;
                }
            }
        }
    });
}

impl EngineSession {
    /// Spawns the engine with stdin/stdout piped and stderr merged into
    /// the same logical line stream, in a new process group so the
    /// parent's signals do not reach it.
    pub fn spawn(kind: EngineKind, command: &str, cwd: Option<&std::path::Path>) -> std::io::Result<Self> {
        let mut cmd = build_shell_command(command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_line_reader(stdout, tx.clone());
        spawn_line_reader(stderr, tx);

        Ok(EngineSession {
            kind,
            child,
            stdin,
            lines: rx,
            pid,
        })
    }

    /// Whether the child has already exited (used by the worker's
    /// `start_engines` to decide whether to respawn).
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    /// Which engine this session is (`Std`/`Variant`).
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// The OS process id, so the supervisor can kill the process group
    /// from outside the worker task on an immediate `stop()`.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    async fn send(&mut self, line: &str) -> Result<(), EngineError> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, EngineError> {
        loop {
            let line = match self.lines.recv().await {
                Some(Ok(line)) => line,
                Some(Err(err)) => return Err(EngineError::Io(err)),
                None => return Err(EngineError::Eof),
            };
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    async fn recv_usi(&mut self) -> Result<(String, String), EngineError> {
        let line = self.recv().await?;
        match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => Ok((cmd.to_string(), rest.trim_start().to_string())),
            None => Ok((line, String::new())),
        }
    }

    /// Sends `usi`, reads until `usiok`. Collects `id <name> <value>`
    /// pairs into a map; ignores `option ...` lines; unexpected lines are
    /// returned for the caller to log.
    pub async fn usi(&mut self) -> Result<(BTreeMap<String, String>, Vec<UnexpectedResponse>), EngineError> {
        self.send("usi").await?;
        let mut info = BTreeMap::new();
        let mut unexpected = Vec::new();
        loop {
            let (command, arg) = self.recv_usi().await?;
            match command.as_str() {
                "usiok" => return Ok((info, unexpected)),
                "id" => {
                    if let Some((name, value)) = arg.split_once(char::is_whitespace) {
                        info.insert(name.to_string(), value.trim_start().to_string());
                    }
                }
                "option" | "Fairy-Stockfish" => {}
                _ => unexpected.push(UnexpectedResponse { command, args: arg }),
            }
        }
    }

    /// Sends `isready`, reads until `readyok`. `info string ...` lines
    /// are tolerated silently.
    pub async fn isready(&mut self) -> Result<Vec<UnexpectedResponse>, EngineError> {
        self.send("isready").await?;
        let mut unexpected = Vec::new();
        loop {
            let (command, arg) = self.recv_usi().await?;
            match command.as_str() {
                "readyok" => return Ok(unexpected),
                "info" if arg.starts_with("string ") => {}
                _ => unexpected.push(UnexpectedResponse { command, args: arg }),
            }
        }
    }

    /// Sends `setoption name <name> value <value>`. Booleans render as
    /// `true`/`false`.
    pub async fn setoption(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.send(&format!("setoption name {name} value {value}")).await
    }

    /// On the variant-capable session only, issues `setoption name
    /// USI_Variant value <v>` (`"standard"` maps to `"shogi"`). A no-op
    /// on the standard session.
    pub async fn set_variant_options(&mut self, variant: &str) -> Result<(), EngineError> {
        if self.kind != EngineKind::Variant {
            return Ok(());
        }
        let value = match Variant::from(variant) {
            Variant::Standard => "shogi",
            Variant::Other => variant,
        };
        self.setoption("USI_Variant", value).await
    }

    /// Sends `usinewgame`.
    pub async fn usinewgame(&mut self) -> Result<(), EngineError> {
        self.send("usinewgame").await
    }

    /// Sends `position sfen <pos> moves ...` then `go` with whichever
    /// bounds are supplied.
    #[allow(clippy::too_many_arguments)]
    pub async fn go(
        &mut self,
        position: &str,
        moves: &[&str],
        movetime: Option<u64>,
        clock: Option<Clock>,
        depth: Option<u32>,
        nodes: Option<u64>,
    ) -> Result<(), EngineError> {
        self.send(&format!("position sfen {position} moves {}", moves.join(" ")))
            .await?;

        let mut builder = vec!["go".to_string()];
        if let Some(movetime) = movetime {
            builder.push("movetime".into());
            builder.push(movetime.to_string());
        }
        if let Some(nodes) = nodes {
            builder.push("nodes".into());
            builder.push(nodes.to_string());
        }
        if let Some(depth) = depth {
            builder.push("depth".into());
            builder.push(depth.to_string());
        }
        if let Some(clock) = clock {
            builder.push("btime".into());
            builder.push((clock.btime * 10).to_string());
            builder.push("wtime".into());
            builder.push((clock.wtime * 10).to_string());
            builder.push("byoyomi".into());
            builder.push((clock.byo * 1000).to_string());
            if clock.inc > 0 {
                builder.push("binc".into());
                builder.push((clock.inc * 1000).to_string());
                builder.push("winc".into());
                builder.push((clock.inc * 1000).to_string());
            }
        }

        self.send(&builder.join(" ")).await
    }

    /// Reads `info` lines (ignored) until `bestmove`; returns the move
    /// token, or `None` when the engine reports `(none)`/`resign`.
    pub async fn recv_bestmove(&mut self) -> Result<Option<String>, EngineError> {
        loop {
            let (command, arg) = self.recv_usi().await?;
            if command == "bestmove" {
                let token = arg.split_whitespace().next().unwrap_or_default();
                return Ok(match token {
                    "" | "(none)" | "resign" => None,
                    move_token => Some(move_token.to_string()),
                });
            }
            // info lines (and anything else) are ignored while waiting for bestmove.
        }
    }

    /// Reads until `bestmove`, maintaining the four ragged `info` tables
    /// (spec §3).
    pub async fn recv_analysis(&mut self) -> Result<AnalysisReading, EngineError> {
        let mut tables = AnalysisTables::new();
        loop {
            let (command, arg) = self.recv_usi().await?;
            if command == "bestmove" {
                return Ok(AnalysisReading {
                    scores: tables.scores(),
                    nodes: tables.nodes(),
                    times: tables.times(),
                    pvs: tables.pvs(),
                });
            }
            if command == "info" {
                parse_info_line(&arg, &mut tables);
            }
        }
    }

    /// Like [`Self::recv_analysis`] but collapsed to `(bestmove,
    /// scores_per_pv)`, for the puzzle job's per-iteration reads.
    pub async fn recv_puzzle_analysis(&mut self) -> Result<PuzzleReading, EngineError> {
        let mut tables = AnalysisTables::new();
        loop {
            let (command, arg) = self.recv_usi().await?;
            if command == "bestmove" {
                let token = arg.split_whitespace().next().unwrap_or_default();
                let bestmove = match token {
                    "" | "(none)" => None,
                    other => Some(other.to_string()),
                };
                return Ok(PuzzleReading {
                    bestmove,
                    scores_per_pv: tables.final_scores_per_pv(),
                });
            }
            if command == "info" {
                parse_info_line(&arg, &mut tables);
            }
        }
    }

    /// Destroys the child: sends a group kill and drains the stdout pipe
    /// to avoid leaving a zombie behind.
    pub async fn kill(mut self) {
        kill_process_group(self.pid);
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

/// Parses one `info ...` argument string into the running tables,
/// matching the reference client's token scanner.
fn parse_info_line(arg: &str, tables: &mut AnalysisTables) {
    let tokens: Vec<&str> = arg.split(' ').collect();
    let mut multipv = 1usize;
    let mut depth: Option<usize> = None;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "multipv" => {
                if let Some(v) = tokens.get(i + 1).and_then(|s| s.parse::<usize>().ok()) {
                    multipv = v;
                }
                i += 2;
            }
            "depth" => {
                if let Some(v) = tokens.get(i + 1).and_then(|s| s.parse::<usize>().ok()) {
                    depth = Some(v);
                }
                i += 2;
            }
            "nodes" => {
                if let Some(v) = tokens.get(i + 1).and_then(|s| s.parse::<u64>().ok()) {
                    tables.set_nodes(multipv, depth, v);
                }
                i += 2;
            }
            "time" => {
                if let Some(v) = tokens.get(i + 1).and_then(|s| s.parse::<u64>().ok()) {
                    tables.set_time(multipv, depth, v);
                }
                i += 2;
            }
            "score" => {
                let kind = tokens.get(i + 1).copied().unwrap_or("cp");
                let raw = tokens.get(i + 2).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
                let value = shoginet_core::encode_score(kind, raw);
                let mut j = i + 3;
                let is_bound = matches!(tokens.get(j), Some(&"lowerbound") | Some(&"upperbound"));
                if is_bound {
                    j += 1;
                }
                tables.set_score(multipv, depth, value, is_bound);
                i = j;
            }
            "pv" => {
                let pv = tokens[i + 1..].join(" ");
                tables.set_pv(multipv, depth, pv);
                break;
            }
            _ => {
                i += 1;
            }
        }
    }
}

#[cfg(unix)]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt as _;
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt as _;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Kills a process group by pid from outside its owning [`EngineSession`].
/// Used by the supervisor to implement an immediate (non-graceful) stop:
/// the worker's blocked read then observes EOF and handles it as the
/// ordinary dead-engine case.
pub(crate) fn kill_pid_group(pid: u32) {
    kill_process_group(pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_pv_info_line() {
        let mut tables = AnalysisTables::new();
        parse_info_line(
            "depth 12 score cp 80 multipv 1 nodes 12345 time 900 pv 7g7f 3c3d",
            &mut tables,
        );
        assert_eq!(tables.score_at(1, 12), Some(80));
        assert_eq!(tables.nodes_at(1, 12), Some(12345));
        assert_eq!(tables.time_at(1, 12), Some(900));
        assert_eq!(tables.pv_at(1, 12), Some("7g7f 3c3d"));
    }

    #[test]
    fn parses_mate_score() {
        let mut tables = AnalysisTables::new();
        parse_info_line("depth 5 score mate 3 multipv 1", &mut tables);
        assert_eq!(tables.score_at(1, 5), Some(102_000 - 3));
    }

    #[test]
    fn bound_score_is_flagged_and_overwritable() {
        let mut tables = AnalysisTables::new();
        parse_info_line("depth 4 score cp 10 lowerbound multipv 1", &mut tables);
        parse_info_line("depth 4 score cp 20 multipv 1", &mut tables);
        assert_eq!(tables.score_at(1, 4), Some(20));
    }

    #[test]
    fn second_pv_line_is_independent() {
        let mut tables = AnalysisTables::new();
        parse_info_line("depth 6 score cp 10 multipv 2", &mut tables);
        assert_eq!(tables.score_at(1, 6), None);
        assert_eq!(tables.score_at(2, 6), Some(10));
    }
}
