//! Renders [`PoolEvent`] to stdout the way the reference implementation's
//! `CollapsingLogHandler`/`TailLogHandler` render its `logging` records,
//! without the library crate ever touching stdout itself.

use std::collections::VecDeque;

use shoginet_pool::{LogLevel, PoolEvent};

/// Size of the [`original logger.py`]'s `TailLogHandler` ring: the last
/// this-many sub-`Error` lines are replayed whenever an `Error` line
/// arrives, so a failure shows the context that led to it.
const TAIL_CAPACITY: usize = 35;

/// Stateful stdout renderer for one pool run.
pub struct EventLogger {
    collapse: bool,
    last_was_progress: bool,
    last_len: usize,
    tail: VecDeque<String>,
}

impl EventLogger {
    /// `collapse` enables the single-line progress renderer (used only
    /// when stdout is a terminal and `--no-collapse` was not passed).
    pub fn new(collapse: bool) -> Self {
        EventLogger {
            collapse,
            last_was_progress: false,
            last_len: 0,
            tail: VecDeque::with_capacity(TAIL_CAPACITY),
        }
    }

    /// Renders one event, updating collapse/tail state.
    pub fn handle(&mut self, worker_idx: Option<usize>, event: &PoolEvent) {
        match event {
            PoolEvent::Started => self.emit(LogLevel::Info, "shoginet pool started".to_string()),
            PoolEvent::StopRequested => self.emit(LogLevel::Info, "stop requested".to_string()),
            PoolEvent::WorkerStarted { worker_idx } => {
                self.emit(LogLevel::Info, format!("worker {worker_idx}: engines started"))
            }
            PoolEvent::JobAcquired { worker_idx, path } => {
                self.emit(LogLevel::Info, format!("worker {worker_idx}: acquired {path}"))
            }
            PoolEvent::JobFinished { worker_idx, path } => {
                self.emit(LogLevel::Info, format!("worker {worker_idx}: finished {path}"))
            }
            PoolEvent::EngineDied { worker_idx } => {
                self.emit(LogLevel::Error, format!("worker {worker_idx}: engine died, respawning"))
            }
            PoolEvent::Log { level, message } => {
                let message = match worker_idx {
                    Some(idx) => format!("worker {idx}: {message}"),
                    None => message.clone(),
                };
                self.emit(*level, message);
            }
            PoolEvent::Stopped => self.emit(LogLevel::Info, "shoginet pool stopped".to_string()),
        }
    }

    fn emit(&mut self, level: LogLevel, message: String) {
        if matches!(level, LogLevel::Engine | LogLevel::Debug) {
            self.push_tail(level, &message);
            return;
        }
        if level == LogLevel::Error {
            self.flush_tail();
        }
        self.print(level, &message);
    }

    fn push_tail(&mut self, level: LogLevel, message: &str) {
        if self.tail.len() == TAIL_CAPACITY {
            self.tail.pop_front();
        }
        self.tail.push_back(format!("{}: {message}", label(level)));
    }

    fn flush_tail(&mut self) {
        for line in self.tail.drain(..) {
            self.print_line(&line);
        }
    }

    fn print(&mut self, level: LogLevel, message: &str) {
        let line = if level == LogLevel::Info {
            message.to_string()
        } else {
            format!("{}: {message}", label(level))
        };

        if !self.collapse {
            self.print_line(&line);
            return;
        }

        if level == LogLevel::Progress {
            print!("\r{:<width$}", line, width = self.last_len);
            self.last_len = self.last_len.max(line.len());
            self.last_was_progress = true;
        } else {
            if self.last_was_progress {
                println!();
            }
            self.last_len = 0;
            self.last_was_progress = false;
            println!("{line}");
        }
        use std::io::Write as _;
        let _ = std::io::stdout().flush();
    }

    fn print_line(&mut self, line: &str) {
        if self.last_was_progress {
            println!();
            self.last_was_progress = false;
            self.last_len = 0;
        }
        println!("{line}");
    }
}

fn label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Engine => "ENGINE",
        LogLevel::Progress => "PROGRESS",
        LogLevel::Debug => "DEBUG",
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
    }
}
