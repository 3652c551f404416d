use serde::{Deserialize, Serialize};

/// Which of the two managed engines a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFlavor {
    /// The standard engine (YaneuraOu).
    Yaneuraou,
    /// The variant-capable engine (Fairy-Stockfish).
    Fairy,
}

impl Default for EngineFlavor {
    fn default() -> Self {
        EngineFlavor::Yaneuraou
    }
}

/// Clock state attached to a `move` job, in the units the server sends
/// (seconds for `btime`/`wtime`/`byo`, whole seconds for `inc`). The
/// engine session multiplies these into USI centisecond/millisecond units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// Black (sente) remaining time, seconds.
    pub btime: i64,
    /// White (gote) remaining time, seconds.
    pub wtime: i64,
    /// Byoyomi, seconds.
    pub byo: i64,
    /// Increment, seconds.
    pub inc: i64,
}

/// The server's job-type discriminant and its type-specific fields,
/// mirroring the `work` object nested in the job JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Work {
    /// Deep analysis of a sequence of plies.
    Analysis {
        /// Job identifier.
        id: String,
        /// Which engine to use.
        #[serde(default)]
        flavor: EngineFlavor,
        /// Requested number of tracked PV lines; absent means single-PV
        /// summarized output.
        #[serde(default)]
        multipv: Option<u32>,
    },
    /// A single best-move request at a given skill level.
    Move {
        /// Job identifier.
        id: String,
        /// Skill level, `1..=8`.
        level: u8,
        /// Which engine to use.
        #[serde(default)]
        flavor: EngineFlavor,
        /// Remaining clock, if this is a live game move.
        #[serde(default)]
        clock: Option<Clock>,
    },
    /// A tactics-puzzle candidate search.
    Puzzle {
        /// Job identifier.
        id: String,
        /// Which engine to use.
        #[serde(default)]
        flavor: EngineFlavor,
    },
}

impl Work {
    /// The job identifier, regardless of kind.
    pub fn id(&self) -> &str {
        match self {
            Work::Analysis { id, .. } | Work::Move { id, .. } | Work::Puzzle { id, .. } => id,
        }
    }

    /// Which engine this job is routed to.
    pub fn flavor(&self) -> EngineFlavor {
        match self {
            Work::Analysis { flavor, .. } | Work::Move { flavor, .. } | Work::Puzzle { flavor, .. } => {
                *flavor
            }
        }
    }

    /// The submission path segment for this job kind (`analysis`, `move`,
    /// `puzzle`), to be joined with `/` and the id.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Work::Analysis { .. } => "analysis",
            Work::Move { .. } => "move",
            Work::Puzzle { .. } => "puzzle",
        }
    }
}

fn default_variant() -> String {
    "standard".to_string()
}

/// A job fetched from the server: the `work` discriminant plus the
/// engine-format position/move list it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The job-type discriminant and its fields.
    pub work: Work,
    /// Engine-format position string (e.g. an SFEN).
    pub position: String,
    /// Space-joined move list applied on top of `position`.
    #[serde(default)]
    pub moves: String,
    /// Shogi variant name; `"standard"` unless stated otherwise.
    #[serde(default = "default_variant")]
    pub variant: String,
    /// Opaque game identifier, present for live-game move requests.
    #[serde(default)]
    pub game_id: Option<String>,
    /// Ply indices (0-based, counted from the starting position) to skip
    /// during analysis.
    #[serde(default, rename = "skipPositions")]
    pub skip_positions: Vec<usize>,
    /// Node cap override; absent means the analysis default applies.
    #[serde(default)]
    pub nodes: Option<u64>,
}

impl Job {
    /// The move list, split on whitespace.
    pub fn moves(&self) -> Vec<&str> {
        self.moves.split_whitespace().collect()
    }
}

/// A parsed `variant` value normalized for [`super::AnalysisTables`]-style
/// dispatch: anything other than `"standard"` is variant-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Standard shogi.
    Standard,
    /// Any non-standard variant.
    Other,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("standard") {
            Variant::Standard
        } else {
            Variant::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_job_without_multipv_parses() {
        let raw = r#"{
            "work": {"type": "analysis", "id": "j1"},
            "position": "start",
            "moves": "7g7f 3c3d"
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert_eq!(job.work.id(), "j1");
        assert_eq!(job.work.flavor(), EngineFlavor::Yaneuraou);
        assert_eq!(job.moves(), vec!["7g7f", "3c3d"]);
        assert_eq!(job.variant, "standard");
    }

    #[test]
    fn move_job_with_clock_parses() {
        let raw = r#"{
            "work": {"type": "move", "id": "j2", "level": 5, "flavor": "fairy",
                      "clock": {"btime": 60, "wtime": 60, "byo": 10, "inc": 0}},
            "position": "start",
            "moves": ""
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        match &job.work {
            Work::Move { level, flavor, clock, .. } => {
                assert_eq!(*level, 5);
                assert_eq!(*flavor, EngineFlavor::Fairy);
                assert_eq!(clock.unwrap().byo, 10);
            }
            _ => panic!("expected Move"),
        }
    }
}
