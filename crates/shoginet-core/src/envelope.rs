use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The client-identity block attached to every outbound POST body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client version string.
    pub version: String,
    /// Runtime identifier (e.g. the Rust compiler/toolchain version).
    pub runtime: String,
    /// API key; censored by [`crate::Censor`] wherever it reaches a log,
    /// but sent in full here — this is the one legitimate place it's used.
    pub apikey: String,
}

/// `usi()` identity info for one started engine, plus the options that were
/// applied to it (invariant set + user overrides), for server-side display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineInfo {
    /// `id name`/`id author` (author is stripped before this is built) and
    /// any other fields the engine reported during the `usi` handshake.
    #[serde(flatten)]
    pub identity: BTreeMap<String, String>,
    /// The full set of options applied at startup, invariant and
    /// user-overridden alike.
    pub options: BTreeMap<String, String>,
}

/// Envelope `{ client, yaneuraou, fairy }` attached to every outbound job
/// submission, matching the reference implementation's request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Client identity block.
    pub client: ClientInfo,
    /// Standard-engine identity/options, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaneuraou: Option<EngineInfo>,
    /// Variant-engine identity/options, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fairy: Option<EngineInfo>,
}

impl Envelope {
    /// Serializes the envelope and merges `outcome` (itself a JSON object,
    /// e.g. `{"move": {...}}`) into it, producing the final submission
    /// body. Mirrors the reference client's pattern of starting from the
    /// envelope dict and assigning the outcome-specific key into it.
    pub fn with_outcome(&self, outcome: serde_json::Value) -> serde_json::Value {
        let mut body = serde_json::to_value(self).expect("Envelope always serializes");
        if let (Some(body_map), serde_json::Value::Object(outcome_map)) =
            (body.as_object_mut(), outcome)
        {
            body_map.extend(outcome_map);
        }
        body
    }
}

/// One ply of single-PV analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisPly {
    /// The ply was in `skipPositions` and was not analysed.
    Skipped {
        /// Always `true`.
        skipped: bool,
    },
    /// The ply was analysed to the given depth.
    Scored {
        /// Deepest depth reached on the first (or only) PV line.
        depth: usize,
        /// Decoded score at that depth.
        score: crate::Score,
        /// Node count at that depth, if the engine reported one.
        #[serde(skip_serializing_if = "Option::is_none")]
        nodes: Option<u64>,
        /// Time (ms) at that depth, if the engine reported one.
        #[serde(skip_serializing_if = "Option::is_none")]
        time: Option<u64>,
        /// Nodes-per-second, computed only when `time > 200ms`.
        #[serde(skip_serializing_if = "Option::is_none")]
        nps: Option<u64>,
        /// Principal variation at that depth, if reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        pv: Option<String>,
    },
}

/// The four-array multi-PV analysis payload, one entry per ply, each
/// itself `[multipv-1][depth]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiPvAnalysis {
    /// Time table per ply.
    pub time: Vec<Vec<Vec<Option<u64>>>>,
    /// Nodes table per ply.
    pub nodes: Vec<Vec<Vec<Option<u64>>>>,
    /// Score table per ply (raw encoded integers, decoded client-side).
    pub score: Vec<Vec<Vec<Option<i64>>>>,
    /// PV table per ply.
    pub pv: Vec<Vec<Vec<Option<String>>>>,
}

/// The `analysis` result payload: either per-ply summaries (no `multipv`
/// requested) or the raw four-array multi-PV tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    /// Single-PV summarized output, one entry per ply.
    Single(Vec<AnalysisPly>),
    /// Raw multi-PV ragged tables.
    MultiPv(MultiPvAnalysis),
}

/// The `move` job result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveResult {
    /// The chosen move, or `None` if the engine reported `(none)`/`resign`.
    pub bestmove: Option<String>,
}

/// The `puzzle` job result payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PuzzleResult {
    /// Whether the candidate sequence grew beyond the original puzzle
    /// (i.e. a puzzle was found).
    pub result: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_outcome_merges_move_result() {
        let env = Envelope {
            client: ClientInfo {
                version: "1.0.0".into(),
                runtime: "rustc".into(),
                apikey: "secret".into(),
            },
            yaneuraou: None,
            fairy: None,
        };
        let outcome = serde_json::to_value(serde_json::json!({
            "move": MoveResult { bestmove: Some("7g7f".into()) }
        }))
        .unwrap();
        let merged = env.with_outcome(outcome);
        assert_eq!(merged["move"]["bestmove"], "7g7f");
        assert_eq!(merged["client"]["apikey"], "secret");
    }
}
