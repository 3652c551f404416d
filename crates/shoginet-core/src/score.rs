use serde::{Deserialize, Serialize};

const MATE_BASE: i64 = 102_000;
const CP_CLAMP: i64 = 100_000;

/// A decoded engine score: either a centipawn evaluation or a mate distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    /// Centipawn evaluation, clamped to `[-100000, 100000]`.
    Cp {
        /// Centipawns from the side-to-move's perspective.
        cp: i64,
    },
    /// Mate in `n` plies (negative `n` means the side to move is mated).
    Mate {
        /// Plies to mate; negative when the side to move is losing.
        mate: i64,
    },
}

/// Encodes a raw USI `score cp <v>` or `score mate <v>` token into the
/// single-integer wire representation.
pub fn encode_score(kind: &str, value: i64) -> i64 {
    if kind == "mate" {
        if value > 0 {
            MATE_BASE - value
        } else {
            -MATE_BASE - value
        }
    } else {
        value.clamp(-CP_CLAMP, CP_CLAMP)
    }
}

/// Inverts [`encode_score`].
pub fn decode_score(score: i64) -> Score {
    if score > CP_CLAMP {
        Score::Mate {
            mate: MATE_BASE - score,
        }
    } else if score < -CP_CLAMP {
        Score::Mate {
            mate: -MATE_BASE - score,
        }
    } else {
        Score::Cp { cp: score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp_round_trips_across_full_range() {
        for cp in -100_000..=100_000 {
            assert_eq!(decode_score(encode_score("cp", cp)), Score::Cp { cp });
        }
    }

    #[test]
    fn mate_round_trips_for_plausible_distances() {
        for n in 1..=2000 {
            assert_eq!(
                decode_score(encode_score("mate", n)),
                Score::Mate { mate: n }
            );
            assert_eq!(
                decode_score(encode_score("mate", -n)),
                Score::Mate { mate: -n }
            );
        }
    }

    #[test]
    fn cp_clamps_outside_bounds() {
        assert_eq!(encode_score("cp", 100_001), 100_000);
        assert_eq!(encode_score("cp", -100_001), -100_000);
    }
}
