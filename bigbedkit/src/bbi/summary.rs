//! Whole-file coverage statistics for bigBed data.

use std::collections::BTreeMap;

use crate::bbi::Summary;

/// Accumulates runs of constant coverage depth.
#[derive(Copy, Clone, Debug)]
struct RunAccumulator {
    summary: Summary,
}

impl RunAccumulator {
    fn new() -> Self {
        RunAccumulator {
            summary: Summary {
                bases_covered: 0,
                min_val: f64::MAX,
                max_val: -f64::MAX,
                sum: 0.0,
                sum_squares: 0.0,
            },
        }
    }

    fn add_run(&mut self, length: u64, depth: i64) {
        if length == 0 || depth <= 0 {
            return;
        }
        let depth = depth as f64;
        let s = &mut self.summary;
        s.bases_covered += length;
        s.sum += length as f64 * depth;
        s.sum_squares += length as f64 * depth * depth;
        s.min_val = s.min_val.min(depth);
        s.max_val = s.max_val.max(depth);
    }

    fn finish(self) -> Summary {
        if self.summary.bases_covered == 0 {
            Summary::default()
        } else {
            self.summary
        }
    }
}

/// Computes the coverage summary of a set of `(chrom, start, end)` intervals.
///
/// Every position covered by at least one interval contributes its depth
/// (the number of intervals covering it): `bases_covered` counts covered
/// bases, `sum` and `sum_squares` sum the depth and squared depth over them,
/// and `min_val`/`max_val` are the extreme nonzero depths. The result does not
/// depend on the order of the intervals. With no covered bases, every field is zero.
pub fn coverage_summary(intervals: impl IntoIterator<Item = (u32, u32, u32)>) -> Summary {
    // Events are at 1-based positions: coverage starts at start + 1 and ends at end + 1.
    let mut events: BTreeMap<u32, Vec<(u64, i64)>> = BTreeMap::new();
    for (chrom, start, end) in intervals {
        let chrom_events = events.entry(chrom).or_default();
        chrom_events.push((u64::from(start) + 1, 1));
        chrom_events.push((u64::from(end) + 1, -1));
    }

    let mut accumulator = RunAccumulator::new();
    for (_, mut chrom_events) in events {
        chrom_events.sort_unstable();
        let mut depth = 0i64;
        let mut last_pos = 0u64;
        for (pos, delta) in chrom_events {
            if pos != last_pos {
                accumulator.add_run(pos - last_pos, depth);
                last_pos = pos;
            }
            depth += delta;
        }
    }
    accumulator.finish()
}
