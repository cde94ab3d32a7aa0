//! Label-relative time bins and the per-subject sliding window that keeps
//! counts in the right bin as prediction time moves forward.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{Duration, NaiveDateTime};

use crate::event::ColumnValue;
use crate::featurizer::FeaturizerError;

/// One edge of a time bin layout, measured backwards from the prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBinEdge {
    Within(Duration),
    /// Must come last. Emits the tail bin holding everything older than the
    /// largest bounded edge.
    Unbounded,
}

/// Validated, ascending set of bin edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBins {
    edges: Vec<Duration>,
    open_tail: bool,
}

impl TimeBins {
    pub fn new(edges: &[TimeBinEdge]) -> Result<Self, FeaturizerError> {
        if edges.is_empty() {
            return Err(FeaturizerError::InvalidConfig(
                "time_bins must contain at least one edge".to_string(),
            ));
        }

        let mut bounded = Vec::with_capacity(edges.len());
        let mut seen = BTreeSet::new();
        let mut open_tail = false;
        for (position, edge) in edges.iter().enumerate() {
            match edge {
                TimeBinEdge::Unbounded if position + 1 != edges.len() => {
                    return Err(FeaturizerError::InvalidConfig(
                        "unbounded time bin edge must be last".to_string(),
                    ));
                }
                TimeBinEdge::Unbounded => open_tail = true,
                TimeBinEdge::Within(duration) => {
                    if *duration < Duration::zero() {
                        return Err(FeaturizerError::InvalidConfig(format!(
                            "time bin edges must be non-negative, got {}",
                            format_edge(*duration)
                        )));
                    }
                    if !seen.insert(*duration) {
                        return Err(FeaturizerError::DuplicateTimeBin(format_edge(*duration)));
                    }
                    bounded.push(*duration);
                }
            }
        }
        bounded.sort();

        Ok(Self {
            edges: bounded,
            open_tail,
        })
    }

    /// Bounded edges, ascending.
    pub fn edges(&self) -> &[Duration] {
        &self.edges
    }

    pub fn has_open_tail(&self) -> bool {
        self.open_tail
    }

    /// Bins tracked per subject, including the tail.
    pub fn tracked_bins(&self) -> usize {
        self.edges.len() + 1
    }

    /// Bins that contribute columns to the output vector.
    pub fn emitted_bins(&self) -> usize {
        self.edges.len() + usize::from(self.open_tail)
    }

    /// Column-name suffix for `bin`, e.g. `_90d`, or `_open` for the tail.
    pub fn bin_suffix(&self, bin: usize) -> String {
        match self.edges.get(bin) {
            Some(edge) => format!("_{}", format_edge(*edge)),
            None => "_open".to_string(),
        }
    }
}

pub(crate) fn format_edge(edge: Duration) -> String {
    let seconds = edge.num_seconds();
    if seconds % 86_400 == 0 {
        format!("{}d", seconds / 86_400)
    } else if seconds % 3_600 == 0 {
        format!("{}h", seconds / 3_600)
    } else {
        format!("{seconds}s")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BinEntry {
    column: usize,
    time: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
struct Bin {
    /// Chronological, oldest at the front.
    queue: VecDeque<BinEntry>,
    counts: BTreeMap<usize, u32>,
}

impl Bin {
    fn increment(&mut self, column: usize) {
        *self.counts.entry(column).or_insert(0) += 1;
    }

    fn decrement(&mut self, column: usize) {
        if let Some(count) = self.counts.get_mut(&column) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&column);
            }
        }
    }
}

/// Per-subject counts split across time bins.
///
/// Every observation enters bin 0. [`TimeBinWindow::advance`] relocates
/// observations that have become older than a bin's edge into the next bin.
/// Observations only ever move to farther bins, and since they arrive in
/// time order only queue heads need checking.
#[derive(Debug, Clone)]
pub struct TimeBinWindow<'a> {
    layout: &'a TimeBins,
    bins: Vec<Bin>,
    base_columns: usize,
}

impl<'a> TimeBinWindow<'a> {
    pub fn new(layout: &'a TimeBins, base_columns: usize) -> Self {
        Self {
            layout,
            bins: vec![Bin::default(); layout.tracked_bins()],
            base_columns,
        }
    }

    pub fn observe(&mut self, column: usize, time: NaiveDateTime) {
        let closest = &mut self.bins[0];
        closest.queue.push_back(BinEntry { column, time });
        closest.increment(column);
    }

    /// Counts an event without a time. It stays in bin 0 for every label.
    pub fn observe_timeless(&mut self, column: usize) {
        self.bins[0].increment(column);
    }

    pub fn advance(&mut self, prediction_time: NaiveDateTime) {
        for (index, edge) in self.layout.edges().iter().enumerate() {
            let Some(cutoff) = prediction_time.checked_sub_signed(*edge) else {
                continue;
            };
            let (near, far) = self.bins.split_at_mut(index + 1);
            let (from, to) = (&mut near[index], &mut far[0]);
            while let Some(head) = from.queue.front().copied() {
                if head.time >= cutoff {
                    break;
                }
                from.queue.pop_front();
                from.decrement(head.column);
                to.queue.push_back(head);
                to.increment(head.column);
            }
        }
    }

    /// Non-zero counts of every emitted bin, ordered by bin then column.
    pub fn snapshot(&self) -> Vec<ColumnValue> {
        self.bins
            .iter()
            .take(self.layout.emitted_bins())
            .enumerate()
            .flat_map(|(bin, slot)| {
                let offset = bin * self.base_columns;
                slot.counts
                    .iter()
                    .map(move |(column, count)| ColumnValue::new(column + offset, f64::from(*count)))
            })
            .collect()
    }

    /// Count of `column` in `bin`, zero when absent.
    pub fn count(&self, bin: usize, column: usize) -> u32 {
        self.bins
            .get(bin)
            .and_then(|slot| slot.counts.get(&column))
            .copied()
            .unwrap_or(0)
    }

    pub fn queued(&self, bin: usize) -> usize {
        self.bins.get(bin).map_or(0, |slot| slot.queue.len())
    }
}
