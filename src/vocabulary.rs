//! Column vocabulary for count features and the builder that merges
//! per-partition preprocessing summaries into it.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::featurizer::FeaturizerError;
use crate::reservoir::ReservoirSampler;

/// Quantile points used for numeric brackets: `i * 0.1` for `i` in 1..=9.
const DECILE_COUNT: usize = 10;

/// Summary produced by one partition during preprocessing.
#[derive(Debug, Clone, Default)]
pub struct CountPreprocessState {
    pub observed_codes: BTreeSet<String>,
    pub observed_text: BTreeMap<(String, String), u64>,
    pub observed_numeric: BTreeMap<String, ReservoirSampler>,
}

impl CountPreprocessState {
    pub fn is_empty(&self) -> bool {
        self.observed_codes.is_empty()
            && self.observed_text.is_empty()
            && self.observed_numeric.is_empty()
    }
}

/// Quantile brackets for one numeric code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumns {
    pub code: String,
    pub base_column: usize,
    /// Starts at `-inf`, ends at `+inf`, strictly increasing.
    pub boundaries: Vec<f64>,
}

impl NumericColumns {
    pub fn width(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Index of the half-open bracket `[lo, hi)` containing `value`.
    ///
    /// `+inf` and NaN fall in no bracket and are not counted.
    pub fn bracket(&self, value: f64) -> Option<usize> {
        self.boundaries
            .windows(2)
            .position(|pair| pair[0] <= value && value < pair[1])
    }
}

/// Frozen mapping from codes, (code, text) pairs and numeric brackets to columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnVocabulary {
    codes: Vec<String>,
    code_columns: HashMap<String, usize>,
    text_pairs: Vec<(String, String)>,
    text_columns: HashMap<String, HashMap<String, usize>>,
    numeric: Vec<NumericColumns>,
    numeric_positions: HashMap<String, usize>,
    num_columns: usize,
}

impl ColumnVocabulary {
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn code_column(&self, code: &str) -> Option<usize> {
        self.code_columns.get(code).copied()
    }

    pub fn text_column(&self, code: &str, text_prefix: &str) -> Option<usize> {
        self.text_columns
            .get(code)
            .and_then(|by_text| by_text.get(text_prefix))
            .copied()
    }

    pub fn numeric_columns(&self, code: &str) -> Option<&NumericColumns> {
        self.numeric_positions
            .get(code)
            .map(|position| &self.numeric[*position])
    }

    /// Column counting `value` for numeric `code`, if the code has brackets.
    pub fn numeric_column(&self, code: &str, value: f64) -> Option<usize> {
        let numeric = self.numeric_columns(code)?;
        numeric
            .bracket(value)
            .map(|offset| numeric.base_column + offset)
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn text_pairs(&self) -> &[(String, String)] {
        &self.text_pairs
    }

    pub fn numeric(&self) -> &[NumericColumns] {
        &self.numeric
    }

    pub fn column_name(&self, column: usize) -> Option<String> {
        if column < self.codes.len() {
            return Some(self.codes[column].clone());
        }
        let text_column = column - self.codes.len();
        if let Some((code, text)) = self.text_pairs.get(text_column) {
            return Some(format!("{code} {text}"));
        }
        self.numeric.iter().find_map(|numeric| {
            let offset = column.checked_sub(numeric.base_column)?;
            if offset < numeric.width() {
                Some(format!(
                    "{} [{:?}, {:?})",
                    numeric.code,
                    numeric.boundaries[offset],
                    numeric.boundaries[offset + 1]
                ))
            } else {
                None
            }
        })
    }

    /// SHA-256 over the ordered column names. Equal vocabularies hash equally.
    pub fn fingerprint(&self) -> String {
        fingerprint_columns((0..self.num_columns).filter_map(|column| self.column_name(column)))
    }
}

/// Hex SHA-256 over an ordered list of column names.
pub fn fingerprint_columns<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

/// Reduces partition summaries into one [`ColumnVocabulary`].
///
/// Numeric samples are concatenated in merge order, so the resulting quantile
/// boundaries depend on the partitioning but not on scheduling.
#[derive(Debug, Default)]
pub struct VocabularyBuilder {
    merged_states: usize,
    observed_codes: BTreeSet<String>,
    observed_text: BTreeMap<(String, String), u64>,
    observed_numeric: BTreeMap<String, ReservoirSampler>,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, state: CountPreprocessState) -> &mut Self {
        self.merged_states += 1;
        self.observed_codes.extend(state.observed_codes);
        for (pair, count) in state.observed_text {
            *self.observed_text.entry(pair).or_insert(0) += count;
        }
        for (code, sampler) in state.observed_numeric {
            match self.observed_numeric.entry(code) {
                Entry::Vacant(slot) => {
                    slot.insert(sampler);
                }
                Entry::Occupied(mut slot) => slot.get_mut().absorb(sampler),
            }
        }
        self
    }

    pub fn build(self) -> Result<ColumnVocabulary, FeaturizerError> {
        if self.merged_states == 0 {
            return Err(FeaturizerError::NoPreprocessData);
        }

        let mut num_columns = 0;

        let codes: Vec<String> = self.observed_codes.into_iter().collect();
        let mut code_columns = HashMap::with_capacity(codes.len());
        for code in &codes {
            code_columns.insert(code.clone(), num_columns);
            num_columns += 1;
        }

        let mut text_pairs = Vec::new();
        let mut text_columns: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for ((code, text), count) in self.observed_text {
            if count <= 1 {
                continue;
            }
            text_columns
                .entry(code.clone())
                .or_default()
                .insert(text.clone(), num_columns);
            text_pairs.push((code, text));
            num_columns += 1;
        }

        let mut numeric = Vec::new();
        let mut numeric_positions = HashMap::new();
        for (code, sampler) in self.observed_numeric {
            let boundaries = decile_boundaries(&mut sampler.into_values());
            let entry = NumericColumns {
                code: code.clone(),
                base_column: num_columns,
                boundaries,
            };
            num_columns += entry.width();
            numeric_positions.insert(code, numeric.len());
            numeric.push(entry);
        }

        info!(
            component = "vocabulary",
            event = "vocabulary.built",
            merged_states = self.merged_states,
            code_columns = codes.len(),
            text_columns = text_pairs.len(),
            numeric_codes = numeric.len(),
            num_columns
        );

        Ok(ColumnVocabulary {
            codes,
            code_columns,
            text_pairs,
            text_columns,
            numeric,
            numeric_positions,
            num_columns,
        })
    }
}

/// Deduplicated decile split points of `values`, bracketed by `-inf` and `+inf`.
///
/// Uses linear interpolation between closest ranks. NaN samples are ignored,
/// as are NaN split points produced by interpolating next to an infinite
/// sample. Repeated values collapse
/// duplicate split points, so fewer than ten brackets may result.
pub fn decile_boundaries(values: &mut Vec<f64>) -> Vec<f64> {
    values.retain(|value| !value.is_nan());
    values.sort_by(f64::total_cmp);

    let mut boundaries = vec![f64::NEG_INFINITY];
    if !values.is_empty() {
        let mut splits: Vec<f64> = (1..DECILE_COUNT)
            .map(|i| linear_quantile(values, i as f64 * 0.1))
            .collect();
        splits.retain(|split| !split.is_nan());
        splits.sort_by(f64::total_cmp);
        splits.dedup();
        boundaries.extend(splits);
    }
    boundaries.push(f64::INFINITY);
    boundaries.dedup();
    boundaries
}

fn linear_quantile(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let virtual_index = q * last as f64;
    let lower = (virtual_index.floor() as usize).min(last);
    let upper = (lower + 1).min(last);
    let gamma = virtual_index - lower as f64;
    let (a, b) = (sorted[lower], sorted[upper]);
    let diff = b - a;
    if gamma >= 0.5 {
        b - diff * (1.0 - gamma)
    } else {
        a + diff * gamma
    }
}
