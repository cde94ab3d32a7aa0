//! Age at prediction time, optionally normalized across all labels.

use serde::{Deserialize, Serialize};

use crate::event::{ColumnValue, Label, Subject};
use crate::featurizer::{Featurizer, FeaturizerError};

const DAYS_PER_YEAR: f64 = 365.0;
const SECONDS_PER_DAY: i64 = 86_400;

/// Running mean and variance (Welford), mergeable across partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnlineStatistics {
    count: u64,
    mean: f64,
    m2: f64,
}

impl OnlineStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn merge(&mut self, other: &OnlineStatistics) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * self.count as f64 * other.count as f64 / count as f64;
        self.count = count;
        self.mean = mean;
        self.m2 = m2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; `None` with fewer than two values.
    pub fn variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn standard_deviation(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgeFeaturizer {
    is_normalize: bool,
    statistics: Option<OnlineStatistics>,
}

impl Default for AgeFeaturizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AgeFeaturizer {
    pub fn new(is_normalize: bool) -> Self {
        Self {
            is_normalize,
            statistics: None,
        }
    }

    pub fn statistics(&self) -> Option<&OnlineStatistics> {
        self.statistics.as_ref()
    }

    fn ages<'a>(
        subject: &Subject,
        labels: &'a [Label],
    ) -> Result<impl Iterator<Item = f64> + 'a, FeaturizerError> {
        let birth = subject
            .birth_date()
            .ok_or(FeaturizerError::MissingBirthDate {
                subject_id: subject.subject_id,
            })?;
        Ok(labels.iter().map(move |label| {
            let days = (label.prediction_time - birth)
                .num_seconds()
                .div_euclid(SECONDS_PER_DAY);
            days as f64 / DAYS_PER_YEAR
        }))
    }
}

impl Featurizer for AgeFeaturizer {
    type State = OnlineStatistics;

    fn needs_preprocessing(&self) -> bool {
        self.is_normalize
    }

    fn num_columns(&self) -> Result<usize, FeaturizerError> {
        Ok(1)
    }

    fn initial_preprocess_state(&self) -> Self::State {
        OnlineStatistics::new()
    }

    fn accumulate(
        &self,
        state: &mut Self::State,
        subject: &Subject,
        labels: &[Label],
    ) -> Result<(), FeaturizerError> {
        if labels.is_empty() {
            return Ok(());
        }
        for age in Self::ages(subject, labels)? {
            state.add(age);
        }
        Ok(())
    }

    fn finalize(&mut self, states: Vec<Self::State>) -> Result<(), FeaturizerError> {
        if states.is_empty() {
            return Err(FeaturizerError::NoPreprocessData);
        }
        let mut merged = OnlineStatistics::new();
        for state in &states {
            merged.merge(state);
        }
        self.statistics = Some(merged);
        Ok(())
    }

    fn featurize(
        &self,
        subject: &Subject,
        labels: &[Label],
    ) -> Result<Vec<Vec<ColumnValue>>, FeaturizerError> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let ages = Self::ages(subject, labels)?;
        if !self.is_normalize {
            return Ok(ages.map(age_entry).collect());
        }

        let statistics = self.statistics.ok_or(FeaturizerError::NotFinalized)?;
        let std = statistics
            .standard_deviation()
            .filter(|std| *std > 0.0)
            .ok_or_else(|| {
                FeaturizerError::DegenerateStatistics(format!(
                    "age standard deviation undefined or zero over {} labels",
                    statistics.count()
                ))
            })?;
        Ok(ages
            .map(|age| age_entry((age - statistics.mean()) / std))
            .collect())
    }

    fn column_name(&self, column: usize) -> Result<String, FeaturizerError> {
        match column {
            0 => Ok("age".to_string()),
            _ => Err(FeaturizerError::UnknownColumn {
                column,
                num_columns: 1,
            }),
        }
    }
}

/// Zero ages are left out to keep vectors sparse.
fn age_entry(value: f64) -> Vec<ColumnValue> {
    if value == 0.0 {
        Vec::new()
    } else {
        vec![ColumnValue::new(0, value)]
    }
}
