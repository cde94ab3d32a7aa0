//! Sparse code-count featurizer.
//!
//! Produces one column per observed code, per frequent (code, text prefix)
//! pair and per numeric decile bracket. The value of a column is the number
//! of matching events before the label, optionally split into label-relative
//! time bins.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::event::{ColumnValue, Event, EventValue, Label, Subject};
use crate::featurizer::{ensure_labels_sorted, Featurizer, FeaturizerError};
use crate::ontology::Ontology;
use crate::reservoir::{ReservoirSampler, DEFAULT_RESERVOIR_CAPACITY, DEFAULT_RESERVOIR_SEED};
use crate::time_bins::{TimeBinEdge, TimeBinWindow, TimeBins};
use crate::vocabulary::{ColumnVocabulary, CountPreprocessState, VocabularyBuilder};

pub const DEFAULT_TEXT_PREFIX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountFeaturizerConfig {
    /// Count each plain code against all of its ontology ancestors.
    pub is_ontology_expansion: bool,
    pub excluded_codes: Vec<String>,
    pub time_bins: Option<Vec<TimeBinEdge>>,
    /// Add decile bracket columns for numeric values.
    pub numeric_value_decile: bool,
    /// Add columns for frequent (code, text prefix) pairs.
    pub string_value_combination: bool,
    pub characters_for_string_values: usize,
    pub reservoir_capacity: usize,
    pub reservoir_seed: u64,
}

impl Default for CountFeaturizerConfig {
    fn default() -> Self {
        Self {
            is_ontology_expansion: false,
            excluded_codes: Vec::new(),
            time_bins: None,
            numeric_value_decile: false,
            string_value_combination: false,
            characters_for_string_values: DEFAULT_TEXT_PREFIX_CHARS,
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            reservoir_seed: DEFAULT_RESERVOIR_SEED,
        }
    }
}

pub type EventPredicate = dyn Fn(&Event) -> bool + Send + Sync;

/// Excluded code set, checked first, then an optional fallback predicate.
#[derive(Clone, Default)]
pub struct ExclusionFilter {
    codes: HashSet<String>,
    fallback: Option<Arc<EventPredicate>>,
}

impl ExclusionFilter {
    pub fn new(codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<EventPredicate>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn is_excluded(&self, event: &Event) -> bool {
        if self.codes.contains(&event.code) {
            return true;
        }
        self.fallback
            .as_ref()
            .is_some_and(|predicate| predicate(event))
    }
}

impl fmt::Debug for ExclusionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionFilter")
            .field("codes", &self.codes)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

pub struct CountFeaturizer {
    config: CountFeaturizerConfig,
    ontology: Option<Arc<dyn Ontology>>,
    exclusion: ExclusionFilter,
    time_bins: Option<TimeBins>,
    vocabulary: Option<ColumnVocabulary>,
}

impl fmt::Debug for CountFeaturizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountFeaturizer")
            .field("config", &self.config)
            .field("has_ontology", &self.ontology.is_some())
            .field("exclusion", &self.exclusion)
            .field(
                "num_columns",
                &self.vocabulary.as_ref().map(ColumnVocabulary::num_columns),
            )
            .finish()
    }
}

impl CountFeaturizer {
    pub fn new(
        config: CountFeaturizerConfig,
        ontology: Option<Arc<dyn Ontology>>,
    ) -> Result<Self, FeaturizerError> {
        if config.is_ontology_expansion && ontology.is_none() {
            return Err(FeaturizerError::MissingOntology);
        }
        if config.numeric_value_decile && config.reservoir_capacity == 0 {
            return Err(FeaturizerError::InvalidConfig(
                "reservoir_capacity must be > 0".to_string(),
            ));
        }
        let time_bins = config
            .time_bins
            .as_deref()
            .map(TimeBins::new)
            .transpose()?;
        let exclusion = ExclusionFilter::new(config.excluded_codes.iter().cloned());

        info!(
            component = "count_featurizer",
            event = "count_featurizer.created",
            ontology_expansion = config.is_ontology_expansion,
            excluded_codes = config.excluded_codes.len(),
            time_bins = ?time_bins.as_ref().map(TimeBins::edges),
            open_tail = time_bins.as_ref().is_some_and(TimeBins::has_open_tail),
            numeric_value_decile = config.numeric_value_decile,
            string_value_combination = config.string_value_combination
        );

        Ok(Self {
            config,
            ontology,
            exclusion,
            time_bins,
            vocabulary: None,
        })
    }

    /// Adds a predicate consulted for events whose code is not in the excluded set.
    pub fn with_event_filter(mut self, predicate: Arc<EventPredicate>) -> Self {
        self.exclusion = self.exclusion.with_fallback(predicate);
        self
    }

    pub fn config(&self) -> &CountFeaturizerConfig {
        &self.config
    }

    pub fn time_bins(&self) -> Option<&TimeBins> {
        self.time_bins.as_ref()
    }

    pub fn vocabulary(&self) -> Result<&ColumnVocabulary, FeaturizerError> {
        self.vocabulary.as_ref().ok_or(FeaturizerError::NotFinalized)
    }

    fn expanded_codes(&self, code: &str) -> Vec<String> {
        match (&self.ontology, self.config.is_ontology_expansion) {
            (Some(ontology), true) => ontology.ancestors_of(code).into_iter().collect(),
            _ => vec![code.to_string()],
        }
    }

    fn text_prefix<'t>(&self, text: &'t str) -> &'t str {
        match text.char_indices().nth(self.config.characters_for_string_values) {
            Some((byte_index, _)) => &text[..byte_index],
            None => text,
        }
    }

    fn columns_for(&self, vocabulary: &ColumnVocabulary, event: &Event, out: &mut Vec<usize>) {
        out.clear();
        match &event.value {
            EventValue::Text(text) => {
                out.extend(vocabulary.text_column(&event.code, self.text_prefix(text)));
            }
            EventValue::Numeric(value) => {
                out.extend(vocabulary.numeric_column(&event.code, *value));
            }
            EventValue::Plain => {
                if self.config.is_ontology_expansion {
                    for code in self.expanded_codes(&event.code) {
                        out.extend(vocabulary.code_column(&code));
                    }
                } else {
                    out.extend(vocabulary.code_column(&event.code));
                }
            }
        }
    }

    fn count_events<C: LabelCounter>(
        &self,
        vocabulary: &ColumnVocabulary,
        subject: &Subject,
        labels: &[Label],
        counter: &mut C,
    ) -> Result<Vec<Vec<ColumnValue>>, FeaturizerError> {
        let mut vectors = Vec::with_capacity(labels.len());
        let mut columns = Vec::new();
        let mut last_time: Option<NaiveDateTime> = None;
        let mut consumed_events = 0usize;

        for event in &subject.events {
            if let Some(time) = event.time {
                if last_time.is_some_and(|last| time < last) {
                    return Err(FeaturizerError::EventsOutOfOrder {
                        subject_id: subject.subject_id,
                        time,
                    });
                }
                last_time = Some(time);

                while time > labels[vectors.len()].prediction_time {
                    vectors.push(counter.emit(labels[vectors.len()].prediction_time));
                    if vectors.len() == labels.len() {
                        debug!(
                            component = "count_featurizer",
                            event = "featurize.subject.early_stop",
                            subject_id = subject.subject_id,
                            consumed_events,
                            total_events = subject.events.len()
                        );
                        return Ok(vectors);
                    }
                }
            }
            consumed_events += 1;

            if self.exclusion.is_excluded(event) {
                continue;
            }
            self.columns_for(vocabulary, event, &mut columns);
            for column in &columns {
                counter.observe(*column, event.time);
            }
        }

        while vectors.len() < labels.len() {
            vectors.push(counter.emit(labels[vectors.len()].prediction_time));
        }
        Ok(vectors)
    }
}

/// Counting state driven by the label-boundary loop.
trait LabelCounter {
    fn observe(&mut self, column: usize, time: Option<NaiveDateTime>);
    fn emit(&mut self, prediction_time: NaiveDateTime) -> Vec<ColumnValue>;
}

#[derive(Debug, Default)]
struct FlatCounter {
    counts: BTreeMap<usize, u32>,
}

impl LabelCounter for FlatCounter {
    fn observe(&mut self, column: usize, _time: Option<NaiveDateTime>) {
        *self.counts.entry(column).or_insert(0) += 1;
    }

    fn emit(&mut self, _prediction_time: NaiveDateTime) -> Vec<ColumnValue> {
        self.counts
            .iter()
            .map(|(column, count)| ColumnValue::new(*column, f64::from(*count)))
            .collect()
    }
}

impl LabelCounter for TimeBinWindow<'_> {
    fn observe(&mut self, column: usize, time: Option<NaiveDateTime>) {
        match time {
            Some(time) => TimeBinWindow::observe(self, column, time),
            None => self.observe_timeless(column),
        }
    }

    fn emit(&mut self, prediction_time: NaiveDateTime) -> Vec<ColumnValue> {
        self.advance(prediction_time);
        self.snapshot()
    }
}

impl Featurizer for CountFeaturizer {
    type State = CountPreprocessState;

    fn needs_preprocessing(&self) -> bool {
        true
    }

    fn num_columns(&self) -> Result<usize, FeaturizerError> {
        let base = self.vocabulary()?.num_columns();
        Ok(match &self.time_bins {
            Some(bins) => base * bins.emitted_bins(),
            None => base,
        })
    }

    fn initial_preprocess_state(&self) -> Self::State {
        CountPreprocessState::default()
    }

    fn accumulate(
        &self,
        state: &mut Self::State,
        subject: &Subject,
        _labels: &[Label],
    ) -> Result<(), FeaturizerError> {
        for event in &subject.events {
            if self.exclusion.is_excluded(event) {
                continue;
            }
            match &event.value {
                EventValue::Text(text) => {
                    if self.config.string_value_combination {
                        let key = (event.code.clone(), self.text_prefix(text).to_string());
                        *state.observed_text.entry(key).or_insert(0) += 1;
                    }
                }
                EventValue::Numeric(value) => {
                    if self.config.numeric_value_decile {
                        state
                            .observed_numeric
                            .entry(event.code.clone())
                            .or_insert_with(|| {
                                ReservoirSampler::new(
                                    self.config.reservoir_capacity,
                                    self.config.reservoir_seed,
                                )
                            })
                            .add(*value);
                    }
                }
                EventValue::Plain => {
                    state
                        .observed_codes
                        .extend(self.expanded_codes(&event.code));
                }
            }
        }
        Ok(())
    }

    fn finalize(&mut self, states: Vec<Self::State>) -> Result<(), FeaturizerError> {
        let mut builder = VocabularyBuilder::new();
        for state in states {
            builder.merge(state);
        }
        self.vocabulary = Some(builder.build()?);
        Ok(())
    }

    fn featurize(
        &self,
        subject: &Subject,
        labels: &[Label],
    ) -> Result<Vec<Vec<ColumnValue>>, FeaturizerError> {
        let vocabulary = self.vocabulary()?;
        ensure_labels_sorted(subject.subject_id, labels)?;
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        match &self.time_bins {
            None => self.count_events(vocabulary, subject, labels, &mut FlatCounter::default()),
            Some(bins) => {
                let mut window = TimeBinWindow::new(bins, vocabulary.num_columns());
                self.count_events(vocabulary, subject, labels, &mut window)
            }
        }
    }

    fn column_name(&self, column: usize) -> Result<String, FeaturizerError> {
        let vocabulary = self.vocabulary()?;
        let num_columns = self.num_columns()?;
        let unknown = FeaturizerError::UnknownColumn {
            column,
            num_columns,
        };
        if column >= num_columns {
            return Err(unknown);
        }

        match &self.time_bins {
            None => vocabulary.column_name(column).ok_or(unknown),
            Some(bins) => {
                let base = vocabulary.num_columns();
                let name = vocabulary.column_name(column % base).ok_or(unknown)?;
                Ok(format!("{name}{}", bins.bin_suffix(column / base)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::InMemoryOntology;
    use chrono::{Duration, NaiveDate};

    fn day(offset: i64) -> NaiveDateTime {
        let origin = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid origin");
        origin + Duration::days(offset)
    }

    fn finalized(config: CountFeaturizerConfig, subjects: &[Subject]) -> CountFeaturizer {
        let mut featurizer = CountFeaturizer::new(config, None).expect("valid config");
        let mut state = featurizer.initial_preprocess_state();
        for subject in subjects {
            featurizer
                .accumulate(&mut state, subject, &[])
                .expect("accumulate succeeds");
        }
        featurizer.finalize(vec![state]).expect("finalize succeeds");
        featurizer
    }

    #[test]
    fn text_prefix_counts_characters_not_bytes() {
        let featurizer = CountFeaturizer::new(
            CountFeaturizerConfig {
                characters_for_string_values: 2,
                ..CountFeaturizerConfig::default()
            },
            None,
        )
        .expect("valid config");
        assert_eq!(featurizer.text_prefix("héllo"), "hé");
        assert_eq!(featurizer.text_prefix("h"), "h");
    }

    #[test]
    fn ontology_expansion_without_ontology_fails() {
        let err = CountFeaturizer::new(
            CountFeaturizerConfig {
                is_ontology_expansion: true,
                ..CountFeaturizerConfig::default()
            },
            None,
        )
        .expect_err("must fail");
        assert_eq!(err, FeaturizerError::MissingOntology);
    }

    #[test]
    fn ontology_is_ignored_when_expansion_disabled() {
        let ontology: Arc<dyn Ontology> = Arc::new(InMemoryOntology::new().with_parent("C", "B"));
        let featurizer = CountFeaturizer::new(CountFeaturizerConfig::default(), Some(ontology))
            .expect("valid config");
        assert_eq!(featurizer.expanded_codes("C"), vec!["C".to_string()]);
    }

    #[test]
    fn usage_before_finalize_fails() {
        let featurizer =
            CountFeaturizer::new(CountFeaturizerConfig::default(), None).expect("valid config");
        let subject = Subject::new(1, Vec::new());
        assert_eq!(featurizer.num_columns(), Err(FeaturizerError::NotFinalized));
        assert_eq!(
            featurizer.featurize(&subject, &[Label::new(day(0))]),
            Err(FeaturizerError::NotFinalized)
        );
        assert_eq!(featurizer.column_name(0), Err(FeaturizerError::NotFinalized));
    }

    #[test]
    fn excluded_events_still_close_label_windows() {
        let subject = Subject::new(
            1,
            vec![
                Event::plain("A", Some(day(0))),
                Event::plain("X", Some(day(5))),
                Event::plain("A", Some(day(6))),
            ],
        );
        let featurizer = finalized(
            CountFeaturizerConfig {
                excluded_codes: vec!["X".to_string()],
                ..CountFeaturizerConfig::default()
            },
            std::slice::from_ref(&subject),
        );
        assert_eq!(featurizer.vocabulary().map(|v| v.codes().len()), Ok(1));

        let vectors = featurizer
            .featurize(&subject, &[Label::new(day(1)), Label::new(day(10))])
            .expect("featurize succeeds");
        assert_eq!(
            vectors,
            vec![
                vec![ColumnValue::new(0, 1.0)],
                vec![ColumnValue::new(0, 2.0)],
            ]
        );
    }

    #[test]
    fn fallback_predicate_excludes_matching_events() {
        let subject = Subject::new(
            1,
            vec![
                Event::plain("A", Some(day(0))),
                Event::plain("B", Some(day(1))),
            ],
        );
        let featurizer = CountFeaturizer::new(CountFeaturizerConfig::default(), None)
            .expect("valid config")
            .with_event_filter(Arc::new(|event: &Event| event.code.starts_with('B')));
        let mut state = featurizer.initial_preprocess_state();
        featurizer
            .accumulate(&mut state, &subject, &[])
            .expect("accumulate succeeds");
        assert_eq!(state.observed_codes.len(), 1);
        assert!(state.observed_codes.contains("A"));
    }

    #[test]
    fn out_of_order_events_fail() {
        let subject = Subject::new(
            3,
            vec![
                Event::plain("A", Some(day(2))),
                Event::plain("A", Some(day(1))),
            ],
        );
        let featurizer = finalized(CountFeaturizerConfig::default(), std::slice::from_ref(&subject));
        let err = featurizer
            .featurize(&subject, &[Label::new(day(5))])
            .expect_err("must fail");
        assert_eq!(
            err,
            FeaturizerError::EventsOutOfOrder {
                subject_id: 3,
                time: day(1)
            }
        );
    }

    #[test]
    fn unsorted_labels_fail() {
        let subject = Subject::new(4, vec![Event::plain("A", Some(day(0)))]);
        let featurizer = finalized(CountFeaturizerConfig::default(), std::slice::from_ref(&subject));
        let err = featurizer
            .featurize(&subject, &[Label::new(day(5)), Label::new(day(1))])
            .expect_err("must fail");
        assert_eq!(err, FeaturizerError::UnsortedLabels { subject_id: 4 });
    }
}
