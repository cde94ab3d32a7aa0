//! Subject, event and label data model shared by every featurizer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Code carried by the event that marks a subject's date of birth.
pub const BIRTH_CODE: &str = "MEDS_BIRTH";

/// Value attached to an event. An event carries at most one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventValue {
    Plain,
    Numeric(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub code: String,
    /// `None` for administrative events without a time.
    pub time: Option<NaiveDateTime>,
    pub value: EventValue,
}

impl Event {
    pub fn plain(code: impl Into<String>, time: Option<NaiveDateTime>) -> Self {
        Self {
            code: code.into(),
            time,
            value: EventValue::Plain,
        }
    }

    pub fn numeric(code: impl Into<String>, time: Option<NaiveDateTime>, value: f64) -> Self {
        Self {
            code: code.into(),
            time,
            value: EventValue::Numeric(value),
        }
    }

    pub fn text(
        code: impl Into<String>,
        time: Option<NaiveDateTime>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            time,
            value: EventValue::Text(value.into()),
        }
    }
}

/// One subject's full record. Timed events are in non-decreasing time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: u64,
    pub events: Vec<Event>,
}

impl Subject {
    pub fn new(subject_id: u64, events: Vec<Event>) -> Self {
        Self { subject_id, events }
    }

    pub fn birth_date(&self) -> Option<NaiveDateTime> {
        self.events
            .iter()
            .find(|event| event.code == BIRTH_CODE)
            .and_then(|event| event.time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub prediction_time: NaiveDateTime,
}

impl Label {
    pub fn new(prediction_time: NaiveDateTime) -> Self {
        Self { prediction_time }
    }
}

/// A single sparse entry of a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: usize,
    pub value: f64,
}

impl ColumnValue {
    pub fn new(column: usize, value: f64) -> Self {
        Self { column, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid test date")
    }

    #[test]
    fn birth_date_is_first_birth_event_time() {
        let subject = Subject::new(
            7,
            vec![
                Event::plain("ADMIN", None),
                Event::plain(BIRTH_CODE, Some(at(2))),
                Event::plain(BIRTH_CODE, Some(at(5))),
            ],
        );
        assert_eq!(subject.birth_date(), Some(at(2)));
    }

    #[test]
    fn birth_date_missing_without_birth_event() {
        let subject = Subject::new(7, vec![Event::numeric("LAB", Some(at(3)), 1.5)]);
        assert_eq!(subject.birth_date(), None);
    }
}
