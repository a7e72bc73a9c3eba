//! Clickstream event model
//!
//! `RawEvent` is a loaded CSV row where any column may be missing. `Event` is a
//! validated row; date, hour, weekday and label are derived on demand from its
//! timestamp and behavior.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Format of the `time` column in the cleaned output
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the `date` column in the cleaned output
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// User behavior category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Behavior {
    /// Product page view (a "click")
    View,
    /// Added to cart
    Cart,
    /// Added to favorites
    Favorite,
    /// Purchase
    Purchase,
}

impl Behavior {
    /// Funnel order used by reports and charts
    pub const ALL: [Behavior; 4] = [
        Behavior::View,
        Behavior::Cart,
        Behavior::Favorite,
        Behavior::Purchase,
    ];

    /// Map a raw behavior code; unknown codes yield `None`
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pv" => Some(Self::View),
            "cart" => Some(Self::Cart),
            "fav" => Some(Self::Favorite),
            "buy" => Some(Self::Purchase),
            _ => None,
        }
    }

    /// Raw code as it appears in the source log
    pub fn code(&self) -> &'static str {
        match self {
            Self::View => "pv",
            Self::Cart => "cart",
            Self::Favorite => "fav",
            Self::Purchase => "buy",
        }
    }

    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Cart => "cart",
            Self::Favorite => "favorite",
            Self::Purchase => "purchase",
        }
    }

    /// Parse a label written by [`Behavior::label`]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == label)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A row as read from the raw log; `None` marks a missing or unparseable cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RawEvent {
    pub user_id: Option<i64>,
    pub product_id: Option<i64>,
    pub category_id: Option<i64>,
    pub behavior_type: Option<String>,
    /// Epoch seconds
    pub time: Option<i64>,
}

impl RawEvent {
    /// Build a fully populated raw row
    pub fn new(user_id: i64, product_id: i64, category_id: i64, behavior: &str, time: i64) -> Self {
        Self {
            user_id: Some(user_id),
            product_id: Some(product_id),
            category_id: Some(category_id),
            behavior_type: Some(behavior.to_string()),
            time: Some(time),
        }
    }

    /// True when every column holds a value
    pub fn is_complete(&self) -> bool {
        self.user_id.is_some()
            && self.product_id.is_some()
            && self.category_id.is_some()
            && self.behavior_type.is_some()
            && self.time.is_some()
    }
}

/// A validated clickstream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub user_id: i64,
    pub product_id: i64,
    pub category_id: i64,
    pub behavior: Behavior,
    /// UTC timestamp
    pub time: NaiveDateTime,
}

impl Event {
    /// Convert epoch seconds to a UTC timestamp; `None` when out of chrono's range
    pub fn timestamp_from_epoch(secs: i64) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
    }

    /// Calendar day of the event
    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }

    /// Hour of day, 0-23
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    /// Day of week, 0 = Monday .. 6 = Sunday
    pub fn weekday(&self) -> u32 {
        self.time.weekday().num_days_from_monday()
    }

    /// True for purchase events
    pub fn is_purchase(&self) -> bool {
        self.behavior == Behavior::Purchase
    }
}

/// Cleaned events in load order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedDataset {
    events: Vec<Event>,
}

impl CleanedDataset {
    /// Wrap events that already passed cleaning
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Events in load order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Latest date present, used as the recency anchor
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.events.iter().map(Event::date).max()
    }

    /// Earliest and latest timestamps
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let min = self.events.iter().map(|e| e.time).min()?;
        let max = self.events.iter().map(|e| e.time).max()?;
        Some((min, max))
    }

    /// Event count per behavior, in funnel order
    pub fn behavior_counts(&self) -> [(Behavior, usize); 4] {
        let mut counts = Behavior::ALL.map(|b| (b, 0usize));
        for event in &self.events {
            if let Some(slot) = counts.iter_mut().find(|(b, _)| *b == event.behavior) {
                slot.1 += 1;
            }
        }
        counts
    }

    /// Unwrap into the owned events
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl<'a> IntoIterator for &'a CleanedDataset {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_codes() {
        assert_eq!(Behavior::from_code("pv"), Some(Behavior::View));
        assert_eq!(Behavior::from_code("buy"), Some(Behavior::Purchase));
        assert_eq!(Behavior::from_code("cart"), Some(Behavior::Cart));
        assert_eq!(Behavior::from_code("fav"), Some(Behavior::Favorite));
        assert_eq!(Behavior::from_code("PV"), None);
        assert_eq!(Behavior::from_code(""), None);

        for behavior in Behavior::ALL {
            assert_eq!(Behavior::from_code(behavior.code()), Some(behavior));
            assert_eq!(Behavior::from_label(behavior.label()), Some(behavior));
        }
    }

    #[test]
    fn test_derived_fields() {
        // 2017-11-25 02:40:00 UTC, a Saturday
        let time = Event::timestamp_from_epoch(1511577600).unwrap();
        let event = Event {
            user_id: 1,
            product_id: 101,
            category_id: 10,
            behavior: Behavior::View,
            time,
        };

        assert_eq!(event.date(), NaiveDate::from_ymd_opt(2017, 11, 25).unwrap());
        assert_eq!(event.hour(), 2);
        assert_eq!(event.weekday(), 5);
        assert_eq!(time.format(TIME_FORMAT).to_string(), "2017-11-25 02:40:00");
    }

    #[test]
    fn test_raw_event_completeness() {
        let mut raw = RawEvent::new(1, 2, 3, "pv", 1511577600);
        assert!(raw.is_complete());
        raw.category_id = None;
        assert!(!raw.is_complete());
    }

    #[test]
    fn test_dataset_summaries() {
        let t = |s| Event::timestamp_from_epoch(s).unwrap();
        let dataset = CleanedDataset::new(vec![
            Event { user_id: 1, product_id: 1, category_id: 1, behavior: Behavior::View, time: t(1511577600) },
            Event { user_id: 1, product_id: 1, category_id: 1, behavior: Behavior::Purchase, time: t(1511700000) },
            Event { user_id: 2, product_id: 3, category_id: 1, behavior: Behavior::View, time: t(1511600000) },
        ]);

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.max_date(), Some(NaiveDate::from_ymd_opt(2017, 11, 26).unwrap()));
        let counts = dataset.behavior_counts();
        assert_eq!(counts[0], (Behavior::View, 2));
        assert_eq!(counts[3], (Behavior::Purchase, 1));
        assert_eq!(dataset.time_range().unwrap().0, t(1511577600));
    }

    #[test]
    fn test_empty_dataset() {
        let dataset = CleanedDataset::default();
        assert!(dataset.is_empty());
        assert_eq!(dataset.max_date(), None);
        assert_eq!(dataset.time_range(), None);
    }
}
