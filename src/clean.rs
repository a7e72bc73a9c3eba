//! Raw clickstream cleaning
//!
//! Steps run in a fixed order over a Polars frame, each on the output of the
//! previous one: missing values, duplicates, timestamp normalization, analysis
//! window, behavior relabeling, then behavior-logic validation. Offending rows
//! are deleted and counted in a [`CleaningReport`]; data problems never fail.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;

use crate::data::{
    behavior_count, events_frame, frame_events, i64_cells, raw_frame, str_cells, u64_cells,
    RAW_COLUMNS,
};
use crate::error::Result;
use crate::event::{Behavior, CleanedDataset, Event, RawEvent};

const USER: &str = RAW_COLUMNS[0];
const PRODUCT: &str = RAW_COLUMNS[1];
const CATEGORY: &str = RAW_COLUMNS[2];
const BEHAVIOR: &str = RAW_COLUMNS[3];
const TIME: &str = RAW_COLUMNS[4];

/// Half-open timestamp window `[start, end)` kept by the range filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl AnalysisWindow {
    /// The fixed 2017-11-25 .. 2017-12-04 window of the behavior dataset
    pub fn fixed() -> Self {
        Self {
            start: midnight(2017, 11, 25),
            end: midnight(2017, 12, 4),
        }
    }

    /// True when `time` falls in `[start, end)`
    pub fn contains(&self, time: NaiveDateTime) -> bool {
        time >= self.start && time < self.end
    }

    /// Same test as [`contains`](Self::contains), on an epoch-seconds column
    fn predicate(&self, column: &str) -> Expr {
        col(column)
            .gt_eq(lit(self.start.and_utc().timestamp()))
            .and(col(column).lt(lit(self.end.and_utc().timestamp())))
    }
}

impl Default for AnalysisWindow {
    fn default() -> Self {
        Self::fixed()
    }
}

fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Category flagged because purchases outnumber views
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspiciousCategory {
    pub category_id: i64,
    pub views: usize,
    pub purchases: usize,
}

/// Counts of everything the cleaner removed or flagged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub missing_rows: usize,
    pub duplicate_rows: usize,
    /// Timestamps chrono cannot represent
    pub invalid_timestamps: usize,
    pub out_of_window: usize,
    pub unknown_behavior: usize,
    /// Purchases with no view of the same product at or before them
    pub orphan_purchases: usize,
    /// Categories with purchases > views > 0; reported, not removed
    pub suspicious_categories: Vec<SuspiciousCategory>,
    /// Observed timestamp range before the window filter
    pub observed_range: Option<(NaiveDateTime, NaiveDateTime)>,
    pub rows_out: usize,
}

impl CleaningReport {
    /// Total anomalies found across all checks
    pub fn anomaly_count(&self) -> usize {
        self.missing_rows
            + self.duplicate_rows
            + self.orphan_purchases
            + self.suspicious_categories.len()
    }
}

/// Runs the cleaning steps against one analysis window
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    window: AnalysisWindow,
}

impl Cleaner {
    /// Cleaner keeping only events inside `window`
    pub fn new(window: AnalysisWindow) -> Self {
        Self { window }
    }

    /// Clean in-memory raw rows; see [`clean_frame`](Self::clean_frame)
    pub fn clean(&self, raw: Vec<RawEvent>) -> Result<(CleanedDataset, CleaningReport)> {
        self.clean_frame(raw_frame(&raw)?)
    }

    /// Clean a raw frame into a dataset that satisfies the purchase-after-view invariant
    ///
    /// Errors only come from frame evaluation, never from the data itself.
    pub fn clean_frame(&self, raw: DataFrame) -> Result<(CleanedDataset, CleaningReport)> {
        let mut report = CleaningReport {
            rows_in: raw.height(),
            ..Default::default()
        };
        tracing::info!(rows = raw.height(), "cleaning started");

        let df = drop_missing(raw, &mut report)?;
        let df = drop_duplicates(df, &mut report)?;
        let df = normalize_timestamps(df, &mut report)?;
        let df = self.filter_window(df, &mut report)?;
        let df = relabel(df, &mut report)?;
        let df = remove_orphan_purchases(df, &mut report)?;
        report.suspicious_categories = suspicious_categories(&df)?;

        if !report.suspicious_categories.is_empty() {
            tracing::warn!(
                categories = report.suspicious_categories.len(),
                "categories with more purchases than views"
            );
        } else {
            tracing::info!("no category has more purchases than views");
        }

        let events = frame_events(&df)?;
        report.rows_out = events.len();
        tracing::info!(
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            anomalies = report.anomaly_count(),
            "cleaning finished"
        );

        Ok((CleanedDataset::new(events), report))
    }

    fn filter_window(&self, df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
        let times = df.column(TIME)?.as_materialized_series().i64()?.clone();
        report.observed_range = times
            .min()
            .zip(times.max())
            .and_then(|(min, max)| {
                Event::timestamp_from_epoch(min).zip(Event::timestamp_from_epoch(max))
            });
        if let Some((min, max)) = report.observed_range {
            tracing::info!(%min, %max, "observed time range");
        }

        let before = df.height();
        let kept = df.lazy().filter(self.window.predicate(TIME)).collect()?;
        report.out_of_window = before - kept.height();
        tracing::debug!(
            dropped = report.out_of_window,
            start = %self.window.start,
            end = %self.window.end,
            "applied analysis window"
        );
        Ok(kept)
    }
}

fn all_cells_present() -> Expr {
    RAW_COLUMNS
        .iter()
        .map(|name| col(*name).is_not_null())
        .reduce(|acc, present| acc.and(present))
        .unwrap_or_else(|| lit(true))
}

fn drop_missing(df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
    let before = df.height();
    let kept = df.lazy().filter(all_cells_present()).collect()?;
    report.missing_rows = before - kept.height();
    if report.missing_rows > 0 {
        tracing::info!(dropped = report.missing_rows, "removed rows with missing values");
    }
    Ok(kept)
}

fn drop_duplicates(df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
    let before = df.height();
    let kept = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
    report.duplicate_rows = before - kept.height();
    if report.duplicate_rows > 0 {
        tracing::info!(dropped = report.duplicate_rows, "removed duplicate rows");
    }
    Ok(kept)
}

/// Keep epoch seconds that map to a representable UTC date-time
fn normalize_timestamps(df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
    let before = df.height();
    let kept = df
        .lazy()
        .filter(
            col(TIME)
                .gt_eq(lit(DateTime::<Utc>::MIN_UTC.timestamp()))
                .and(col(TIME).lt_eq(lit(DateTime::<Utc>::MAX_UTC.timestamp()))),
        )
        .collect()?;
    report.invalid_timestamps = before - kept.height();
    Ok(kept)
}

fn known_behavior() -> Expr {
    Behavior::ALL
        .iter()
        .map(|b| col(BEHAVIOR).eq(lit(b.code())))
        .reduce(|acc, known| acc.or(known))
        .unwrap_or_else(|| lit(false))
}

fn relabel(df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
    let unknown = df
        .clone()
        .lazy()
        .filter(known_behavior().not())
        .group_by([col(BEHAVIOR)])
        .agg([len().alias("rows")])
        .sort([BEHAVIOR], SortMultipleOptions::default())
        .collect()?;

    let codes = str_cells(&unknown, BEHAVIOR)?;
    let counts = u64_cells(&unknown, "rows")?;
    for (code, &rows) in codes.iter().zip(&counts) {
        let code = code.as_deref().unwrap_or_default();
        tracing::warn!(code, rows, "rejected rows with unknown behavior code");
    }
    report.unknown_behavior = counts.iter().sum::<u64>() as usize;

    Ok(df.lazy().filter(known_behavior()).collect()?)
}

/// Adds a boolean `orphan` column: purchases whose (user, product) has no view
/// at or before them. Row order is preserved.
fn with_orphan_flag(events: LazyFrame) -> LazyFrame {
    let first_views = events
        .clone()
        .filter(col(BEHAVIOR).eq(lit(Behavior::View.code())))
        .group_by([col(USER), col(PRODUCT)])
        .agg([col(TIME).min().alias("first_view")]);

    events
        .with_row_index("row_nr", None)
        .join(
            first_views,
            [col(USER), col(PRODUCT)],
            [col(USER), col(PRODUCT)],
            JoinArgs::new(JoinType::Left),
        )
        .sort(["row_nr"], SortMultipleOptions::default())
        .with_column(
            col(BEHAVIOR)
                .eq(lit(Behavior::Purchase.code()))
                .and(col("first_view").is_null().or(col("first_view").gt(col(TIME))))
                .alias("orphan"),
        )
}

fn raw_columns() -> [Expr; 5] {
    RAW_COLUMNS.map(col)
}

/// Delete purchases whose (user, product) has no view at or before the purchase
///
/// Returns the surviving rows in their original order.
pub fn remove_orphan_purchases(df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
    let before = df.height();
    let kept = with_orphan_flag(df.lazy())
        .filter(col("orphan").not())
        .select(raw_columns())
        .collect()?;
    report.orphan_purchases = before - kept.height();
    if report.orphan_purchases > 0 {
        tracing::info!(
            dropped = report.orphan_purchases,
            "removed purchases without a prior view"
        );
    }
    Ok(kept)
}

/// Purchases that violate the purchase-after-view invariant
pub fn find_orphan_purchases(events: &[Event]) -> Result<Vec<Event>> {
    let orphans = with_orphan_flag(events_frame(events)?.lazy())
        .filter(col("orphan"))
        .select(raw_columns())
        .collect()?;
    frame_events(&orphans)
}

/// Categories where purchases outnumber views while having at least one view
pub fn suspicious_categories(df: &DataFrame) -> Result<Vec<SuspiciousCategory>> {
    let flagged = df
        .clone()
        .lazy()
        .group_by([col(CATEGORY)])
        .agg([
            behavior_count(Behavior::View).alias("views"),
            behavior_count(Behavior::Purchase).alias("purchases"),
        ])
        .filter(
            col("purchases")
                .gt(col("views"))
                .and(col("views").gt(lit(0))),
        )
        .sort([CATEGORY], SortMultipleOptions::default())
        .collect()?;

    let categories = i64_cells(&flagged, CATEGORY)?;
    let views = u64_cells(&flagged, "views")?;
    let purchases = u64_cells(&flagged, "purchases")?;

    Ok(categories
        .into_iter()
        .zip(views)
        .zip(purchases)
        .filter_map(|((category_id, views), purchases)| {
            Some(SuspiciousCategory {
                category_id: category_id?,
                views: views as usize,
                purchases: purchases as usize,
            })
        })
        .collect())
}
