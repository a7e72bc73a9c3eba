//! Text and CSV reports

use std::fmt;
use std::path::Path;

use polars::prelude::*;

use crate::clean::CleaningReport;
use crate::data::{events_frame, str_cells, u64_cells, write_csv, RAW_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::event::{Behavior, CleanedDataset, DATE_FORMAT, TIME_FORMAT};
use crate::model::{records_frame, RfmRecord, SegmentSummary};

/// One funnel stage with its share of all events
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunnelStage {
    pub behavior: Behavior,
    pub count: usize,
    /// Percent of all events
    pub share: f64,
    /// Percent of the previous stage; `None` for the first stage
    pub step_conversion: Option<f64>,
}

/// Ratio of each non-view behavior to views
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConversionRates {
    pub view_to_favorite: f64,
    pub view_to_cart: f64,
    pub view_to_purchase: f64,
}

impl fmt::Display for ConversionRates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "view -> favorite conversion: {:.2}%", self.view_to_favorite * 100.0)?;
        writeln!(f, "view -> cart conversion: {:.2}%", self.view_to_cart * 100.0)?;
        writeln!(f, "view -> purchase conversion: {:.2}%", self.view_to_purchase * 100.0)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn count_of(counts: &[(Behavior, usize)], behavior: Behavior) -> usize {
    counts
        .iter()
        .find(|(b, _)| *b == behavior)
        .map_or(0, |(_, c)| *c)
}

/// Favorite, cart and purchase counts relative to views; zero without views
pub fn conversion_rates(dataset: &CleanedDataset) -> ConversionRates {
    let counts = dataset.behavior_counts();
    let views = count_of(&counts, Behavior::View);
    ConversionRates {
        view_to_favorite: ratio(count_of(&counts, Behavior::Favorite), views),
        view_to_cart: ratio(count_of(&counts, Behavior::Cart), views),
        view_to_purchase: ratio(count_of(&counts, Behavior::Purchase), views),
    }
}

/// Funnel in view, cart, favorite, purchase order
pub fn funnel(dataset: &CleanedDataset) -> Vec<FunnelStage> {
    let counts = dataset.behavior_counts();
    let total: usize = counts.iter().map(|(_, c)| c).sum();

    let mut previous: Option<usize> = None;
    counts
        .iter()
        .map(|&(behavior, count)| {
            let stage = FunnelStage {
                behavior,
                count,
                share: ratio(count, total) * 100.0,
                step_conversion: previous.map(|prev| ratio(count, prev) * 100.0),
            };
            previous = Some(count);
            stage
        })
        .collect()
}

struct FunnelReport<'a>(&'a [FunnelStage]);

impl fmt::Display for FunnelReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(40);
        writeln!(f, "User behavior conversion report")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<10}{:<12}{:<10}", "behavior", "count", "share(%)")?;
        writeln!(f, "{}", "-".repeat(40))?;
        for stage in self.0 {
            writeln!(
                f,
                "{:<10}{:<12}{:.2}%",
                stage.behavior.label(),
                stage.count,
                stage.share
            )?;
        }

        writeln!(f, "\nStep conversion:")?;
        writeln!(f, "{rule}")?;
        for pair in self.0.windows(2) {
            writeln!(
                f,
                "{} -> {}: {:.2}%",
                pair[0].behavior.label(),
                pair[1].behavior.label(),
                pair[1].step_conversion.unwrap_or(0.0)
            )?;
        }
        Ok(())
    }
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| PipelineError::io(path, e))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

/// Write the view-relative conversion rates as text
pub fn write_conversion_rates(dataset: &CleanedDataset, path: &Path) -> Result<()> {
    write_text(path, &conversion_rates(dataset).to_string())
}

/// Write funnel counts, shares and stepwise conversion as text
pub fn write_funnel_report(dataset: &CleanedDataset, path: &Path) -> Result<()> {
    write_text(path, &FunnelReport(&funnel(dataset)).to_string())
}

/// Per-user RFM results with a header row
pub fn write_rfm_results(records: &[RfmRecord], path: &Path) -> Result<()> {
    let mut df = records_frame(records)?;
    write_csv(&mut df, path, true)?;
    tracing::info!(path = %path.display(), users = records.len(), "RFM results written");
    Ok(())
}

/// Segment sizes and shares with a header row
pub fn write_segment_counts(summaries: &[SegmentSummary], path: &Path) -> Result<()> {
    let mut df = DataFrame::new(vec![
        Column::new(
            "segment".into(),
            summaries
                .iter()
                .map(|s| s.segment.as_str().to_string())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            "users".into(),
            summaries.iter().map(|s| s.users).collect::<Vec<u64>>(),
        ),
        Column::new(
            "share".into(),
            summaries
                .iter()
                .map(|s| format!("{:.2}%", s.share))
                .collect::<Vec<String>>(),
        ),
    ])?;
    write_csv(&mut df, path, true)
}

/// Count, null count and range of one integer column of the raw log
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub non_null: usize,
    pub nulls: usize,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: Option<f64>,
}

/// First look at the raw log, taken before any cleaning
#[derive(Debug, Clone)]
pub struct RawProfile {
    pub rows: usize,
    pub columns: Vec<String>,
    pub head: DataFrame,
    pub numeric: Vec<ColumnProfile>,
    /// Raw behavior codes with their row counts, most frequent first
    pub behavior_counts: Vec<(Option<String>, u64)>,
}

/// Profile the raw frame: shape, first rows, integer column statistics and
/// behavior code frequencies
pub fn profile_raw(df: &DataFrame) -> Result<RawProfile> {
    let mut numeric = Vec::new();
    for name in RAW_COLUMNS.iter().filter(|name| **name != RAW_COLUMNS[3]) {
        let values = df.column(name)?.as_materialized_series().i64()?.clone();
        numeric.push(ColumnProfile {
            name: name.to_string(),
            non_null: values.len() - values.null_count(),
            nulls: values.null_count(),
            min: values.min(),
            max: values.max(),
            mean: values.mean(),
        });
    }

    let counts = df
        .clone()
        .lazy()
        .group_by([col(RAW_COLUMNS[3])])
        .agg([len().alias("count")])
        .sort(
            ["count", RAW_COLUMNS[3]],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;
    let behavior_counts = str_cells(&counts, RAW_COLUMNS[3])?
        .into_iter()
        .zip(u64_cells(&counts, "count")?)
        .collect();

    Ok(RawProfile {
        rows: df.height(),
        columns: df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        head: df.head(Some(5)),
        numeric,
        behavior_counts,
    })
}

impl fmt::Display for RawProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Raw data =====")?;
        writeln!(f, "rows:    {}", self.rows)?;
        writeln!(f, "columns: {} ({})", self.columns.len(), self.columns.join(", "))?;

        writeln!(f, "\n===== First rows =====")?;
        writeln!(f, "{}", self.head)?;

        writeln!(f, "\n===== Column statistics =====")?;
        writeln!(
            f,
            "{:<22}{:>10}{:>8}{:>14}{:>14}{:>18}",
            "column", "count", "nulls", "min", "max", "mean"
        )?;
        let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        for column in &self.numeric {
            writeln!(
                f,
                "{:<22}{:>10}{:>8}{:>14}{:>14}{:>18}",
                column.name,
                column.non_null,
                column.nulls,
                or_dash(column.min.map(|v| v.to_string())),
                or_dash(column.max.map(|v| v.to_string())),
                or_dash(column.mean.map(|v| format!("{v:.2}"))),
            )?;
        }

        writeln!(f, "\n===== Behavior codes =====")?;
        for (code, count) in &self.behavior_counts {
            writeln!(f, "{:<10}{}", code.as_deref().unwrap_or("<null>"), count)?;
        }
        Ok(())
    }
}

/// Profile the raw frame and write it as text
pub fn write_exploration_report(df: &DataFrame, path: &Path) -> Result<()> {
    write_text(path, &profile_raw(df)?.to_string())
}

struct CleaningSummary<'a> {
    dataset: &'a CleanedDataset,
    report: &'a CleaningReport,
    /// Distinct users, products and categories
    distinct: [usize; 3],
}

impl fmt::Display for CleaningSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "===== Cleaning =====")?;
        writeln!(f, "rows read:                 {}", report.rows_in)?;
        writeln!(f, "missing values removed:    {}", report.missing_rows)?;
        writeln!(f, "duplicates removed:        {}", report.duplicate_rows)?;
        writeln!(f, "invalid timestamps:        {}", report.invalid_timestamps)?;
        writeln!(f, "outside analysis window:   {}", report.out_of_window)?;
        writeln!(f, "unknown behavior codes:    {}", report.unknown_behavior)?;
        writeln!(f, "purchases without view:    {}", report.orphan_purchases)?;
        writeln!(f, "categories purchase>view:  {}", report.suspicious_categories.len())?;
        writeln!(f, "rows kept:                 {}", report.rows_out)?;
        if let Some((min, max)) = report.observed_range {
            writeln!(
                f,
                "raw time range:            {} .. {}",
                min.format(TIME_FORMAT),
                max.format(TIME_FORMAT)
            )?;
        }

        writeln!(f, "\n===== Cleaned data =====")?;
        if let Some((min, max)) = self.dataset.time_range() {
            writeln!(
                f,
                "dates:      {} .. {}",
                min.format(DATE_FORMAT),
                max.format(DATE_FORMAT)
            )?;
        }
        let [users, products, categories] = self.distinct;
        writeln!(f, "users:      {users}")?;
        writeln!(f, "products:   {products}")?;
        writeln!(f, "categories: {categories}")?;

        writeln!(f, "\n===== Behavior distribution =====")?;
        for (behavior, count) in self.dataset.behavior_counts() {
            writeln!(f, "{:<10}{}", behavior.label(), count)?;
        }
        Ok(())
    }
}

/// Descriptive summary of the cleaned dataset and what cleaning removed
pub fn cleaning_summary(dataset: &CleanedDataset, report: &CleaningReport) -> Result<String> {
    let df = events_frame(dataset.events())?;
    let mut distinct = [0; 3];
    for (slot, name) in distinct.iter_mut().zip(&RAW_COLUMNS[..3]) {
        *slot = df.column(name)?.n_unique()?;
    }
    Ok(CleaningSummary {
        dataset,
        report,
        distinct,
    }
    .to_string())
}

/// Write [`cleaning_summary`] to `path`
pub fn write_cleaning_summary(
    dataset: &CleanedDataset,
    report: &CleaningReport,
    path: &Path,
) -> Result<()> {
    write_text(path, &cleaning_summary(dataset, report)?)
}
