//! RFM (Recency, Frequency, Monetary) model
//!
//! Recency is measured in whole days from the dataset's latest date to a
//! user's latest purchase date. The behavior log carries no prices, so the
//! monetary value is approximated by the purchase count. Scores come from
//! quantile binning and feed the segmentation rule table.

use chrono::NaiveDate;
use polars::prelude::*;

use crate::data::{events_frame, i64_cells, u64_cells, RAW_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::event::{Behavior, CleanedDataset, Event};
use crate::quantile::{qcut, ScoreOrder};
use crate::segment::{segment_for, ScoreTriple, Segment};

/// Requested number of quantile buckets per dimension
pub const SCORE_BUCKETS: usize = 5;

/// Fewer realized buckets than this makes the fixed 2/3 thresholds unreliable
pub const MIN_RELIABLE_BUCKETS: usize = 3;

/// Raw RFM values of one purchasing user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmMetrics {
    pub user_id: i64,
    pub recency_days: i64,
    pub frequency: u64,
    /// Purchase count standing in for spend
    pub monetary: u64,
}

/// Scored and segmented RFM row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmRecord {
    pub user_id: i64,
    pub recency_days: i64,
    pub frequency: u64,
    pub monetary: u64,
    pub scores: ScoreTriple,
    pub total_score: u8,
    pub segment: Segment,
}

/// Buckets realized per dimension by the quantile binning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketCounts {
    pub recency: usize,
    pub frequency: usize,
    pub monetary: usize,
}

impl BucketCounts {
    /// True when any dimension collapsed below the reliable bucket count
    pub fn is_degenerate(&self) -> bool {
        [self.recency, self.frequency, self.monetary]
            .iter()
            .any(|&b| b < MIN_RELIABLE_BUCKETS)
    }
}

/// Scored population: one record per purchasing user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredRfm {
    pub records: Vec<RfmRecord>,
    pub buckets: BucketCounts,
    /// Latest date in the dataset
    pub anchor_date: Option<NaiveDate>,
}

/// Compute recency, frequency and monetary per purchasing user
///
/// Users without purchases are left out. Results are ordered by user id.
pub fn calculate_metrics(dataset: &CleanedDataset) -> Result<(Option<NaiveDate>, Vec<RfmMetrics>)> {
    let events = events_frame(dataset.events())?;
    let latest = events
        .column(RAW_COLUMNS[4])?
        .as_materialized_series()
        .i64()?
        .max();
    let Some(anchor_date) = latest.and_then(Event::timestamp_from_epoch).map(|t| t.date()) else {
        return Ok((None, Vec::new()));
    };

    let per_user = events
        .lazy()
        .filter(col(RAW_COLUMNS[3]).eq(lit(Behavior::Purchase.code())))
        .group_by([col(RAW_COLUMNS[0])])
        .agg([
            // Latest purchase, epoch seconds
            col(RAW_COLUMNS[4]).max().alias("last_purchase"),
            len().alias("purchases"),
        ])
        .sort([RAW_COLUMNS[0]], SortMultipleOptions::default())
        .collect()?;

    let user_ids = i64_cells(&per_user, RAW_COLUMNS[0])?;
    let last_purchases = i64_cells(&per_user, "last_purchase")?;
    let purchases = u64_cells(&per_user, "purchases")?;

    let mut metrics = Vec::with_capacity(per_user.height());
    for (row, ((user_id, last_purchase), count)) in user_ids
        .into_iter()
        .zip(last_purchases)
        .zip(purchases)
        .enumerate()
    {
        let (Some(user_id), Some(last_purchase)) = (user_id, last_purchase) else {
            return Err(PipelineError::malformed(row, "missing user or purchase time"));
        };
        let last_date = Event::timestamp_from_epoch(last_purchase)
            .ok_or_else(|| PipelineError::malformed(row, "purchase time out of range"))?
            .date();
        metrics.push(RfmMetrics {
            user_id,
            recency_days: (anchor_date - last_date).num_days(),
            frequency: count,
            monetary: count,
        });
    }

    Ok((Some(anchor_date), metrics))
}

/// Quantile-score metrics and assign segments
pub fn score_metrics(metrics: &[RfmMetrics]) -> (Vec<RfmRecord>, BucketCounts) {
    let recency: Vec<f64> = metrics.iter().map(|m| m.recency_days as f64).collect();
    let frequency: Vec<f64> = metrics.iter().map(|m| m.frequency as f64).collect();
    let monetary: Vec<f64> = metrics.iter().map(|m| m.monetary as f64).collect();

    let r = qcut(&recency, SCORE_BUCKETS, ScoreOrder::Descending);
    let f = qcut(&frequency, SCORE_BUCKETS, ScoreOrder::Ascending);
    let m = qcut(&monetary, SCORE_BUCKETS, ScoreOrder::Ascending);

    let buckets = BucketCounts {
        recency: r.buckets,
        frequency: f.buckets,
        monetary: m.buckets,
    };

    let records = metrics
        .iter()
        .enumerate()
        .map(|(i, metric)| {
            let scores = ScoreTriple::new(r.scores[i], f.scores[i], m.scores[i]);
            RfmRecord {
                user_id: metric.user_id,
                recency_days: metric.recency_days,
                frequency: metric.frequency,
                monetary: metric.monetary,
                scores,
                total_score: scores.total(),
                segment: segment_for(&scores),
            }
        })
        .collect();

    (records, buckets)
}

/// Run the whole RFM computation in one call
pub fn compute_rfm(dataset: &CleanedDataset) -> Result<ScoredRfm> {
    let (anchor_date, metrics) = calculate_metrics(dataset)?;
    let (records, buckets) = score_metrics(&metrics);
    Ok(ScoredRfm {
        records,
        buckets,
        anchor_date,
    })
}

/// Aggregates of one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub users: u64,
    /// Share of the scored population, in percent
    pub share: f64,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
    pub mean_r_score: f64,
    pub mean_f_score: f64,
    pub mean_m_score: f64,
}

/// Build a DataFrame of scored records
pub fn records_frame(records: &[RfmRecord]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Column::new(
            "user_id".into(),
            records.iter().map(|r| r.user_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            "R".into(),
            records.iter().map(|r| r.recency_days).collect::<Vec<i64>>(),
        ),
        Column::new(
            "F".into(),
            records.iter().map(|r| r.frequency as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "M".into(),
            records.iter().map(|r| r.monetary as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "R_score".into(),
            records.iter().map(|r| r.scores.r as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "F_score".into(),
            records.iter().map(|r| r.scores.f as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "M_score".into(),
            records.iter().map(|r| r.scores.m as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "RFM_total".into(),
            records.iter().map(|r| r.total_score as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            "segment".into(),
            records
                .iter()
                .map(|r| r.segment.as_str().to_string())
                .collect::<Vec<String>>(),
        ),
    ])?;
    Ok(df)
}

fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    Ok(df
        .column(name)?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

/// Per-segment counts, shares and mean values, in rule priority order
pub fn summarize_segments(records: &[RfmRecord]) -> Result<Vec<SegmentSummary>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let total = records.len() as f64;

    let summary = records_frame(records)?
        .lazy()
        .group_by([col("segment")])
        .agg([
            len().alias("users"),
            col("R").cast(DataType::Float64).mean().alias("mean_recency"),
            col("F").cast(DataType::Float64).mean().alias("mean_frequency"),
            col("M").cast(DataType::Float64).mean().alias("mean_monetary"),
            col("R_score").cast(DataType::Float64).mean().alias("mean_r_score"),
            col("F_score").cast(DataType::Float64).mean().alias("mean_f_score"),
            col("M_score").cast(DataType::Float64).mean().alias("mean_m_score"),
        ])
        .collect()?;

    let users_series = summary
        .column("users")?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;
    let users: Vec<u64> = users_series
        .u64()?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect();
    let segments: Vec<Option<Segment>> = summary
        .column("segment")?
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|s| s.and_then(|s| s.parse().ok()))
        .collect();

    let mean_recency = f64_values(&summary, "mean_recency")?;
    let mean_frequency = f64_values(&summary, "mean_frequency")?;
    let mean_monetary = f64_values(&summary, "mean_monetary")?;
    let mean_r_score = f64_values(&summary, "mean_r_score")?;
    let mean_f_score = f64_values(&summary, "mean_f_score")?;
    let mean_m_score = f64_values(&summary, "mean_m_score")?;

    let mut summaries: Vec<SegmentSummary> = segments
        .into_iter()
        .enumerate()
        .filter_map(|(i, segment)| {
            Some(SegmentSummary {
                segment: segment?,
                users: users[i],
                share: users[i] as f64 / total * 100.0,
                mean_recency: mean_recency[i],
                mean_frequency: mean_frequency[i],
                mean_monetary: mean_monetary[i],
                mean_r_score: mean_r_score[i],
                mean_f_score: mean_f_score[i],
                mean_m_score: mean_m_score[i],
            })
        })
        .collect();
    summaries.sort_by_key(|s| s.segment);

    Ok(summaries)
}

/// Stage-by-stage RFM analysis over one cleaned dataset
///
/// Each stage needs the previous one. Calling a stage too early logs a warning
/// and returns `None` instead of failing.
#[derive(Debug)]
pub struct RfmAnalyzer<'a> {
    dataset: &'a CleanedDataset,
    anchor_date: Option<NaiveDate>,
    metrics: Option<Vec<RfmMetrics>>,
    scored: Option<(Vec<RfmRecord>, BucketCounts)>,
    segmented: bool,
}

impl<'a> RfmAnalyzer<'a> {
    /// Analyzer with no stage run yet
    pub fn new(dataset: &'a CleanedDataset) -> Self {
        Self {
            dataset,
            anchor_date: None,
            metrics: None,
            scored: None,
            segmented: false,
        }
    }

    /// Compute raw metrics for every purchasing user
    pub fn calculate(&mut self) -> Result<&[RfmMetrics]> {
        let (anchor_date, metrics) = calculate_metrics(self.dataset)?;
        match anchor_date {
            Some(anchor) => tracing::info!(%anchor, users = metrics.len(), "RFM metrics calculated"),
            None => tracing::warn!("dataset is empty, no RFM metrics"),
        }
        self.anchor_date = anchor_date;
        self.scored = None;
        self.segmented = false;
        Ok(self.metrics.insert(metrics).as_slice())
    }

    /// Quantile-score the calculated metrics
    pub fn score(&mut self) -> Option<BucketCounts> {
        let Some(metrics) = self.metrics.as_deref() else {
            tracing::warn!("RFM metrics must be calculated before scoring");
            return None;
        };

        let (records, buckets) = score_metrics(metrics);
        if !records.is_empty() && buckets.is_degenerate() {
            tracing::warn!(
                recency_buckets = buckets.recency,
                frequency_buckets = buckets.frequency,
                monetary_buckets = buckets.monetary,
                "quantile binning collapsed; fixed segment thresholds may misclassify"
            );
        }
        tracing::info!(users = records.len(), "RFM scoring done");

        self.scored = Some((records, buckets));
        self.segmented = false;
        Some(buckets)
    }

    /// Segmented records, available after scoring
    pub fn segment(&mut self) -> Option<&[RfmRecord]> {
        let Some((records, _)) = self.scored.as_ref() else {
            tracing::warn!("RFM scores must be computed before segmentation");
            return None;
        };
        self.segmented = true;
        tracing::info!(users = records.len(), "users segmented");
        Some(records)
    }

    /// Per-segment aggregates, available after segmentation
    pub fn summarize(&self) -> Option<Result<Vec<SegmentSummary>>> {
        match (&self.scored, self.segmented) {
            (Some((records, _)), true) => Some(summarize_segments(records)),
            _ => {
                tracing::warn!("users must be segmented before summarizing");
                None
            }
        }
    }

    /// Consume the analyzer, yielding the scored population if segmentation ran
    pub fn finish(self) -> Option<ScoredRfm> {
        if !self.segmented {
            tracing::warn!("RFM analysis finished before segmentation");
            return None;
        }
        let (records, buckets) = self.scored?;
        Some(ScoredRfm {
            records,
            buckets,
            anchor_date: self.anchor_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;
    const T0: i64 = 1511577600; // 2017-11-25 02:40:00

    fn event(user_id: i64, product_id: i64, behavior: Behavior, time: i64) -> Event {
        Event {
            user_id,
            product_id,
            category_id: 1,
            behavior,
            time: Event::timestamp_from_epoch(time).unwrap(),
        }
    }

    fn buyer(user_id: i64, purchases: &[i64]) -> Vec<Event> {
        let mut events = Vec::new();
        for (i, &time) in purchases.iter().enumerate() {
            events.push(event(user_id, i as i64, Behavior::View, time));
            events.push(event(user_id, i as i64, Behavior::Purchase, time));
        }
        events
    }

    fn population() -> CleanedDataset {
        let mut events = Vec::new();
        for user in 1..=10i64 {
            // user n buys n times, the last purchase n days after T0
            let times: Vec<i64> = (1..=user).map(|k| T0 + k * DAY).collect();
            events.extend(buyer(user, &times));
        }
        // browsing-only user
        events.push(event(99, 1, Behavior::View, T0));
        CleanedDataset::new(events)
    }

    #[test]
    fn test_single_purchase_example() {
        let dataset = CleanedDataset::new(vec![
            event(1, 101, Behavior::View, 1511577600),
            event(1, 101, Behavior::Purchase, 1511578600),
            event(2, 200, Behavior::View, 1511577600 + 3 * DAY),
        ]);
        let (anchor, metrics) = calculate_metrics(&dataset).unwrap();

        assert_eq!(anchor, NaiveDate::from_ymd_opt(2017, 11, 28));
        assert_eq!(
            metrics,
            vec![RfmMetrics {
                user_id: 1,
                recency_days: 3,
                frequency: 1,
                monetary: 1
            }]
        );
    }

    #[test]
    fn test_non_buyers_excluded() {
        let scored = compute_rfm(&population()).unwrap();
        assert_eq!(scored.records.len(), 10);
        assert!(scored.records.iter().all(|r| r.user_id != 99));
        assert!(scored.records.iter().all(|r| r.frequency >= 1 && r.monetary == r.frequency));
    }

    #[test]
    fn test_scores_and_segments() {
        let scored = compute_rfm(&population()).unwrap();
        assert_eq!(
            scored.buckets,
            BucketCounts {
                recency: 5,
                frequency: 5,
                monetary: 5
            }
        );

        for record in &scored.records {
            for score in [record.scores.r, record.scores.f, record.scores.m] {
                assert!((1..=5).contains(&score));
            }
            assert_eq!(record.total_score, record.scores.total());
            assert_eq!(record.segment, segment_for(&record.scores));
        }

        // most recent and most frequent buyer
        let top = scored.records.iter().find(|r| r.user_id == 10).unwrap();
        assert_eq!(top.recency_days, 0);
        assert_eq!(top.scores, ScoreTriple::new(5, 5, 5));
        assert_eq!(top.segment, Segment::HighValue);

        let bottom = scored.records.iter().find(|r| r.user_id == 1).unwrap();
        assert_eq!(bottom.scores, ScoreTriple::new(1, 1, 1));
        assert_eq!(bottom.segment, Segment::General);
    }

    #[test]
    fn test_degenerate_buckets_detected() {
        let mut events = Vec::new();
        for user in 1..=4 {
            events.extend(buyer(user, &[T0 + user * DAY]));
        }
        let scored = compute_rfm(&CleanedDataset::new(events)).unwrap();

        assert_eq!(scored.buckets.frequency, 1);
        assert!(scored.buckets.is_degenerate());
        assert!(scored.records.iter().all(|r| r.scores.f == 1 && r.scores.m == 1));
    }

    #[test]
    fn test_summary_shares_sum_to_hundred() {
        let scored = compute_rfm(&population()).unwrap();
        let summaries = summarize_segments(&scored.records).unwrap();

        let users: u64 = summaries.iter().map(|s| s.users).sum();
        assert_eq!(users, 10);
        let share: f64 = summaries.iter().map(|s| s.share).sum();
        assert!((share - 100.0).abs() < 1e-9);

        let ordered: Vec<Segment> = summaries.iter().map(|s| s.segment).collect();
        let mut sorted = ordered.clone();
        sorted.sort();
        assert_eq!(ordered, sorted);

        let high = summaries
            .iter()
            .find(|s| s.segment == Segment::HighValue)
            .unwrap();
        assert!(high.mean_r_score >= 3.0);
    }

    #[test]
    fn test_summary_of_empty_population() {
        assert!(summarize_segments(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_analyzer_requires_stage_order() {
        let dataset = population();
        let mut analyzer = RfmAnalyzer::new(&dataset);

        assert!(analyzer.score().is_none());
        assert!(analyzer.segment().is_none());
        assert!(analyzer.summarize().is_none());

        assert_eq!(analyzer.calculate().unwrap().len(), 10);
        assert!(analyzer.summarize().is_none());
        assert!(analyzer.score().is_some());
        assert_eq!(analyzer.segment().map(<[RfmRecord]>::len), Some(10));
        assert!(analyzer.summarize().unwrap().is_ok());

        let scored = analyzer.finish().unwrap();
        assert_eq!(scored, compute_rfm(&dataset).unwrap());
    }

    #[test]
    fn test_analyzer_on_empty_dataset() {
        let dataset = CleanedDataset::default();
        let mut analyzer = RfmAnalyzer::new(&dataset);
        assert!(analyzer.calculate().unwrap().is_empty());
        assert_eq!(analyzer.score(), Some(BucketCounts::default()));
        assert_eq!(analyzer.segment().map(<[RfmRecord]>::len), Some(0));
        assert_eq!(analyzer.summarize().unwrap().unwrap(), Vec::new());
    }
}
