//! End-to-end batch run
//!
//! Stages run in order: load, raw exploration report, clean, save cleaned CSV,
//! persist, conversion reports, RFM analysis, RFM reports, charts. A missing or unreadable input
//! aborts the run before anything is written. Exploration, persistence and
//! chart failures are logged and recorded in the outcome; the run carries on without them.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::clean::{find_orphan_purchases, AnalysisWindow, Cleaner, CleaningReport};
use crate::config::PipelineConfig;
use polars::prelude::DataFrame;

use crate::data::{load_cleaned_csv, load_raw_frame, save_cleaned_csv};
use crate::error::Result;
use crate::event::CleanedDataset;
use crate::model::{RfmAnalyzer, ScoredRfm, SegmentSummary};
use crate::persist::{PersistenceSink, SqliteSink};
use crate::report;
use crate::viz::ChartRenderer;

/// Wall time spent per stage
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub load: Duration,
    pub clean: Duration,
    pub persist: Duration,
    pub rfm: Duration,
    pub charts: Duration,
}

/// What one run produced
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub dataset: CleanedDataset,
    pub cleaning: CleaningReport,
    /// False when no database was configured or the bulk load failed
    pub persisted: bool,
    pub rfm: ScoredRfm,
    pub segments: Vec<SegmentSummary>,
    pub reports: Vec<PathBuf>,
    pub charts: Vec<PathBuf>,
    /// Non-fatal stage failures, in the order they happened
    pub failures: Vec<String>,
    pub timings: StageTimings,
}

/// Batch pipeline bound to one configuration
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    window: AnalysisWindow,
}

impl Pipeline {
    /// Pipeline over the fixed analysis window
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            window: AnalysisWindow::fixed(),
        }
    }

    /// Configuration this pipeline runs with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage, persisting into the configured SQLite database if any
    pub fn run(&self) -> Result<PipelineOutcome> {
        let (raw, load_time) = self.load()?;

        let Some(path) = &self.config.database else {
            tracing::info!("no database configured, skipping persistence");
            return self.process(raw, load_time, None);
        };
        match SqliteSink::open(path) {
            Ok(mut sink) => self.process(raw, load_time, Some(&mut sink)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot open database");
                let mut outcome = self.process(raw, load_time, None)?;
                outcome.failures.insert(0, e.to_string());
                Ok(outcome)
            }
        }
    }

    /// Run every stage with an explicit persistence sink
    pub fn run_with_sink(&self, sink: Option<&mut dyn PersistenceSink>) -> Result<PipelineOutcome> {
        let (raw, load_time) = self.load()?;
        self.process(raw, load_time, sink)
    }

    fn load(&self) -> Result<(DataFrame, Duration)> {
        let started = Instant::now();
        let raw = load_raw_frame(&self.config.input, self.config.row_limit)?;
        Ok((raw, started.elapsed()))
    }

    fn process(
        &self,
        raw: DataFrame,
        load_time: Duration,
        sink: Option<&mut dyn PersistenceSink>,
    ) -> Result<PipelineOutcome> {
        let mut outcome = PipelineOutcome::default();
        outcome.timings.load = load_time;

        let exploration = self.config.reports_dir().join("data_exploration.txt");
        match report::write_exploration_report(&raw, &exploration) {
            Ok(()) => outcome.reports.push(exploration),
            Err(e) => {
                tracing::error!(error = %e, "raw exploration report failed");
                outcome.failures.push(format!("exploration report: {e}"));
            }
        }

        let started = Instant::now();
        let (dataset, cleaning) = Cleaner::new(self.window).clean_frame(raw)?;
        outcome.timings.clean = started.elapsed();

        save_cleaned_csv(&dataset, &self.config.cleaned_csv())?;
        report::write_cleaning_summary(&dataset, &cleaning, &self.config.cleaning_summary())?;
        outcome.reports.push(self.config.cleaned_csv());
        outcome.reports.push(self.config.cleaning_summary());

        let started = Instant::now();
        if let Some(sink) = sink {
            match sink.bulk_load(&dataset) {
                Ok(rows) => {
                    tracing::info!(rows, "cleaned rows persisted");
                    outcome.persisted = true;
                }
                Err(e) => {
                    tracing::error!(error = %e, "bulk load failed, continuing without persistence");
                    outcome.failures.push(e.to_string());
                }
            }
        }
        outcome.timings.persist = started.elapsed();

        match self.write_conversion_reports(&dataset) {
            Ok(paths) => outcome.reports.extend(paths),
            Err(e) => {
                tracing::error!(error = %e, "conversion reports failed");
                outcome.failures.push(format!("conversion reports: {e}"));
            }
        }

        let started = Instant::now();
        let (rfm, segments) = analyze(&dataset)?;
        outcome.timings.rfm = started.elapsed();

        match self.write_rfm_reports(&rfm, &segments) {
            Ok(paths) => outcome.reports.extend(paths),
            Err(e) => {
                tracing::error!(error = %e, "RFM reports failed");
                outcome.failures.push(format!("RFM reports: {e}"));
            }
        }

        let started = Instant::now();
        if self.config.charts {
            self.render_charts(&dataset, &segments, &mut outcome);
        } else {
            tracing::info!("charts disabled");
        }
        outcome.timings.charts = started.elapsed();

        outcome.dataset = dataset;
        outcome.cleaning = cleaning;
        outcome.rfm = rfm;
        outcome.segments = segments;
        Ok(outcome)
    }

    fn write_conversion_reports(&self, dataset: &CleanedDataset) -> Result<Vec<PathBuf>> {
        let dir = self.config.reports_dir();
        let rates = dir.join("conversion_rates.txt");
        let funnel = dir.join("funnel_conversion_rates.txt");
        report::write_conversion_rates(dataset, &rates)?;
        report::write_funnel_report(dataset, &funnel)?;
        Ok(vec![rates, funnel])
    }

    fn write_rfm_reports(&self, rfm: &ScoredRfm, segments: &[SegmentSummary]) -> Result<Vec<PathBuf>> {
        let dir = self.config.reports_dir();
        let results = dir.join("rfm_results.csv");
        let counts = dir.join("rfm_segments.csv");
        report::write_rfm_results(&rfm.records, &results)?;
        report::write_segment_counts(segments, &counts)?;
        Ok(vec![results, counts])
    }

    fn render_charts(&self, dataset: &CleanedDataset, segments: &[SegmentSummary], outcome: &mut PipelineOutcome) {
        let renderer = ChartRenderer::new(self.config.charts_dir(), self.config.chart_style());

        let rendered = [
            renderer.dataset_charts(dataset),
            renderer.rfm_charts(segments),
            renderer.funnel_page(dataset).map(|path| vec![path]),
        ];
        for result in rendered {
            match result {
                Ok(paths) => outcome.charts.extend(paths),
                Err(e) => {
                    tracing::warn!(error = %e, "chart rendering failed");
                    outcome.failures.push(format!("charts: {e}"));
                }
            }
        }
    }
}

/// Run the RFM stages in order and aggregate per segment
pub fn analyze(dataset: &CleanedDataset) -> Result<(ScoredRfm, Vec<SegmentSummary>)> {
    let mut analyzer = RfmAnalyzer::new(dataset);
    analyzer.calculate()?;
    analyzer.score();
    analyzer.segment();
    let segments = analyzer.summarize().transpose()?.unwrap_or_default();
    let scored = analyzer.finish().unwrap_or_default();
    Ok((scored, segments))
}

/// Result of re-validating a cleaned CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub rows: usize,
    pub out_of_window: usize,
    pub orphan_purchases: usize,
}

impl Verification {
    /// True when no row breaks the window or purchase-after-view rules
    pub fn is_clean(&self) -> bool {
        self.out_of_window == 0 && self.orphan_purchases == 0
    }
}

/// Load a cleaned CSV back and check the window and purchase-after-view rules
pub fn verify(path: &Path) -> Result<Verification> {
    let dataset = load_cleaned_csv(path)?;
    let window = AnalysisWindow::fixed();

    let verification = Verification {
        rows: dataset.len(),
        out_of_window: dataset.iter().filter(|e| !window.contains(e.time)).count(),
        orphan_purchases: find_orphan_purchases(dataset.events())?.len(),
    };
    if verification.is_clean() {
        tracing::info!(rows = verification.rows, "cleaned data verified");
    } else {
        tracing::warn!(
            out_of_window = verification.out_of_window,
            orphan_purchases = verification.orphan_purchases,
            "cleaned data violates cleaning rules"
        );
    }
    Ok(verification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::event::{Behavior, Event};
    use std::io::Write;
    use tempfile::tempdir;

    struct FailingSink;

    impl PersistenceSink for FailingSink {
        fn bulk_load(&mut self, _dataset: &CleanedDataset) -> Result<usize> {
            Err(PipelineError::Persistence(rusqlite::Error::InvalidQuery))
        }
    }

    fn config_in(dir: &Path, rows: &[&str]) -> PipelineConfig {
        let input = dir.join("raw.csv");
        let mut file = std::fs::File::create(&input).unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        PipelineConfig {
            input,
            processed_dir: dir.join("processed"),
            output_dir: dir.join("output"),
            charts: false,
            ..Default::default()
        }
    }

    const ROWS: [&str; 4] = [
        "1,101,10,pv,1511577600",
        "1,101,10,buy,1511578600",
        "2,202,20,buy,1511578600",
        "3,303,30,pv,1511000000",
    ];

    #[test]
    fn test_run_without_database() {
        let dir = tempdir().unwrap();
        let outcome = Pipeline::new(config_in(dir.path(), &ROWS)).run().unwrap();

        assert!(!outcome.persisted);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.cleaning.orphan_purchases, 1);
        assert_eq!(outcome.cleaning.out_of_window, 1);
        assert_eq!(outcome.rfm.records.len(), 1);
        assert_eq!(outcome.rfm.records[0].user_id, 1);
        assert_eq!(outcome.reports.len(), 7);
        assert!(outcome.reports[0].ends_with("reports/data_exploration.txt"));
        assert!(outcome.reports.iter().all(|p| p.exists()));
        assert!(outcome.charts.is_empty());
    }

    #[test]
    fn test_run_with_sqlite() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path(), &ROWS);
        config.database = Some(dir.path().join("shop.db"));

        let outcome = Pipeline::new(config.clone()).run().unwrap();
        assert!(outcome.persisted);

        let sink = SqliteSink::open(&dir.path().join("shop.db")).unwrap();
        assert_eq!(sink.row_count().unwrap(), 2);
    }

    #[test]
    fn test_persistence_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path(), &ROWS));

        let mut sink = FailingSink;
        let outcome = pipeline.run_with_sink(Some(&mut sink)).unwrap();

        assert!(!outcome.persisted);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].starts_with("persistence"));
        assert_eq!(outcome.rfm.records.len(), 1);
    }

    #[test]
    fn test_unopenable_database_is_not_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path(), &ROWS);
        config.database = Some(dir.path().join("missing").join("shop.db"));

        let outcome = Pipeline::new(config).run().unwrap();

        assert!(!outcome.persisted);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].starts_with("persistence failure: "));
        assert!(!outcome.failures[0].contains("persistence: "));
        assert_eq!(outcome.rfm.records.len(), 1);
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_exploration_report_describes_raw_rows() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), &ROWS);
        Pipeline::new(config.clone()).run().unwrap();

        let text =
            std::fs::read_to_string(config.reports_dir().join("data_exploration.txt")).unwrap();
        assert!(text.contains("rows:    4"));
        assert!(text.contains("pv        2"));
        assert!(text.contains("buy       2"));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path(), &[]);
        config.input = dir.path().join("absent.csv");

        let result = Pipeline::new(config).run();
        assert!(matches!(result, Err(PipelineError::Io { .. })));
        assert!(!dir.path().join("processed").exists());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_empty_input_flows_through() {
        let dir = tempdir().unwrap();
        let outcome = Pipeline::new(config_in(dir.path(), &[])).run().unwrap();

        assert!(outcome.dataset.is_empty());
        assert!(outcome.rfm.records.is_empty());
        assert!(outcome.segments.is_empty());
    }

    #[test]
    fn test_analyze_runs_all_stages() {
        let t = |s| Event::timestamp_from_epoch(s).unwrap();
        let dataset = CleanedDataset::new(vec![
            Event { user_id: 1, product_id: 1, category_id: 1, behavior: Behavior::View, time: t(1511577600) },
            Event { user_id: 1, product_id: 1, category_id: 1, behavior: Behavior::Purchase, time: t(1511578600) },
        ]);
        let (scored, segments) = analyze(&dataset).unwrap();
        assert_eq!(scored.records.len(), 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].users, 1);
    }

    #[test]
    fn test_verify_round_trip() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), &ROWS);
        Pipeline::new(config.clone()).run().unwrap();

        let verification = verify(&config.cleaned_csv()).unwrap();
        assert_eq!(verification.rows, 2);
        assert!(verification.is_clean());
    }

    #[test]
    fn test_verify_flags_violations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cleaned.csv");
        std::fs::write(
            &path,
            "5,50,1,buy,2017-11-26 10:00:00,2017-11-26,10,6,purchase\n\
             6,60,1,pv,2017-12-05 10:00:00,2017-12-05,10,1,view\n",
        )
        .unwrap();

        let verification = verify(&path).unwrap();
        assert_eq!(verification.orphan_purchases, 1);
        assert_eq!(verification.out_of_window, 1);
        assert!(!verification.is_clean());
    }
}
