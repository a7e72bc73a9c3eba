//! ClickForge: clickstream cleaning, conversion reporting and RFM segmentation
//!
//! Raw user-behavior logs (views, cart-adds, favorites, purchases) are cleaned
//! into a validated dataset, summarized into funnel and conversion reports, and
//! scored per user with quantile-based RFM (Recency, Frequency, Monetary)
//! analysis followed by rule-based segmentation.

pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod event;
pub mod logging;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod quantile;
pub mod report;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use clean::{AnalysisWindow, Cleaner, CleaningReport};
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_cleaned_csv, load_raw_events, save_cleaned_csv};
pub use error::PipelineError;
pub use event::{Behavior, CleanedDataset, Event, RawEvent};
pub use model::{compute_rfm, RfmAnalyzer, RfmRecord, ScoredRfm, SegmentSummary};
pub use persist::{PersistenceSink, SqliteSink};
pub use pipeline::{verify, Pipeline, PipelineOutcome};
pub use segment::{segment_for, ScoreTriple, Segment};

/// Common result type used by the binary and CLI helpers
pub type Result<T> = anyhow::Result<T>;
