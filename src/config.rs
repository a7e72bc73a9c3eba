//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML file (or no file at all) yields
//! a runnable configuration:
//!
//! ```toml
//! input = "data/raw/UserBehavior.csv"
//! row_limit = 1000000
//! processed_dir = "data/processed"
//! output_dir = "output"
//! database = "data/ecommerce.db"
//! charts = true
//! log_level = "info"
//!
//! [chart]
//! font = "sans-serif"
//! width = 1000
//! height = 600
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::data::DEFAULT_ROW_LIMIT;
use crate::error::{PipelineError, Result};
use crate::viz::ChartStyle;

/// Log verbosity accepted in the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive spelling understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Chart fonts and canvas size
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub font: String,
    pub caption_size: u32,
    pub label_size: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        let style = ChartStyle::default();
        Self {
            font: style.font,
            caption_size: style.caption_size,
            label_size: style.label_size,
            width: style.size.0,
            height: style.size.1,
        }
    }
}

impl From<&ChartConfig> for ChartStyle {
    fn from(config: &ChartConfig) -> Self {
        Self {
            font: config.font.clone(),
            caption_size: config.caption_size,
            label_size: config.label_size,
            size: (config.width, config.height),
        }
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Headerless raw event CSV
    pub input: PathBuf,

    /// Maximum rows read from the input
    pub row_limit: usize,

    /// Directory for the cleaned CSV and its summary
    pub processed_dir: PathBuf,

    /// Root for `reports/` and `charts/`
    pub output_dir: PathBuf,

    /// SQLite file receiving cleaned rows; persistence is skipped when unset
    pub database: Option<PathBuf>,

    /// Render PNG charts and the HTML funnel
    pub charts: bool,

    pub log_level: LogLevel,

    pub chart: ChartConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/raw/UserBehavior.csv"),
            row_limit: DEFAULT_ROW_LIMIT,
            processed_dir: PathBuf::from("data/processed"),
            output_dir: PathBuf::from("output"),
            database: None,
            charts: true,
            log_level: LogLevel::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        toml::from_str(&contents).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<processed_dir>/cleaned_data.csv`
    pub fn cleaned_csv(&self) -> PathBuf {
        self.processed_dir.join("cleaned_data.csv")
    }

    /// `<processed_dir>/cleaned_data_summary.txt`
    pub fn cleaning_summary(&self) -> PathBuf {
        self.processed_dir.join("cleaned_data_summary.txt")
    }

    /// Text and CSV reports go under `<output_dir>/reports`
    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir.join("reports")
    }

    /// PNG charts and the HTML funnel go under `<output_dir>/charts`
    pub fn charts_dir(&self) -> PathBuf {
        self.output_dir.join("charts")
    }

    /// Chart settings converted for the renderer
    pub fn chart_style(&self) -> ChartStyle {
        ChartStyle::from(&self.chart)
    }
}

impl FromStr for PipelineConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        toml::from_str(s)
    }
}
