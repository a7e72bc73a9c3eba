//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::PipelineConfig;

/// Clickstream cleaning, conversion reporting and RFM segmentation
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the headerless raw event CSV
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// TOML config file; flags given here override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of input rows to read
    #[arg(short, long)]
    pub rows: Option<usize>,

    /// Directory for reports/ and charts/
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Directory for the cleaned CSV and its summary
    #[arg(long)]
    pub processed_dir: Option<PathBuf>,

    /// SQLite database receiving the cleaned rows
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Skip PNG charts and the HTML funnel
    #[arg(long)]
    pub no_charts: bool,

    /// Re-validate an existing cleaned CSV instead of running the pipeline
    /// Example: --verify data/processed/cleaned_data.csv
    #[arg(long, value_name = "CLEANED_CSV")]
    pub verify: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Resolve the run configuration: file (if any), then flag overrides
    pub fn resolve(&self) -> crate::Result<PipelineConfig> {
        let base = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        Ok(self.apply(base))
    }

    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(rows) = self.rows {
            config.row_limit = rows;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.processed_dir {
            config.processed_dir = dir.clone();
        }
        if let Some(db) = &self.db {
            config.database = Some(db.clone());
        }
        if self.no_charts {
            config.charts = false;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "clickforge",
            "--input",
            "events.csv",
            "--rows",
            "1000",
            "--db",
            "shop.db",
            "--no-charts",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.input, Some(PathBuf::from("events.csv")));
        assert_eq!(args.rows, Some(1000));
        assert!(args.no_charts);
        assert!(args.verbose);
        assert!(args.verify.is_none());
    }

    #[test]
    fn test_apply_overrides_only_given_flags() {
        let args = Args {
            rows: Some(10),
            db: Some(PathBuf::from("x.db")),
            ..Default::default()
        };
        let base = PipelineConfig {
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };

        let config = args.apply(base);
        assert_eq!(config.row_limit, 10);
        assert_eq!(config.database, Some(PathBuf::from("x.db")));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(config.charts);
    }

    #[test]
    fn test_resolve_without_config_file() {
        let config = Args::default().resolve().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_invalid_rows_rejected() {
        assert!(Args::try_parse_from(["clickforge", "--rows", "lots"]).is_err());
    }
}
