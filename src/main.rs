//! ClickForge: clickstream cleaning and RFM segmentation CLI
//!
//! This is the main entrypoint that resolves configuration, then either runs
//! the full pipeline or re-validates an existing cleaned CSV.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use clickforge::{logging, verify, Args, Pipeline, PipelineOutcome};
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve().context("failed to resolve configuration")?;
    logging::init(config.log_level, args.verbose);

    if args.verbose {
        println!("ClickForge - Clickstream cleaning and RFM segmentation");
        println!("======================================================\n");
    }

    if let Some(path) = &args.verify {
        run_verification(path)
    } else {
        run_full_pipeline(Pipeline::new(config), args.verbose)
    }
}

/// Re-validate a cleaned CSV written by an earlier run
fn run_verification(path: &Path) -> Result<()> {
    println!("=== Verification ===");
    let verification =
        verify(path).with_context(|| format!("cannot verify {}", path.display()))?;

    println!("Rows: {}", verification.rows);
    println!("Outside analysis window: {}", verification.out_of_window);
    println!("Purchases without prior view: {}", verification.orphan_purchases);

    if verification.is_clean() {
        println!("\n✓ Cleaned data satisfies all cleaning rules");
        Ok(())
    } else {
        anyhow::bail!("cleaned data at {} violates cleaning rules", path.display())
    }
}

/// Run the full cleaning, reporting and segmentation pipeline
fn run_full_pipeline(pipeline: Pipeline, verbose: bool) -> Result<()> {
    println!("=== Clickstream Pipeline ===\n");

    let config = pipeline.config();
    if verbose {
        println!("Input file: {}", config.input.display());
        println!("Row limit: {}", config.row_limit);
        match &config.database {
            Some(db) => println!("Database: {}", db.display()),
            None => println!("Database: disabled"),
        }
        println!();
    }

    let start_time = Instant::now();
    let outcome = pipeline
        .run()
        .with_context(|| format!("pipeline failed for {}", config.input.display()))?;

    print_summary(&outcome, verbose);

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Reports saved to: {}", config.reports_dir().display());
    if config.charts {
        println!("Charts saved to: {}", config.charts_dir().display());
    }

    Ok(())
}

fn print_summary(outcome: &PipelineOutcome, verbose: bool) {
    let cleaning = &outcome.cleaning;
    println!(
        "✓ Data cleaned: {} of {} rows kept",
        cleaning.rows_out, cleaning.rows_in
    );
    if verbose {
        println!("  Missing values removed: {}", cleaning.missing_rows);
        println!("  Duplicates removed: {}", cleaning.duplicate_rows);
        println!("  Outside analysis window: {}", cleaning.out_of_window);
        println!("  Unknown behavior codes: {}", cleaning.unknown_behavior);
        println!("  Purchases without view: {}", cleaning.orphan_purchases);
        println!("  Load time: {:.2}s", outcome.timings.load.as_secs_f64());
        println!("  Cleaning time: {:.2}s", outcome.timings.clean.as_secs_f64());
    }

    if outcome.persisted {
        println!("✓ Cleaned rows persisted");
    }

    let rfm = &outcome.rfm;
    println!("✓ RFM scored: {} purchasing users", rfm.records.len());
    if verbose {
        if let Some(anchor) = rfm.anchor_date {
            println!("  Anchor date: {anchor}");
        }
        println!(
            "  Realized buckets: R={}, F={}, M={}",
            rfm.buckets.recency, rfm.buckets.frequency, rfm.buckets.monetary
        );
        println!("  RFM time: {:.2}s", outcome.timings.rfm.as_secs_f64());
    }

    if !outcome.segments.is_empty() {
        println!("\n=== Segment Statistics ===");
        for summary in &outcome.segments {
            println!(
                "{}: {} users ({:.1}%)",
                summary.segment, summary.users, summary.share
            );
        }
    }

    if !outcome.charts.is_empty() {
        println!("\n✓ {} charts generated", outcome.charts.len());
        if verbose {
            println!("  Chart time: {:.2}s", outcome.timings.charts.as_secs_f64());
        }
    }

    for failure in &outcome.failures {
        println!("! {failure}");
    }
}
