//! Chart rendering with Plotters, plus the HTML conversion funnel
//!
//! Styling lives in a [`ChartStyle`] handed to every chart, so nothing here
//! touches process-wide state.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use polars::prelude::{
    col, len, lit, DataFrame, DataType, IdxSize, IntoLazy, LazyFrame, SortMultipleOptions,
};

use crate::data::{
    behavior_count, cleaned_frame, events_frame, i64_cells, str_cells, u64_cells,
    CLEANED_COLUMNS, RAW_COLUMNS,
};
use crate::error::{PipelineError, Result};
use crate::event::{Behavior, CleanedDataset};
use crate::model::SegmentSummary;
use crate::report::funnel;

type DrawResult = std::result::Result<(), Box<dyn Error>>;

/// Series colors, indexed in behavior funnel order
const BEHAVIOR_COLORS: [RGBColor; 4] = [
    RGBColor(128, 0, 128),
    BLUE,
    GREEN,
    RED,
];

const RFM_COLORS: [RGBColor; 3] = [RED, BLUE, GREEN];

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Fonts and sizes shared by all charts of one run
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub font: String,
    pub caption_size: u32,
    pub label_size: u32,
    pub size: (u32, u32),
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            font: "sans-serif".to_string(),
            caption_size: 30,
            label_size: 15,
            size: (1000, 600),
        }
    }
}

impl ChartStyle {
    fn caption(&self) -> (&str, u32) {
        (self.font.as_str(), self.caption_size)
    }

    fn label(&self) -> (&str, u32) {
        (self.font.as_str(), self.label_size)
    }
}

/// Counts per behavior (funnel order) for each key
pub type BehaviorSeries<K> = BTreeMap<K, [usize; 4]>;

const COUNT: &str = "count";
const RATE: &str = "rate";

fn behavior_index(behavior: Behavior) -> usize {
    Behavior::ALL
        .iter()
        .position(|b| *b == behavior)
        .unwrap_or(0)
}

/// Per-behavior event counts grouped by one cleaned column, sorted by key
fn behavior_table(dataset: &CleanedDataset, key: &str) -> Result<DataFrame> {
    let df = cleaned_frame(dataset)?
        .lazy()
        .group_by([col(key)])
        .agg(Behavior::ALL.map(|b| behavior_count(b).alias(b.label())))
        .sort([key], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

fn behavior_rows(table: &DataFrame) -> Result<Vec<[usize; 4]>> {
    let mut rows = vec![[0usize; 4]; table.height()];
    for (idx, behavior) in Behavior::ALL.iter().enumerate() {
        for (row, count) in u64_cells(table, behavior.label())?.into_iter().enumerate() {
            rows[row][idx] = count as usize;
        }
    }
    Ok(rows)
}

fn int_series(dataset: &CleanedDataset, key: &str, every: u32) -> Result<BehaviorSeries<u32>> {
    let table = behavior_table(dataset, key)?;
    let mut series: BehaviorSeries<u32> = (0..every).map(|k| (k, [0; 4])).collect();
    for (k, counts) in i64_cells(&table, key)?.into_iter().zip(behavior_rows(&table)?) {
        if let Some(k) = k {
            series.insert(k as u32, counts);
        }
    }
    Ok(series)
}

/// Behavior counts per calendar day, keyed by `YYYY-MM-DD`
pub fn daily_series(dataset: &CleanedDataset) -> Result<BehaviorSeries<String>> {
    let key = CLEANED_COLUMNS[5];
    let table = behavior_table(dataset, key)?;
    Ok(str_cells(&table, key)?
        .into_iter()
        .zip(behavior_rows(&table)?)
        .filter_map(|(day, counts)| day.map(|day| (day, counts)))
        .collect())
}

/// Behavior counts per hour of day, every hour present
pub fn hourly_series(dataset: &CleanedDataset) -> Result<BehaviorSeries<u32>> {
    int_series(dataset, CLEANED_COLUMNS[6], 24)
}

/// Behavior counts per weekday (0 = Monday), every weekday present
pub fn weekday_series(dataset: &CleanedDataset) -> Result<BehaviorSeries<u32>> {
    int_series(dataset, CLEANED_COLUMNS[7], 7)
}

/// Highest `value` first, ties broken by ascending `key`
fn ranked(frame: LazyFrame, key: &str, value: &str, n: usize) -> Result<DataFrame> {
    let df = frame
        .sort(
            [value, key],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .limit(IdxSize::try_from(n).unwrap_or(IdxSize::MAX))
        .collect()?;
    Ok(df)
}

fn id_counts(df: &DataFrame, key: &str) -> Result<Vec<(i64, usize)>> {
    Ok(i64_cells(df, key)?
        .into_iter()
        .zip(u64_cells(df, COUNT)?)
        .filter_map(|(id, count)| id.map(|id| (id, count as usize)))
        .collect())
}

/// Most purchased products, ties broken by product id
pub fn top_products(dataset: &CleanedDataset, n: usize) -> Result<Vec<(i64, usize)>> {
    let key = RAW_COLUMNS[1];
    let counts = events_frame(dataset.events())?
        .lazy()
        .filter(col(RAW_COLUMNS[3]).eq(lit(Behavior::Purchase.code())))
        .group_by([col(key)])
        .agg([len().alias(COUNT)]);
    id_counts(&ranked(counts, key, COUNT, n)?, key)
}

/// Categories with the most events of any kind
pub fn top_categories(dataset: &CleanedDataset, n: usize) -> Result<Vec<(i64, usize)>> {
    let key = RAW_COLUMNS[2];
    let counts = events_frame(dataset.events())?
        .lazy()
        .group_by([col(key)])
        .agg([len().alias(COUNT)]);
    id_counts(&ranked(counts, key, COUNT, n)?, key)
}

/// Categories ranked by purchases per view; categories without views are skipped
pub fn top_conversion(dataset: &CleanedDataset, n: usize) -> Result<Vec<(i64, f64)>> {
    let key = RAW_COLUMNS[2];
    let rates = events_frame(dataset.events())?
        .lazy()
        .group_by([col(key)])
        .agg([
            behavior_count(Behavior::View).alias("views"),
            behavior_count(Behavior::Purchase).alias("purchases"),
        ])
        .filter(col("views").gt(lit(0)).and(col("purchases").gt(lit(0))))
        .with_column(
            (col("purchases").cast(DataType::Float64) / col("views").cast(DataType::Float64))
                .alias(RATE),
        );
    let top = ranked(rates, key, RATE, n)?;

    let ids = i64_cells(&top, key)?;
    let values = top.column(RATE)?.as_materialized_series().f64()?.clone();
    Ok(ids
        .into_iter()
        .zip(values.into_iter())
        .filter_map(|(id, rate)| Some((id?, rate?)))
        .collect())
}

fn max_or_one(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::max).max(1.0)
}

fn bar_chart(
    path: &Path,
    style: &ChartStyle,
    title: &str,
    (x_desc, y_desc): (&str, &str),
    bars: &[(String, f64)],
    color: RGBColor,
) -> DrawResult {
    let max_value = max_or_one(bars.iter().map(|(_, v)| *v));
    let root = BitMapBackend::new(path, style.size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, style.caption())
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(bars.len().max(1) as f64 - 0.5), 0f64..(max_value * 1.1))?;

    let label_of = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 {
            bars.get(idx as usize).map(|(l, _)| l.clone()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len().max(1))
        .x_label_formatter(&label_of)
        .x_desc(x_desc)
        .y_desc(y_desc)
        .axis_desc_style(style.label())
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
        let x = i as f64;
        Rectangle::new([(x - 0.3, 0.0), (x + 0.3, *value)], color.filled())
    }))?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
        Text::new(format!("{value}"), (i as f64 - 0.1, *value), style.label())
    }))?;

    root.present()?;
    Ok(())
}

fn behavior_lines(
    path: &Path,
    style: &ChartStyle,
    title: &str,
    x_desc: &str,
    series: &[(String, [usize; 4])],
) -> DrawResult {
    let max_value = max_or_one(series.iter().flat_map(|(_, c)| c.iter().map(|&v| v as f64)));
    let root = BitMapBackend::new(path, style.size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, style.caption())
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..(series.len().max(2) as f64 - 1.0), 0f64..(max_value * 1.1))?;

    let label_of = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 {
            series.get(idx as usize).map(|(l, _)| l.clone()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .x_labels(series.len().max(1))
        .x_label_formatter(&label_of)
        .x_desc(x_desc)
        .y_desc("events")
        .axis_desc_style(style.label())
        .draw()?;

    for (idx, behavior) in Behavior::ALL.iter().enumerate() {
        let color = BEHAVIOR_COLORS[idx];
        chart
            .draw_series(LineSeries::new(
                series.iter().enumerate().map(|(x, (_, c))| (x as f64, c[idx] as f64)),
                color.stroke_width(2),
            ))?
            .label(behavior.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn segment_means_chart(path: &Path, style: &ChartStyle, summaries: &[SegmentSummary]) -> DrawResult {
    let means: Vec<[f64; 3]> = summaries
        .iter()
        .map(|s| [s.mean_recency, s.mean_frequency, s.mean_monetary])
        .collect();
    let max_value = max_or_one(means.iter().flat_map(|m| m.iter().copied()));

    let root = BitMapBackend::new(path, style.size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Mean R/F/M by segment", style.caption())
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(summaries.len() as f64 - 0.5), 0f64..(max_value * 1.2))?;

    let label_of = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 {
            summaries.get(idx as usize).map(|s| s.segment.to_string()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(summaries.len().max(1))
        .x_label_formatter(&label_of)
        .x_desc("segment")
        .y_desc("mean value")
        .axis_desc_style(style.label())
        .draw()?;

    for (dim, name) in ["R", "F", "M"].into_iter().enumerate() {
        let color = RFM_COLORS[dim];
        let offset = (dim as f64 - 1.0) * 0.25;
        chart
            .draw_series(means.iter().enumerate().map(|(i, m)| {
                let x = i as f64 + offset;
                Rectangle::new([(x - 0.12, 0.0), (x + 0.12, m[dim])], color.filled())
            }))?
            .label(name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));

        chart.draw_series(means.iter().enumerate().map(|(i, m)| {
            Text::new(format!("{:.2}", m[dim]), (i as f64 + offset - 0.1, m[dim]), style.label())
        }))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Blue (low) to red (high) on a 1..=5 score scale
fn heat_color(value: f64) -> RGBColor {
    let t = ((value - 1.0) / 4.0).clamp(0.0, 1.0);
    RGBColor((59.0 + t * 121.0) as u8, (76.0 - t * 72.0) as u8, (192.0 - t * 154.0) as u8)
}

fn score_heatmap(path: &Path, style: &ChartStyle, summaries: &[SegmentSummary]) -> DrawResult {
    let root = BitMapBackend::new(path, style.size).into_drawing_area();
    root.fill(&WHITE)?;

    let rows = summaries.len();
    let mut chart = ChartBuilder::on(&root)
        .caption("Mean RFM scores by segment", style.caption())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(140)
        .build_cartesian_2d(0f64..3f64, 0f64..rows.max(1) as f64)?;

    let columns = ["R_score", "F_score", "M_score"];
    let x_label = |x: &f64| {
        let idx = (x - 0.5).round();
        if (x - 0.5 - idx).abs() < 1e-6 && (0.0..3.0).contains(&idx) {
            columns[idx as usize].to_string()
        } else {
            String::new()
        }
    };
    let y_label = |y: &f64| {
        let idx = (y - 0.5).round();
        if (y - 0.5 - idx).abs() < 1e-6 && idx >= 0.0 {
            summaries.get(idx as usize).map(|s| s.segment.to_string()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(6)
        .y_labels(rows.max(1) * 2)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .draw()?;

    for (row, summary) in summaries.iter().enumerate() {
        let values = [summary.mean_r_score, summary.mean_f_score, summary.mean_m_score];
        for (col, value) in values.into_iter().enumerate() {
            let (x, y) = (col as f64, row as f64);
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x, y), (x + 1.0, y + 1.0)],
                heat_color(value).filled(),
            )))?;
            chart.draw_series(std::iter::once(Text::new(
                format!("{value:.2}"),
                (x + 0.4, y + 0.5),
                style.label().into_font().color(&WHITE),
            )))?;
        }
    }

    root.present()?;
    Ok(())
}

/// Render the conversion funnel as a standalone HTML page
///
/// Stages are drawn widest first; hovering a stage shows its count and share.
pub fn funnel_html(dataset: &CleanedDataset) -> String {
    let mut stages = funnel(dataset);
    stages.sort_by(|a, b| b.count.cmp(&a.count));
    let max = stages.iter().map(|s| s.count).max().unwrap_or(0).max(1) as f64;

    let (width, stage_height, gap) = (800.0, 90.0, 6.0);
    let height = stages.len() as f64 * (stage_height + gap);

    let mut svg = String::new();
    for (i, stage) in stages.iter().enumerate() {
        let top = i as f64 * (stage_height + gap);
        let w_top = width * stage.count as f64 / max;
        let w_bottom = stages
            .get(i + 1)
            .map_or(w_top * 0.6, |next| width * next.count as f64 / max);
        let (cx, color) = (width / 2.0, BEHAVIOR_COLORS[behavior_index(stage.behavior)]);
        svg.push_str(&format!(
            r#"<g class="stage"><title>{label}: {count} ({share:.2}%)</title><polygon points="{x0:.1},{top:.1} {x1:.1},{top:.1} {x2:.1},{bottom:.1} {x3:.1},{bottom:.1}" fill="rgb({r},{g},{b})"/><text x="{cx:.1}" y="{ty:.1}" text-anchor="middle" fill="white">{label}: {count} ({share:.2}%)</text></g>
"#,
            label = stage.behavior.label(),
            count = stage.count,
            share = stage.share,
            x0 = cx - w_top / 2.0,
            x1 = cx + w_top / 2.0,
            x2 = cx + w_bottom / 2.0,
            x3 = cx - w_bottom / 2.0,
            bottom = top + stage_height,
            r = color.0,
            g = color.1,
            b = color.2,
            ty = top + stage_height / 2.0 + 5.0,
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>User behavior conversion funnel</title>
<style>
body {{ font-family: sans-serif; text-align: center; }}
.stage:hover polygon {{ opacity: 0.8; }}
</style>
</head>
<body>
<h2>User behavior conversion funnel</h2>
<p>view &rarr; cart &rarr; favorite &rarr; purchase</p>
<svg width="{width}" height="{height}" viewBox="0 0 {width} {height}">
{svg}</svg>
</body>
</html>
"#
    )
}

/// Renders every chart of a run into one directory
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    dir: PathBuf,
    style: ChartStyle,
}

impl ChartRenderer {
    /// Renderer writing into `dir`, created on first use
    pub fn new(dir: impl Into<PathBuf>, style: ChartStyle) -> Self {
        Self {
            dir: dir.into(),
            style,
        }
    }

    fn render(&self, name: &str, draw: impl FnOnce(&Path, &ChartStyle) -> DrawResult) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let path = self.dir.join(name);
        draw(&path, &self.style).map_err(|e| PipelineError::chart(name, e))?;
        tracing::info!(path = %path.display(), "chart saved");
        Ok(path)
    }

    /// Charts describing the cleaned dataset; empty datasets produce none
    pub fn dataset_charts(&self, dataset: &CleanedDataset) -> Result<Vec<PathBuf>> {
        if dataset.is_empty() {
            tracing::warn!("no events to chart");
            return Ok(Vec::new());
        }
        let mut written = Vec::new();

        let behaviors: Vec<(String, f64)> = dataset
            .behavior_counts()
            .iter()
            .map(|(b, c)| (b.label().to_string(), *c as f64))
            .collect();
        written.push(self.render("behavior_distribution.png", |path, style| {
            bar_chart(path, style, "User behavior distribution", ("behavior", "events"), &behaviors, BLUE)
        })?);

        let daily: Vec<(String, [usize; 4])> = daily_series(dataset)?.into_iter().collect();
        written.push(self.render("daily_behavior_trend.png", |path, style| {
            behavior_lines(path, style, "Daily user behavior", "date", &daily)
        })?);

        let hourly: Vec<(String, [usize; 4])> = hourly_series(dataset)?
            .into_iter()
            .map(|(h, c)| (h.to_string(), c))
            .collect();
        written.push(self.render("hourly_behavior_distribution.png", |path, style| {
            behavior_lines(path, style, "User behavior by hour", "hour", &hourly)
        })?);

        let weekly: Vec<(String, [usize; 4])> = weekday_series(dataset)?
            .into_iter()
            .map(|(d, c)| (WEEKDAYS[d as usize % 7].to_string(), c))
            .collect();
        written.push(self.render("weekday_behavior_distribution.png", |path, style| {
            behavior_lines(path, style, "User behavior by weekday", "weekday", &weekly)
        })?);

        let products: Vec<(String, f64)> = top_products(dataset, 10)?
            .into_iter()
            .map(|(id, c)| (id.to_string(), c as f64))
            .collect();
        written.push(self.render("top10_product.png", |path, style| {
            bar_chart(path, style, "Top 10 products by purchases", ("product id", "purchases"), &products, GREEN)
        })?);

        let categories: Vec<(String, f64)> = top_categories(dataset, 10)?
            .into_iter()
            .map(|(id, c)| (id.to_string(), c as f64))
            .collect();
        written.push(self.render("top10_categories.png", |path, style| {
            bar_chart(path, style, "Top 10 categories by events", ("category id", "events"), &categories, BLUE)
        })?);

        let conversion: Vec<(String, f64)> = top_conversion(dataset, 10)?
            .into_iter()
            .map(|(id, rate)| (id.to_string(), (rate * 10_000.0).round() / 10_000.0))
            .collect();
        written.push(self.render("top10_conversion.png", |path, style| {
            bar_chart(path, style, "Top 10 category purchase conversion", ("category id", "purchases per view"), &conversion, RED)
        })?);

        Ok(written)
    }

    /// Charts describing the RFM segments
    pub fn rfm_charts(&self, summaries: &[SegmentSummary]) -> Result<Vec<PathBuf>> {
        if summaries.is_empty() {
            tracing::warn!("no segments to chart");
            return Ok(Vec::new());
        }
        let mut written = Vec::new();

        let sizes: Vec<(String, f64)> = summaries
            .iter()
            .map(|s| (s.segment.to_string(), s.users as f64))
            .collect();
        written.push(self.render("rfm_segment_sizes.png", |path, style| {
            bar_chart(path, style, "Users per segment", ("segment", "users"), &sizes, BLUE)
        })?);

        written.push(self.render("rfm_segment_comparison.png", |path, style| {
            segment_means_chart(path, style, summaries)
        })?);

        written.push(self.render("rfm_heatmap.png", |path, style| {
            score_heatmap(path, style, summaries)
        })?);

        Ok(written)
    }

    /// Write the HTML funnel
    pub fn funnel_page(&self, dataset: &CleanedDataset) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let path = self.dir.join("user_behavior_funnel.html");
        std::fs::write(&path, funnel_html(dataset)).map_err(|e| PipelineError::io(&path, e))?;
        tracing::info!(path = %path.display(), "funnel page saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::model::{compute_rfm, summarize_segments};
    use tempfile::tempdir;

    const T0: i64 = 1511577600; // Saturday 2017-11-25 02:40:00

    fn event(user_id: i64, product_id: i64, category_id: i64, behavior: Behavior, time: i64) -> Event {
        Event {
            user_id,
            product_id,
            category_id,
            behavior,
            time: Event::timestamp_from_epoch(time).unwrap(),
        }
    }

    fn dataset() -> CleanedDataset {
        CleanedDataset::new(vec![
            event(1, 11, 1, Behavior::View, T0),
            event(1, 11, 1, Behavior::Purchase, T0 + 60),
            event(2, 11, 1, Behavior::View, T0 + 3_600),
            event(2, 11, 1, Behavior::Purchase, T0 + 3_700),
            event(2, 12, 2, Behavior::View, T0 + 86_400),
            event(2, 12, 2, Behavior::View, T0 + 86_500),
            event(2, 12, 2, Behavior::Purchase, T0 + 86_600),
            event(3, 13, 3, Behavior::Cart, T0 + 86_400),
        ])
    }

    #[test]
    fn test_time_series() {
        let data = dataset();

        let daily = daily_series(&data).unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily["2017-11-25"], [2, 0, 0, 2]);
        assert_eq!(daily["2017-11-26"], [2, 1, 0, 1]);

        let hourly = hourly_series(&data).unwrap();
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly[&2], [3, 1, 0, 2]);
        assert_eq!(hourly[&3], [1, 0, 0, 1]);
        assert_eq!(hourly[&0], [0, 0, 0, 0]);

        let weekly = weekday_series(&data).unwrap();
        assert_eq!(weekly.len(), 7);
        assert_eq!(weekly[&5], [2, 0, 0, 2]);
        assert_eq!(weekly[&6], [2, 1, 0, 1]);
    }

    #[test]
    fn test_rankings() {
        let data = dataset();
        assert_eq!(top_products(&data, 10).unwrap(), vec![(11, 2), (12, 1)]);
        assert_eq!(top_products(&data, 1).unwrap(), vec![(11, 2)]);
        assert_eq!(top_categories(&data, 10).unwrap(), vec![(1, 4), (2, 3), (3, 1)]);
        assert_eq!(top_conversion(&data, 10).unwrap(), vec![(1, 1.0), (2, 0.5)]);
    }

    #[test]
    fn test_rankings_break_ties_by_id() {
        let data = CleanedDataset::new(vec![
            event(1, 30, 7, Behavior::Purchase, T0),
            event(1, 20, 5, Behavior::Purchase, T0 + 1),
            event(1, 20, 5, Behavior::View, T0 + 2),
            event(1, 30, 7, Behavior::View, T0 + 3),
        ]);
        assert_eq!(top_products(&data, 10).unwrap(), vec![(20, 1), (30, 1)]);
        assert_eq!(top_categories(&data, 1).unwrap(), vec![(5, 2)]);
        assert_eq!(top_conversion(&data, 10).unwrap(), vec![(5, 1.0), (7, 1.0)]);
        assert!(top_products(&CleanedDataset::default(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_funnel_html() {
        let html = funnel_html(&dataset());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("view: 4 (50.00%)"));
        assert!(html.contains("purchase: 3 (37.50%)"));
        assert_eq!(html.matches("<polygon").count(), 4);
    }

    #[test]
    fn test_funnel_page_written() {
        let dir = tempdir().unwrap();
        let renderer = ChartRenderer::new(dir.path().join("charts"), ChartStyle::default());
        let path = renderer.funnel_page(&dataset()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_inputs_render_nothing() {
        let dir = tempdir().unwrap();
        let renderer = ChartRenderer::new(dir.path(), ChartStyle::default());
        assert!(renderer.dataset_charts(&CleanedDataset::default()).unwrap().is_empty());
        assert!(renderer.rfm_charts(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_heat_color_range() {
        assert_eq!(heat_color(1.0), RGBColor(59, 76, 192));
        assert_eq!(heat_color(5.0), RGBColor(180, 4, 38));
        assert_eq!(heat_color(9.0), heat_color(5.0));
    }

    #[test]
    fn test_render_all_charts() {
        let data = dataset();
        let summaries = summarize_segments(&compute_rfm(&data).unwrap().records).unwrap();
        let dir = tempdir().unwrap();
        let renderer = ChartRenderer::new(dir.path(), ChartStyle::default());

        let written = renderer.dataset_charts(&data).unwrap();
        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(
            names,
            [
                "behavior_distribution.png",
                "daily_behavior_trend.png",
                "hourly_behavior_distribution.png",
                "weekday_behavior_distribution.png",
                "top10_product.png",
                "top10_categories.png",
                "top10_conversion.png",
            ]
        );
        assert!(written.iter().all(|p| p.exists()));

        let written = renderer.rfm_charts(&summaries).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));
    }
}
