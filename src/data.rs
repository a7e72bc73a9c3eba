//! Clickstream CSV loading and cleaned-data export using Polars

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::event::{Behavior, CleanedDataset, Event, RawEvent, DATE_FORMAT, TIME_FORMAT};

/// Default cap on rows read from the raw log
pub const DEFAULT_ROW_LIMIT: usize = 1_000_000;

/// Column names of the raw log, in file order
pub const RAW_COLUMNS: [&str; 5] = [
    "user_id",
    "product_id",
    "product_category_id",
    "behavior_type",
    "time",
];

/// Column names of the cleaned export, in file order
pub const CLEANED_COLUMNS: [&str; 9] = [
    "user_id",
    "product_id",
    "product_category_id",
    "behavior_type",
    "time",
    "date",
    "hour",
    "weekday",
    "behavior",
];

fn raw_schema() -> Schema {
    Schema::from_iter([
        Field::new(RAW_COLUMNS[0].into(), DataType::Int64),
        Field::new(RAW_COLUMNS[1].into(), DataType::Int64),
        Field::new(RAW_COLUMNS[2].into(), DataType::Int64),
        Field::new(RAW_COLUMNS[3].into(), DataType::String),
        Field::new(RAW_COLUMNS[4].into(), DataType::Int64),
    ])
}

fn cleaned_schema() -> Schema {
    Schema::from_iter([
        Field::new(CLEANED_COLUMNS[0].into(), DataType::Int64),
        Field::new(CLEANED_COLUMNS[1].into(), DataType::Int64),
        Field::new(CLEANED_COLUMNS[2].into(), DataType::Int64),
        Field::new(CLEANED_COLUMNS[3].into(), DataType::String),
        Field::new(CLEANED_COLUMNS[4].into(), DataType::String),
        Field::new(CLEANED_COLUMNS[5].into(), DataType::String),
        Field::new(CLEANED_COLUMNS[6].into(), DataType::Int64),
        Field::new(CLEANED_COLUMNS[7].into(), DataType::Int64),
        Field::new(CLEANED_COLUMNS[8].into(), DataType::String),
    ])
}

/// Read a headerless CSV into a DataFrame with a fixed schema
///
/// Cells that fail to parse become nulls so the cleaner can count them as
/// missing values. An empty file yields an empty frame.
fn read_headerless(path: &Path, schema: Schema, row_limit: Option<usize>) -> Result<DataFrame> {
    let Some(file) = open_non_empty(path)? else {
        return Ok(DataFrame::empty_with_schema(&schema));
    };

    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_schema(Some(Arc::new(schema)))
        .with_n_rows(row_limit)
        .with_ignore_errors(true)
        .into_reader_with_file_handle(file)
        .finish()?;

    Ok(df)
}

/// Open `path`, mapping failures to an Io error; `None` for a zero-byte file
fn open_non_empty(path: &Path) -> Result<Option<File>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let size = file
        .metadata()
        .map_err(|e| PipelineError::io(path, e))?
        .len();
    Ok((size > 0).then_some(file))
}

/// True for rows with at least one non-null cell; blank lines parse as all-null
fn any_cell_present() -> Expr {
    RAW_COLUMNS
        .iter()
        .map(|name| col(*name).is_not_null())
        .reduce(|acc, present| acc.or(present))
        .unwrap_or_else(|| lit(true))
}

pub(crate) fn i64_cells(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    Ok(df
        .column(name)?
        .as_materialized_series()
        .i64()?
        .into_iter()
        .collect())
}

pub(crate) fn u64_cells(df: &DataFrame, name: &str) -> Result<Vec<u64>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;
    Ok(series.u64()?.into_iter().map(|v| v.unwrap_or(0)).collect())
}

pub(crate) fn str_cells(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|cell| cell.map(str::to_string))
        .collect())
}

/// Number of rows whose behavior code is `behavior`, for use inside `agg`
pub fn behavior_count(behavior: Behavior) -> Expr {
    col(RAW_COLUMNS[3])
        .eq(lit(behavior.code()))
        .cast(DataType::UInt64)
        .sum()
}

/// Load the raw behavior log as a frame
///
/// # Arguments
/// * `path` - Headerless CSV with columns user_id, product_id, category_id, behavior_type, epoch seconds
/// * `row_limit` - Maximum number of rows to keep
///
/// # Returns
/// * Frame with the [`RAW_COLUMNS`] schema. Unparseable cells are null; blank
///   lines are skipped and do not count toward the limit.
pub fn load_raw_frame(path: &Path, row_limit: usize) -> Result<DataFrame> {
    if open_non_empty(path)?.is_none() {
        tracing::info!(path = %path.display(), "raw input is empty");
        return Ok(DataFrame::empty_with_schema(&raw_schema()));
    }

    let limit = IdxSize::try_from(row_limit).unwrap_or(IdxSize::MAX);
    let df = LazyCsvReader::new(path)
        .with_has_header(false)
        .with_schema(Some(Arc::new(raw_schema())))
        .with_ignore_errors(true)
        .finish()?
        .filter(any_cell_present())
        .limit(limit)
        .collect()?;

    tracing::info!(
        path = %path.display(),
        rows = df.height(),
        row_limit,
        "loaded raw events"
    );
    Ok(df)
}

/// Load the raw behavior log as [`RawEvent`] rows in file order
pub fn load_raw_events(path: &Path, row_limit: usize) -> Result<Vec<RawEvent>> {
    raw_events(&load_raw_frame(path, row_limit)?)
}

/// Convert a raw frame into rows, keeping nulls as `None`
pub fn raw_events(df: &DataFrame) -> Result<Vec<RawEvent>> {
    let user_ids = i64_cells(df, RAW_COLUMNS[0])?;
    let product_ids = i64_cells(df, RAW_COLUMNS[1])?;
    let category_ids = i64_cells(df, RAW_COLUMNS[2])?;
    let behaviors = str_cells(df, RAW_COLUMNS[3])?;
    let times = i64_cells(df, RAW_COLUMNS[4])?;

    Ok(user_ids
        .into_iter()
        .zip(product_ids)
        .zip(category_ids)
        .zip(behaviors)
        .zip(times)
        .map(
            |((((user_id, product_id), category_id), behavior_type), time)| RawEvent {
                user_id,
                product_id,
                category_id,
                behavior_type,
                time,
            },
        )
        .collect())
}

/// Build a raw frame from in-memory rows
pub fn raw_frame(rows: &[RawEvent]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Column::new(
            RAW_COLUMNS[0].into(),
            rows.iter().map(|r| r.user_id).collect::<Vec<Option<i64>>>(),
        ),
        Column::new(
            RAW_COLUMNS[1].into(),
            rows.iter().map(|r| r.product_id).collect::<Vec<Option<i64>>>(),
        ),
        Column::new(
            RAW_COLUMNS[2].into(),
            rows.iter().map(|r| r.category_id).collect::<Vec<Option<i64>>>(),
        ),
        Column::new(
            RAW_COLUMNS[3].into(),
            rows.iter()
                .map(|r| r.behavior_type.clone())
                .collect::<Vec<Option<String>>>(),
        ),
        Column::new(
            RAW_COLUMNS[4].into(),
            rows.iter().map(|r| r.time).collect::<Vec<Option<i64>>>(),
        ),
    ])?;
    Ok(df)
}

/// Raw-schema frame of validated events, time as epoch seconds
pub fn events_frame(events: &[Event]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Column::new(
            RAW_COLUMNS[0].into(),
            events.iter().map(|e| e.user_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            RAW_COLUMNS[1].into(),
            events.iter().map(|e| e.product_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            RAW_COLUMNS[2].into(),
            events.iter().map(|e| e.category_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            RAW_COLUMNS[3].into(),
            events
                .iter()
                .map(|e| e.behavior.code().to_string())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            RAW_COLUMNS[4].into(),
            events
                .iter()
                .map(|e| e.time.and_utc().timestamp())
                .collect::<Vec<i64>>(),
        ),
    ])?;
    Ok(df)
}

/// Convert a raw-schema frame into events
///
/// Fails on nulls, unknown behavior codes and unrepresentable timestamps, so
/// only frames that went through cleaning should be passed in.
pub fn frame_events(df: &DataFrame) -> Result<Vec<Event>> {
    raw_events(df)?
        .into_iter()
        .enumerate()
        .map(|(row, raw)| {
            let (Some(user_id), Some(product_id), Some(category_id), Some(code), Some(secs)) = (
                raw.user_id,
                raw.product_id,
                raw.category_id,
                raw.behavior_type,
                raw.time,
            ) else {
                return Err(PipelineError::malformed(row, "missing value"));
            };
            let behavior = Behavior::from_code(&code)
                .ok_or_else(|| PipelineError::malformed(row, format!("unknown behavior '{code}'")))?;
            let time = Event::timestamp_from_epoch(secs)
                .ok_or_else(|| PipelineError::malformed(row, format!("timestamp {secs} out of range")))?;
            Ok(Event {
                user_id,
                product_id,
                category_id,
                behavior,
                time,
            })
        })
        .collect()
}

/// Build the cleaned export frame: raw columns plus derived date, hour, weekday and label
pub fn cleaned_frame(dataset: &CleanedDataset) -> Result<DataFrame> {
    let events = dataset.events();

    let df = DataFrame::new(vec![
        Column::new(
            CLEANED_COLUMNS[0].into(),
            events.iter().map(|e| e.user_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[1].into(),
            events.iter().map(|e| e.product_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[2].into(),
            events.iter().map(|e| e.category_id).collect::<Vec<i64>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[3].into(),
            events
                .iter()
                .map(|e| e.behavior.code().to_string())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[4].into(),
            events
                .iter()
                .map(|e| e.time.format(TIME_FORMAT).to_string())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[5].into(),
            events
                .iter()
                .map(|e| e.date().format(DATE_FORMAT).to_string())
                .collect::<Vec<String>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[6].into(),
            events.iter().map(|e| e.hour() as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[7].into(),
            events.iter().map(|e| e.weekday() as i64).collect::<Vec<i64>>(),
        ),
        Column::new(
            CLEANED_COLUMNS[8].into(),
            events
                .iter()
                .map(|e| e.behavior.label().to_string())
                .collect::<Vec<String>>(),
        ),
    ])?;

    Ok(df)
}

/// Write a DataFrame as CSV, creating parent directories
pub fn write_csv(df: &mut DataFrame, path: &Path, header: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let mut file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    CsvWriter::new(&mut file).include_header(header).finish(df)?;
    Ok(())
}

/// Save the cleaned dataset as a headerless CSV
pub fn save_cleaned_csv(dataset: &CleanedDataset, path: &Path) -> Result<()> {
    let mut df = cleaned_frame(dataset)?;
    write_csv(&mut df, path, false)?;
    tracing::info!(path = %path.display(), rows = dataset.len(), "saved cleaned data");
    Ok(())
}

/// Load a cleaned CSV previously written by [`save_cleaned_csv`]
///
/// The timestamp is taken from the `time` column and the behavior from the raw
/// code; the derived columns are recomputed, not trusted.
pub fn load_cleaned_csv(path: &Path) -> Result<CleanedDataset> {
    let df = read_headerless(path, cleaned_schema(), None)?;

    let user_ids = i64_cells(&df, CLEANED_COLUMNS[0])?;
    let product_ids = i64_cells(&df, CLEANED_COLUMNS[1])?;
    let category_ids = i64_cells(&df, CLEANED_COLUMNS[2])?;
    let codes = str_cells(&df, CLEANED_COLUMNS[3])?;
    let times = str_cells(&df, CLEANED_COLUMNS[4])?;

    let mut events = Vec::with_capacity(user_ids.len());
    for (row, ((((user_id, product_id), category_id), code), time)) in user_ids
        .into_iter()
        .zip(product_ids)
        .zip(category_ids)
        .zip(codes)
        .zip(times)
        .enumerate()
    {
        let (Some(user_id), Some(product_id), Some(category_id), Some(code), Some(time)) =
            (user_id, product_id, category_id, code, time)
        else {
            return Err(PipelineError::malformed(row, "missing value"));
        };

        let behavior = Behavior::from_code(&code)
            .ok_or_else(|| PipelineError::malformed(row, format!("unknown behavior '{code}'")))?;
        let time = NaiveDateTime::parse_from_str(&time, TIME_FORMAT)
            .map_err(|e| PipelineError::malformed(row, format!("bad time '{time}': {e}")))?;

        events.push(Event {
            user_id,
            product_id,
            category_id,
            behavior,
            time,
        });
    }

    tracing::info!(path = %path.display(), rows = events.len(), "loaded cleaned data");
    Ok(CleanedDataset::new(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1,101,10,pv,1511577600").unwrap();
        writeln!(file, "1,101,10,buy,1511578600").unwrap();
        writeln!(file, "2,,10,pv,1511577700").unwrap();
        writeln!(file, "3,300,30,cart,not_a_time").unwrap();
        writeln!(file, "4,400,40,fav,1511600000").unwrap();
        file
    }

    #[test]
    fn test_load_raw_events() {
        let file = create_test_csv();
        let events = load_raw_events(file.path(), DEFAULT_ROW_LIMIT).unwrap();

        assert_eq!(events.len(), 5);
        assert_eq!(events[0], RawEvent::new(1, 101, 10, "pv", 1511577600));
        assert_eq!(events[2].product_id, None);
        assert_eq!(events[3].time, None);
        assert_eq!(events[4].behavior_type.as_deref(), Some("fav"));
    }

    #[test]
    fn test_row_limit() {
        let file = create_test_csv();
        let events = load_raw_events(file.path(), 2).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = load_raw_events(&dir.path().join("absent.csv"), DEFAULT_ROW_LIMIT);
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let events = load_raw_events(file.path(), DEFAULT_ROW_LIMIT).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_cleaned_round_trip() {
        let t = |s| Event::timestamp_from_epoch(s).unwrap();
        let dataset = CleanedDataset::new(vec![
            Event { user_id: 1, product_id: 101, category_id: 10, behavior: Behavior::View, time: t(1511577600) },
            Event { user_id: 1, product_id: 101, category_id: 10, behavior: Behavior::Purchase, time: t(1511578600) },
        ]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("processed").join("cleaned_data.csv");
        save_cleaned_csv(&dataset, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let first = content.lines().next().unwrap();
        assert_eq!(first, "1,101,10,pv,2017-11-25 02:40:00,2017-11-25,2,5,view");

        let loaded = load_cleaned_csv(&path).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn test_load_cleaned_rejects_unknown_code() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1,101,10,zz,2017-11-25 02:40:00,2017-11-25,2,5,view").unwrap();
        let result = load_cleaned_csv(file.path());
        assert!(matches!(result, Err(PipelineError::MalformedRow { row: 0, .. })));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1,101,10,pv,1511577600").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "3,300,30,cart,1511577700").unwrap();
        writeln!(file, "4,400,40,fav,1511577800").unwrap();

        let events = load_raw_events(file.path(), DEFAULT_ROW_LIMIT).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(RawEvent::is_complete));

        // the blank line does not use up the row limit
        let limited = load_raw_events(file.path(), 2).unwrap();
        assert_eq!(limited[1].user_id, Some(3));
    }

    #[test]
    fn test_events_frame_round_trip() {
        let t = |s| Event::timestamp_from_epoch(s).unwrap();
        let events = vec![
            Event { user_id: 1, product_id: 101, category_id: 10, behavior: Behavior::Favorite, time: t(1511577600) },
            Event { user_id: 2, product_id: 202, category_id: 20, behavior: Behavior::Cart, time: t(1511578600) },
        ];
        let df = events_frame(&events).unwrap();
        assert_eq!(df.get_column_names().len(), RAW_COLUMNS.len());
        assert_eq!(frame_events(&df).unwrap(), events);
    }

    #[test]
    fn test_frame_events_rejects_nulls() {
        let df = raw_frame(&[RawEvent::default()]).unwrap();
        assert!(matches!(
            frame_events(&df),
            Err(PipelineError::MalformedRow { row: 0, .. })
        ));
    }
}
