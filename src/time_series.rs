//! Hourly time series: the modelled timeline and the column-oriented frames read from input CSVs.
//!
//! All timestamps are in UTC. February 29th never appears in the timeline, so every modelled year
//! has 8760 hours.
use crate::error::InputError;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

/// The number of hours in a day
const HOURS_PER_DAY: u32 = 24;

/// The format in which timestamps are written to CSV files
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats accepted when reading naive (offset-free) timestamps
const NAIVE_TIMESTAMP_FORMATS: [&str; 3] =
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Separator used to join the levels of a multi-level column header
pub const COLUMN_LEVEL_SEPARATOR: &str = "::";

/// The temporal resolution of the model, in whole hours.
///
/// The number of hours must divide 24 so that every interval starts on a day boundary grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    hours: u32,
}

impl Resolution {
    /// Create a resolution from a number of hours
    pub fn from_hours(hours: u32) -> Result<Self> {
        ensure!(
            hours > 0 && HOURS_PER_DAY % hours == 0,
            "Resolution must be a number of hours dividing 24, got {hours}H"
        );

        Ok(Self { hours })
    }

    /// The number of hours per interval
    pub fn hours(self) -> u32 {
        self.hours
    }

    /// The length of one interval in hours, as used in energy sums
    pub fn interval_hours(self) -> f64 {
        self.hours as f64
    }

    /// The start of the interval containing `timestamp`
    fn floor(self, timestamp: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let step = i64::from(self.hours) * 3600;
        let secs = timestamp.timestamp().div_euclid(step) * step;
        DateTime::from_timestamp(secs, 0).context("Timestamp out of range")
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self { hours: 1 }
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let hours = s
            .trim()
            .strip_suffix(['H', 'h'])
            .with_context(|| format!("Resolution must look like '3H', got '{s}'"))?;
        let hours = hours
            .parse()
            .with_context(|| format!("Invalid number of hours in resolution '{s}'"))?;

        Self::from_hours(hours)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}H", self.hours)
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Whether the given date is February 29th
fn is_leap_day(date: NaiveDate) -> bool {
    date.month() == 2 && date.day() == 29
}

/// Parse a timestamp from an input file.
///
/// Timestamps with an offset are converted to UTC; naive timestamps are taken to be UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp for output files
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// The ordered set of timestamps covered by a model run
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    timestamps: Vec<DateTime<Utc>>,
    resolution: Resolution,
    years: IndexMap<i32, Range<usize>>,
}

impl Timeline {
    /// Build the timeline for climate years `start..=end`
    pub fn new(start: i32, end: i32, resolution: Resolution) -> Result<Self> {
        ensure!(
            start <= end,
            "First climate year ({start}) is after last climate year ({end})"
        );

        let mut timestamps = Vec::new();
        let mut years = IndexMap::new();
        for year in start..=end {
            let first = timestamps.len();
            let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)
                .with_context(|| format!("Invalid climate year {year}"))?;
            for date in jan1.iter_days().take_while(|date| date.year() == year) {
                if is_leap_day(date) {
                    continue;
                }

                for hour in (0..HOURS_PER_DAY).step_by(resolution.hours() as usize) {
                    let naive = date.and_hms_opt(hour, 0, 0).context("Invalid hour")?;
                    timestamps.push(naive.and_utc());
                }
            }
            years.insert(year, first..timestamps.len());
        }

        Ok(Self {
            timestamps,
            resolution,
            years,
        })
    }

    /// The timestamps of the start of each interval
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// The number of intervals
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the timeline is empty
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The temporal resolution
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The length of one interval in hours
    pub fn interval_hours(&self) -> f64 {
        self.resolution.interval_hours()
    }

    /// The index ranges covered by each climate year, in order
    pub fn years(&self) -> impl Iterator<Item = (i32, Range<usize>)> + '_ {
        self.years.iter().map(|(year, range)| (*year, range.clone()))
    }

    /// The number of climate years
    pub fn num_years(&self) -> usize {
        self.years.len()
    }

    /// The first and last climate year
    pub fn year_span(&self) -> (i32, i32) {
        let first = self.years.first().map_or(0, |(year, _)| *year);
        let last = self.years.last().map_or(0, |(year, _)| *year);
        (first, last)
    }
}

/// A set of named f64 columns sharing a timestamp index
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeriesFrame {
    index: Vec<DateTime<Utc>>,
    columns: IndexMap<String, Vec<f64>>,
}

impl TimeSeriesFrame {
    /// Create an empty frame with the given index
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            columns: IndexMap::new(),
        }
    }

    /// The timestamp index
    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    /// The number of rows
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the frame has no rows
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The names of the columns, in order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterate over columns
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Get a column by name
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Whether the frame contains a column
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Add or replace a column
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        ensure!(
            values.len() == self.index.len(),
            "Column {name} has {} values but the index has {}",
            values.len(),
            self.index.len()
        );
        self.columns.insert(name, values);

        Ok(())
    }

    /// Mean value of every column
    pub fn column_means(&self) -> IndexMap<String, f64> {
        self.columns
            .iter()
            .map(|(name, values)| (name.clone(), mean(values)))
            .collect()
    }

    /// Read a frame from a CSV file with a single header row
    pub fn read_csv(path: &Path) -> Result<Self> {
        Self::read_csv_with_header_rows(path, 1)
    }

    /// Read a frame from a CSV file whose header spans `header_rows` rows.
    ///
    /// The first column holds the timestamps. Multi-level column names are joined with
    /// [`COLUMN_LEVEL_SEPARATOR`]. Empty cells are read as NaN.
    pub fn read_csv_with_header_rows(path: &Path, header_rows: usize) -> Result<Self> {
        ensure!(header_rows > 0, "At least one header row is required");
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Could not open {}", path.display()))?;

        let mut records = reader.records();
        let mut headers: Vec<Vec<String>> = Vec::new();
        for _ in 0..header_rows {
            let record = records
                .next()
                .with_context(|| format!("{} has too few header rows", path.display()))??;
            headers.push(record.iter().skip(1).map(str::to_string).collect());
        }
        let names: Vec<String> = (0..headers[0].len())
            .map(|i| {
                headers
                    .iter()
                    .map(|level| level.get(i).map_or("", String::as_str))
                    .collect::<Vec<_>>()
                    .join(COLUMN_LEVEL_SEPARATOR)
            })
            .collect();

        let mut index = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
        for (row, record) in records.enumerate() {
            let record = record?;
            let first = record.get(0).unwrap_or_default();
            let Some(timestamp) = parse_timestamp(first) else {
                // Spacer rows (e.g. an index-name row under a multi-level header) are skipped
                if record.iter().skip(1).all(|cell| cell.trim().is_empty()) {
                    continue;
                }
                return Err(InputError::inconsistent(
                    path,
                    format!("invalid timestamp '{first}' in data row {}", row + 1),
                )
                .into());
            };
            index.push(timestamp);

            for (i, column) in values.iter_mut().enumerate() {
                let cell = record.get(i + 1).unwrap_or_default().trim();
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse().with_context(|| {
                        format!("Invalid number '{cell}' in {}", path.display())
                    })?
                };
                column.push(value);
            }
        }

        ensure!(
            index.windows(2).all(|w| w[0] < w[1]),
            InputError::inconsistent(path, "timestamps are not strictly increasing")
        );

        Ok(Self {
            index,
            columns: names.into_iter().zip(values).collect(),
        })
    }

    /// Write the frame to a CSV file, labelling the index column with `index_label`
    pub fn write_csv(&self, path: &Path, index_label: &str) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(std::iter::once(index_label).chain(self.column_names()))?;
        for (row, timestamp) in self.index.iter().enumerate() {
            let mut record = vec![format_timestamp(timestamp)];
            record.extend(self.columns.values().map(|values| format_value(values[row])));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Write the frame with a multi-level header, one row per entry of `index_labels`.
    ///
    /// Column names are split at [`COLUMN_LEVEL_SEPARATOR`]; missing levels are left empty.
    pub fn write_multi_level_csv(&self, path: &Path, index_labels: &[&str]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let levels: Vec<Vec<&str>> = self
            .column_names()
            .map(|name| name.split(COLUMN_LEVEL_SEPARATOR).collect())
            .collect();
        for (depth, label) in index_labels.iter().enumerate() {
            let header = levels
                .iter()
                .map(|parts| parts.get(depth).copied().unwrap_or_default());
            writer.write_record(std::iter::once(*label).chain(header))?;
        }
        for (row, timestamp) in self.index.iter().enumerate() {
            let mut record = vec![format_timestamp(timestamp)];
            record.extend(self.columns.values().map(|values| format_value(values[row])));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// The first and last calendar year in the index
    pub fn year_span(&self) -> Option<(i32, i32)> {
        Some((self.index.first()?.year(), self.index.last()?.year()))
    }

    /// Keep only the rows satisfying `predicate`
    fn retain_rows(&self, predicate: impl Fn(&DateTime<Utc>) -> bool) -> Self {
        let keep: Vec<bool> = self.index.iter().map(predicate).collect();

        Self {
            index: filter_by(&self.index, &keep),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), filter_by(values, &keep)))
                .collect(),
        }
    }

    /// Keep only the rows in climate years `start..=end`
    pub fn filter_years(&self, start: i32, end: i32) -> Self {
        self.retain_rows(|timestamp| (start..=end).contains(&timestamp.year()))
    }

    /// Remove every row falling on February 29th
    pub fn drop_leap_days(&self) -> Self {
        self.retain_rows(|timestamp| !is_leap_day(timestamp.date_naive()))
    }

    /// Resample to `resolution` by averaging the values in each interval.
    ///
    /// Intervals are aligned to midnight. Missing values are ignored; an interval with no values
    /// at all yields NaN.
    pub fn resample_mean(&self, resolution: Resolution) -> Result<Self> {
        let mut index: Vec<DateTime<Utc>> = Vec::new();
        let mut bins: Vec<Range<usize>> = Vec::new();
        for (row, timestamp) in self.index.iter().enumerate() {
            let start = resolution.floor(*timestamp)?;
            if index.last() == Some(&start) {
                if let Some(bin) = bins.last_mut() {
                    bin.end = row + 1;
                }
            } else {
                index.push(start);
                bins.push(row..row + 1);
            }
        }

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let resampled = bins.iter().map(|bin| mean(&values[bin.clone()])).collect();
                (name.clone(), resampled)
            })
            .collect();

        Ok(Self { index, columns })
    }

    /// Get a column which must be present and have no missing values
    pub fn required_column(&self, path: &Path, name: &str) -> Result<&[f64], InputError> {
        let values = self
            .column(name)
            .ok_or_else(|| InputError::missing_column(path, name))?;
        if let Some(row) = values.iter().position(|value| value.is_nan()) {
            return Err(InputError::inconsistent(
                path,
                format!(
                    "column '{name}' has a missing value at {}",
                    format_timestamp(&self.index[row])
                ),
            ));
        }

        Ok(values)
    }

    /// Check that no column outside `sparse_columns` contains missing values
    pub fn check_complete(&self, path: &Path, sparse_columns: &[&str]) -> Result<(), InputError> {
        for (name, values) in &self.columns {
            if sparse_columns.contains(&name.as_str()) {
                continue;
            }
            if let Some(row) = values.iter().position(|value| value.is_nan()) {
                return Err(InputError::inconsistent(
                    path,
                    format!(
                        "column '{name}' has a missing value at {}",
                        format_timestamp(&self.index[row])
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Check that the frame covers exactly the timestamps of the timeline
    pub fn check_matches_timeline(
        &self,
        path: &Path,
        timeline: &Timeline,
    ) -> Result<(), InputError> {
        if self.index.as_slice() == timeline.timestamps() {
            return Ok(());
        }

        let reason = match self
            .index
            .iter()
            .zip(timeline.timestamps())
            .find(|(actual, expected)| actual != expected)
        {
            Some((actual, expected)) => format!(
                "expected timestamp {} but found {}",
                format_timestamp(expected),
                format_timestamp(actual)
            ),
            None => format!(
                "expected {} time steps but found {}",
                timeline.len(),
                self.index.len()
            ),
        };

        Err(InputError::inconsistent(path, reason))
    }
}

/// Mean of the non-NaN values, or NaN if there are none
fn mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

fn filter_by<T: Clone>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, keep)| **keep)
        .map(|(value, _)| value.clone())
        .collect()
}

/// Format a value for a CSV cell, writing NaN as an empty cell
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
