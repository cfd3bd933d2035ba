//! Process-wide cache of time series frames which have already been brought onto a timeline.
//!
//! Sensitivity sweeps load the same scenario files many times over, usually with the same climate
//! years and resolution, so frames are cached by file path and parse parameters. Cached frames are
//! never mutated.
use crate::error::InputError;
use crate::time_series::{Resolution, TimeSeriesFrame, Timeline};
use anyhow::{Result, ensure};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FrameKey {
    path: PathBuf,
    header_rows: usize,
    start: i32,
    end: i32,
    resolution: Resolution,
}

type FrameCache = Mutex<HashMap<FrameKey, Arc<TimeSeriesFrame>>>;

static FRAME_CACHE: OnceLock<FrameCache> = OnceLock::new();

fn frame_cache() -> &'static FrameCache {
    FRAME_CACHE.get_or_init(Default::default)
}

/// Remove all cached frames
pub fn clear_frame_cache() {
    frame_cache()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Load a time series file onto `timeline`.
///
/// The file must cover all of the timeline's climate years. Its rows are restricted to those
/// years, averaged onto the timeline's resolution and stripped of February 29th. The result must
/// have exactly the timeline's timestamps. Missing values are left for the caller to check, as
/// some columns are allowed to be sparse.
pub fn load_frame(
    path: &Path,
    header_rows: usize,
    timeline: &Timeline,
) -> Result<Arc<TimeSeriesFrame>> {
    ensure!(path.is_file(), InputError::missing_file(path));
    let (start, end) = timeline.year_span();
    let key = FrameKey {
        path: path.to_path_buf(),
        header_rows,
        start,
        end,
        resolution: timeline.resolution(),
    };

    let cached = frame_cache()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .cloned();
    let frame = match cached {
        Some(frame) => frame,
        None => {
            debug!("Reading {}", path.display());
            let frame = Arc::new(read_frame(&key)?);
            frame_cache()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, frame.clone());
            frame
        }
    };
    frame.check_matches_timeline(path, timeline)?;

    Ok(frame)
}

fn read_frame(key: &FrameKey) -> Result<TimeSeriesFrame> {
    let path = key.path.as_path();
    let raw = TimeSeriesFrame::read_csv_with_header_rows(path, key.header_rows)?;
    let (available_start, available_end) = raw
        .year_span()
        .ok_or_else(|| InputError::inconsistent(path, "file contains no data rows"))?;
    ensure!(
        available_start <= key.start && key.end <= available_end,
        InputError::OutOfRangeClimateYears {
            path: path.to_path_buf(),
            start: key.start,
            end: key.end,
            available_start,
            available_end,
        }
    );

    let frame = raw
        .filter_years(key.start, key.end)
        .resample_mean(key.resolution)?
        .drop_leap_days();

    Ok(frame)
}
