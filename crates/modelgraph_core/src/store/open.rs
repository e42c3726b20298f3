//! File open/save with timing logs.

use super::{StoreError, StoreResult};
use crate::codec::{self, LoadOptions, LoadSummary};
use crate::registry::ObjectRegistry;
use log::{error, info};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

/// Loads the model file at `path` into `registry`.
///
/// # Side effects
/// - Emits `model_open` logging events with duration and status.
pub fn open_model(
    registry: &mut ObjectRegistry,
    path: impl AsRef<Path>,
    options: &LoadOptions,
) -> StoreResult<LoadSummary> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=model_open module=store status=start");

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            error!(
                "event=model_open module=store status=error duration_ms={} error_code=file_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    match codec::load(registry, BufReader::new(file), options) {
        Ok(summary) => {
            info!(
                "event=model_open module=store status=ok duration_ms={} records={}",
                started_at.elapsed().as_millis(),
                summary.records_read
            );
            Ok(summary)
        }
        Err(err) => {
            error!(
                "event=model_open module=store status=error duration_ms={} error_code=model_load_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(StoreError::Codec {
                path: path.to_path_buf(),
                source: err,
            })
        }
    }
}

/// Writes `registry` to `path`, replacing any previous file.
///
/// # Side effects
/// - Creates and renames a sibling `.tmp` file.
/// - Emits `model_save` logging events with duration and status.
pub fn save_model(registry: &ObjectRegistry, path: impl AsRef<Path>) -> StoreResult<usize> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=model_save module=store status=start");

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = Path::new(&staging).to_path_buf();

    let result = write_staged(registry, &staging).and_then(|records| {
        fs::rename(&staging, path).map_err(|err| StoreError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
        Ok(records)
    });

    match &result {
        Ok(records) => info!(
            "event=model_save module=store status=ok duration_ms={} records={}",
            started_at.elapsed().as_millis(),
            records
        ),
        Err(err) => {
            let _ = fs::remove_file(&staging);
            error!(
                "event=model_save module=store status=error duration_ms={} error_code=model_save_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
        }
    }
    result
}

fn write_staged(registry: &ObjectRegistry, staging: &Path) -> StoreResult<usize> {
    let file = File::create(staging).map_err(|err| StoreError::Io {
        path: staging.to_path_buf(),
        source: err,
    })?;
    let mut writer = BufWriter::new(file);
    codec::serialize(registry, &mut writer).map_err(|err| StoreError::Codec {
        path: staging.to_path_buf(),
        source: err,
    })
}
