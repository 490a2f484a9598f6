//! JSON report files and zip archival of a run's outputs.
//!
//! Every file a run writes carries the run suffix (a filesystem-safe
//! timestamp) in its name, so [`archive_outputs`] can bundle exactly that
//! run's files.

use indexmap::IndexMap;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::loadtest::error::LoadTestError;
use crate::loadtest::quality::{ExchangeRecord, QualityReport};
use crate::loadtest::ramp::RunSummary;
use crate::loadtest::reference_threshold::ThresholdSweep;

/// Schema version stamped into every report file.
const SCHEMA_VERSION: &str = "1.0";

#[derive(Serialize)]
struct Versioned<'a, T: Serialize> {
    schema_version: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

/// Run suffix for a timestamp: hyphens instead of colons, so it is safe in
/// file names on every platform.
pub fn run_suffix(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub fn ramp_report_filename(suffix: &str) -> String {
    format!("ramp-results-{suffix}.json")
}

pub fn quality_report_filename(suffix: &str) -> String {
    format!("quality-summary-{suffix}.json")
}

pub fn records_filename(suffix: &str) -> String {
    format!("exchanges-{suffix}.json")
}

pub fn thresholds_filename(suffix: &str) -> String {
    format!("thresholds-{suffix}.json")
}

pub fn archive_filename(suffix: &str) -> String {
    format!("results_{suffix}.zip")
}

fn write_json<T: Serialize>(value: &T, dir: &Path, filename: &str) -> Result<PathBuf, LoadTestError> {
    std::fs::create_dir_all(dir).map_err(|err| LoadTestError::report_io(err, dir))?;
    let path = dir.join(filename);
    let json = serde_json::to_string_pretty(&Versioned {
        schema_version: SCHEMA_VERSION,
        body: value,
    })
    .map_err(|err| LoadTestError::report_io(std::io::Error::other(err), &path))?;
    std::fs::write(&path, json).map_err(|err| LoadTestError::report_io(err, &path))?;
    tracing::debug!(path = %path.display(), "wrote report");
    Ok(path)
}

/// Write `ramp-results-<suffix>.json` into `dir`, creating it when missing.
pub fn write_run_summary(summary: &RunSummary, dir: &Path) -> Result<PathBuf, LoadTestError> {
    let suffix = run_suffix(&summary.started_at);
    write_json(summary, dir, &ramp_report_filename(&suffix))
}

/// Write `quality-summary-<suffix>.json` into `dir`.
pub fn write_quality_summary(report: &QualityReport, dir: &Path) -> Result<PathBuf, LoadTestError> {
    let suffix = run_suffix(&report.started_at);
    write_json(report, dir, &quality_report_filename(&suffix))
}

/// Write the per-question records as `exchanges-<suffix>.json` into `dir`.
pub fn write_exchange_records(
    records: &IndexMap<String, ExchangeRecord>,
    dir: &Path,
    suffix: &str,
) -> Result<PathBuf, LoadTestError> {
    write_json(records, dir, &records_filename(suffix))
}

/// Write a reference-threshold sweep as `thresholds-<suffix>.json` into `dir`.
pub fn write_threshold_sweep(
    sweep: &ThresholdSweep,
    dir: &Path,
    suffix: &str,
) -> Result<PathBuf, LoadTestError> {
    write_json(sweep, dir, &thresholds_filename(suffix))
}

/// Zip every file in `dir` whose name contains `suffix` into
/// `results_<suffix>.zip` next to them. Returns the archive path.
pub fn archive_outputs(dir: &Path, suffix: &str) -> Result<PathBuf, LoadTestError> {
    let archive_name = archive_filename(suffix);
    let mut members: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .map_err(|err| LoadTestError::report_io(err, dir))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_owned();
            (name.contains(suffix) && name != archive_name).then(|| (name, entry.path()))
        })
        .collect();
    members.sort();

    let archive_path = dir.join(&archive_name);
    let file = File::create(&archive_path).map_err(|err| LoadTestError::report_io(err, &archive_path))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, path) in &members {
        zip.start_file(name.as_str(), options)?;
        let mut member = File::open(path).map_err(|err| LoadTestError::report_io(err, path))?;
        std::io::copy(&mut member, &mut zip).map_err(|err| LoadTestError::report_io(err, path))?;
    }
    zip.finish()?;

    tracing::info!(
        archive = %archive_path.display(),
        files = members.len(),
        "archived run outputs"
    );
    Ok(archive_path)
}
