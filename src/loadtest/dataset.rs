//! Prompt source: JSON-lines dataset files on disk.

use std::path::{Path, PathBuf};

use crate::loadtest::error::LoadTestError;
use crate::loadtest::prompt::Prompt;

/// Every `*.jsonl` file directly inside `folder`, sorted by path.
pub fn dataset_files(folder: &Path) -> Result<Vec<PathBuf>, LoadTestError> {
    if !folder.is_dir() {
        return Err(LoadTestError::DatasetIo {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            path: folder.display().to_string(),
        });
    }
    let pattern = format!(
        "{}/*.jsonl",
        glob::Pattern::escape(&folder.to_string_lossy())
    );
    let paths = glob::glob(&pattern).map_err(|err| LoadTestError::DatasetIo {
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()),
        path: folder.display().to_string(),
    })?;

    let mut files: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable dataset entry");
                None
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Read prompts from every dataset file in `folder`.
///
/// With `max_samples`, at most that many lines are drawn from each file,
/// uniformly without replacement, keeping file order. Lines that are not a
/// valid prompt record are skipped with a warning. An empty result is not an
/// error here; callers decide whether to treat it as fatal.
pub fn read_prompts(folder: &Path, max_samples: Option<usize>) -> Result<Vec<Prompt>, LoadTestError> {
    let mut prompts = Vec::new();
    for path in dataset_files(folder)? {
        let content = std::fs::read_to_string(&path).map_err(|source| LoadTestError::DatasetIo {
            source,
            path: path.display().to_string(),
        })?;
        let read = parse_lines(&content, max_samples, &path);
        tracing::debug!(file = %path.display(), prompts = read.len(), "read dataset file");
        prompts.extend(read);
    }
    Ok(prompts)
}

fn parse_lines(content: &str, max_samples: Option<usize>, path: &Path) -> Vec<Prompt> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();
    let chosen = match max_samples {
        Some(n) if n < lines.len() => {
            let mut indices = rand::seq::index::sample(&mut rand::rng(), lines.len(), n).into_vec();
            indices.sort_unstable();
            indices.into_iter().map(|i| lines[i]).collect()
        }
        _ => lines,
    };

    chosen
        .into_iter()
        .filter_map(|(number, line)| match serde_json::from_str::<Prompt>(line) {
            Ok(prompt) => Some(prompt),
            Err(err) => {
                tracing::warn!(
                    file = %path.display(),
                    line = number + 1,
                    error = %err,
                    "skipping invalid dataset line"
                );
                None
            }
        })
        .collect()
}
