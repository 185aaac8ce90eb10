use anyhow::Result;
use log::{debug, info};
use std::{io::Read, path::Path};

use crate::{errors::OrionDistError, utils::get_input_reader};

/// Reads a manifest: one filename per line.
///
/// Lines starting with `#` and blank lines are skipped. Anything after the
/// first tab is ignored. Order of the remaining entries is preserved.
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    info!("Reading file manifest from: {:?}", path);
    if !path.exists() {
        return Err(OrionDistError::FileNotFound(path.to_string_lossy().into_owned()).into());
    }
    let reader = get_input_reader(path)?;
    let files = parse_manifest(reader).map_err(|e| OrionDistError::ManifestParsing {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!("Manifest {:?} lists {} files", path, files.len());
    Ok(files)
}

/// Parses manifest content from any reader. See [`read_manifest`].
pub fn parse_manifest<R: Read>(reader: R) -> Result<Vec<String>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut files = Vec::new();
    let mut record = csv::ByteRecord::new();
    while csv_reader.read_byte_record(&mut record)? {
        let Some(first) = record.get(0) else {
            continue;
        };
        let name = String::from_utf8_lossy(first);
        let name = name.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        files.push(name.to_string());
    }
    debug!("Parsed {} manifest entries", files.len());
    Ok(files)
}

/// Splits a file list into successive chunks whose summed filename bytes
/// stay within `budget`. A filename longer than the budget forms its own
/// chunk, so every chunk holds at least one entry.
pub struct FilenameChunks<'a> {
    files: &'a [String],
    budget: usize,
}

impl<'a> FilenameChunks<'a> {
    pub fn new(files: &'a [String], budget: usize) -> Self {
        FilenameChunks { files, budget }
    }
}

impl<'a> Iterator for FilenameChunks<'a> {
    type Item = &'a [String];

    fn next(&mut self) -> Option<Self::Item> {
        if self.files.is_empty() {
            return None;
        }
        let mut used = 0usize;
        let mut end = 0usize;
        for name in self.files {
            if end > 0 && used + name.len() > self.budget {
                break;
            }
            used += name.len();
            end += 1;
        }
        let (chunk, rest) = self.files.split_at(end);
        self.files = rest;
        Some(chunk)
    }
}
