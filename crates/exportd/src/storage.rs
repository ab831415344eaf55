/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Where finished CSV files live.
//!
//! The worker writes into a [`FileStore`] rooted at its output directory and
//! hands the resulting path to the gateway inside a completion record. The
//! gateway only ever sees that path, so it reads through [`open_reference`]
//! rather than through a store instance.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::StorageError;

/// `<id>--<request timestamp>-<processing timestamp>.csv`
pub fn output_file_name(id: &str, request_ts: i64, processed_ts: i64) -> String {
    format!("{}--{}-{}.csv", id, request_ts, processed_ts)
}

/// File name to offer the downloader for a stored file reference.
///
/// Falls back to `export.csv` when the reference has no final component.
pub fn download_name(reference: &str) -> String {
    Path::new(reference)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("export.csv")
        .to_string()
}

/// Open a file previously written by a worker.
pub async fn open_reference(reference: &str) -> Result<fs::File, StorageError> {
    let path = PathBuf::from(reference);
    fs::File::open(&path)
        .await
        .map_err(|source| StorageError::Open { path, source })
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output directory (and parents) if it does not exist yet.
    pub async fn ensure_ready(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::PrepareDirectory {
                path: self.root.clone(),
                source,
            })
    }

    /// Persist `contents` as `file_name` under the store root and return the
    /// full path. An existing file with the same name is replaced.
    pub async fn write(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.root.join(file_name);
        fs::write(&path, contents)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = contents.len(), "Stored export file");
        Ok(path)
    }
}
