use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum InterchangeError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Appends batches to a JSON array on disk. After every `append` the file is a complete,
/// parseable array: the closing `\n]` is overwritten by the next batch.
#[derive(Debug)]
pub struct JsonArrayWriter {
    path: PathBuf,
    started: bool,
    written: usize,
    flushes: usize,
}

impl JsonArrayWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: false,
            written: 0,
            flushes: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub async fn append<T: Serialize>(&mut self, items: &[T]) -> Result<(), InterchangeError> {
        if items.is_empty() && self.started {
            return Ok(());
        }
        let mut chunk = String::new();
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                chunk.push_str(",\n");
            }
            let encoded = serde_json::to_string_pretty(item).map_err(|source| {
                InterchangeError::Json {
                    path: self.path.clone(),
                    source,
                }
            })?;
            chunk.push_str(&encoded);
        }

        if self.started {
            self.extend(&chunk).await?;
        } else {
            self.create(&chunk).await?;
            self.started = true;
        }
        self.written += items.len();
        self.flushes += 1;
        Ok(())
    }

    /// Leaves a valid (possibly empty) array behind even when nothing was appended.
    pub async fn finish(&mut self) -> Result<(), InterchangeError> {
        if self.started {
            return Ok(());
        }
        self.append::<serde_json::Value>(&[]).await
    }

    async fn create(&self, chunk: &str) -> Result<(), InterchangeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let content = format!("[\n{chunk}\n]");
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| self.io_error(source))
    }

    async fn extend(&self, chunk: &str) -> Result<(), InterchangeError> {
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        let len = file
            .metadata()
            .await
            .map_err(|source| self.io_error(source))?
            .len();
        // Drop the trailing "\n]" and continue the array from there.
        file.seek(SeekFrom::Start(len.saturating_sub(2)))
            .await
            .map_err(|source| self.io_error(source))?;
        let separator = if self.written > 0 { ",\n" } else { "" };
        let tail = format!("{separator}{chunk}\n]");
        file.write_all(tail.as_bytes())
            .await
            .map_err(|source| self.io_error(source))?;
        file.flush().await.map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> InterchangeError {
        InterchangeError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InterchangeError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| InterchangeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| InterchangeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), InterchangeError> {
    let encoded = serde_json::to_string_pretty(value).map_err(|source| InterchangeError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, encoded)
        .await
        .map_err(|source| InterchangeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads one id per line: the first whitespace-separated word. Blank lines and lines that
/// start with a space are skipped.
pub async fn read_id_lines(path: &Path) -> Result<Vec<String>, InterchangeError> {
    Ok(parse_id_lines(&read_text(path).await?))
}

/// Like [`read_id_lines`] but keeps the whole trimmed line, for files listing names.
pub async fn read_name_lines(path: &Path) -> Result<Vec<String>, InterchangeError> {
    Ok(parse_name_lines(&read_text(path).await?))
}

async fn read_text(path: &Path) -> Result<String, InterchangeError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| InterchangeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_id_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.starts_with(' '))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn parse_name_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.starts_with(' '))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
