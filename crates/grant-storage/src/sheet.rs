//! Spreadsheet-like row storage: read all rows, append a row, find a row, update a row.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type Row = Vec<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worksheet {sheet} is not a valid row file: {source}")]
    Serde {
        sheet: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("row {index} out of range in worksheet {sheet}")]
    RowOutOfRange { sheet: String, index: usize },
    #[error("malformed row in worksheet {sheet}: {reason}")]
    MalformedRow { sheet: String, reason: String },
    #[error("{0}")]
    Unavailable(String),
}

/// Where the workbook lives and what its sheets are called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub workbook_dir: PathBuf,
    pub spreadsheet_key: String,
    pub grants_sheet: String,
    pub profiles_sheet: String,
}

impl StoreConfig {
    pub fn new(workbook_dir: impl Into<PathBuf>, spreadsheet_key: impl Into<String>) -> Self {
        Self {
            workbook_dir: workbook_dir.into(),
            spreadsheet_key: spreadsheet_key.into(),
            grants_sheet: "grants".to_string(),
            profiles_sheet: "profiles".to_string(),
        }
    }

    pub fn workbook_path(&self) -> PathBuf {
        self.workbook_dir.join(&self.spreadsheet_key)
    }
}

#[async_trait]
pub trait Worksheet: Send + Sync {
    fn title(&self) -> &str;

    async fn read_rows(&self) -> Result<Vec<Row>, StoreError>;

    async fn append_row(&self, row: Row) -> Result<(), StoreError>;

    async fn update_row(&self, index: usize, row: Row) -> Result<(), StoreError>;

    /// First row whose `column` cell equals `value`, with its zero-based index.
    async fn find_row(&self, column: usize, value: &str) -> Result<Option<(usize, Row)>, StoreError> {
        let rows = self.read_rows().await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .find(|(_, row)| row.get(column).map(String::as_str) == Some(value)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorksheet {
    title: String,
    rows: Mutex<Vec<Row>>,
}

impl MemoryWorksheet {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows(title: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            title: title.into(),
            rows: Mutex::new(rows),
        }
    }
}

#[async_trait]
impl Worksheet for MemoryWorksheet {
    fn title(&self) -> &str {
        &self.title
    }

    async fn read_rows(&self) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows.lock().await.clone())
    }

    async fn append_row(&self, row: Row) -> Result<(), StoreError> {
        self.rows.lock().await.push(row);
        Ok(())
    }

    async fn update_row(&self, index: usize, row: Row) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let slot = rows.get_mut(index).ok_or_else(|| StoreError::RowOutOfRange {
            sheet: self.title.clone(),
            index,
        })?;
        *slot = row;
        Ok(())
    }
}

/// One JSON array-of-rows file per sheet, rewritten through a temp file and rename.
#[derive(Debug)]
pub struct FileWorksheet {
    title: String,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWorksheet {
    pub fn new(title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Row>, StoreError> {
        let exists = fs::try_exists(&self.path).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        if !exists {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Serde {
            sheet: self.title.clone(),
            source,
        })
    }

    async fn persist(&self, rows: &[Row]) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).await.map_err(io_err(&parent))?;

        let bytes = serde_json::to_vec_pretty(rows).map_err(|source| StoreError::Serde {
            sheet: self.title.clone(),
            source,
        })?;
        let temp_path = parent.join(format!(".{}.{}.tmp", self.title, Uuid::new_v4()));

        let written = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await
        .map_err(io_err(&temp_path));

        let result = match written {
            Ok(()) => fs::rename(&temp_path, &self.path)
                .await
                .map_err(io_err(&self.path)),
            Err(err) => Err(err),
        };
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }
}

#[async_trait]
impl Worksheet for FileWorksheet {
    fn title(&self) -> &str {
        &self.title
    }

    async fn read_rows(&self) -> Result<Vec<Row>, StoreError> {
        self.load().await
    }

    async fn append_row(&self, row: Row) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;
        rows.push(row);
        self.persist(&rows).await
    }

    async fn update_row(&self, index: usize, row: Row) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;
        let slot = rows.get_mut(index).ok_or_else(|| StoreError::RowOutOfRange {
            sheet: self.title.clone(),
            index,
        })?;
        *slot = row;
        self.persist(&rows).await
    }
}

/// A directory of worksheets named by `StoreConfig::spreadsheet_key`.
#[derive(Debug, Clone)]
pub struct Workbook {
    config: StoreConfig,
}

impl Workbook {
    pub fn open(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn worksheet(&self, title: &str) -> FileWorksheet {
        FileWorksheet::new(title, self.config.workbook_path().join(format!("{title}.json")))
    }

    pub fn grants(&self) -> FileWorksheet {
        self.worksheet(&self.config.grants_sheet)
    }

    pub fn profiles(&self) -> FileWorksheet {
        self.worksheet(&self.config.profiles_sheet)
    }
}
