use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};

use log::debug;
use tempfile::NamedTempFile;
use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Path is invalid: {0}")]
    InvalidPath(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 帳戶檔、金鑰檔與憑證檔的存放介面。
///
/// 寫入必須是整檔替換：讀取端只會看到舊內容或完整的新內容。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取整個檔案；不存在時回傳 [`StorageError::NotFound`]。
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// 以 0600 權限寫入整個檔案，父目錄不存在時自動建立。
    fn write_file(&self, path: &Path, value: &[u8]) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool>;
}

fn check_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(StorageError::InvalidPath("Empty path".to_string()));
    }
    if path.file_name().is_none() {
        return Err(StorageError::InvalidPath(format!(
            "Path has no file name: {}",
            path.display()
        )));
    }
    Ok(())
}

/// 檔案系統上的儲存實作。相對路徑以 `root` 為基準解析。
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FileStorage {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        check_path(path)?;
        Ok(self.root.join(path))
    }
}

impl Storage for FileStorage {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(full.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, path: &Path, value: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        let parent = match full.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        // NamedTempFile 以 0600 建立，rename 後權限隨之保留
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&full).map_err(|e| StorageError::Persist {
            path: full.display().to_string(),
            source: e.error,
        })?;

        debug!("Wrote {} bytes to {}", value.len(), full.display());
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }
}

/// 僅存在於記憶體中的儲存實作。
#[derive(Debug)]
pub struct MemStorage {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage {
            files: RwLock::new(HashMap::new()),
        }
    }
}

impl Storage for MemStorage {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        check_path(path)?;
        self.files
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.display().to_string()))
    }

    fn write_file(&self, path: &Path, value: &[u8]) -> Result<()> {
        check_path(path)?;
        self.files
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(path.to_path_buf(), value.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        check_path(path)?;
        Ok(self
            .files
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains_key(path))
    }
}
