//! 註冊帳戶的載入、建立與持久化。

use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    client::{AcmeClient, ClientError},
    key_pair::{KeyError, KeyPair, StoredKey},
    storage::{Storage, StorageError},
};

/// 錯誤類型，用於描述在處理 ACME 帳戶相關操作時可能發生的各類錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account file not found: {0}")]
    NotFound(PathBuf),
    #[error("Account file {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },
    #[error("Failed to resync account with the CA: {0}")]
    Resync(#[source] ClientError),
    #[error("Account registration failed: {0}")]
    Registration(#[source] ClientError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`].
pub type Result<T> = std::result::Result<T, AccountError>;

/// 已向 CA 註冊的帳戶。所有簽名請求都以 `url` 作為 `kid`。
#[derive(Debug, Clone)]
pub struct Account {
    pub url: String,
    pub key_pair: KeyPair,
}

/// 帳戶檔內容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFile {
    pub url: String,
    pub key: StoredKey,
}

impl AccountFile {
    fn from_account(account: &Account) -> Result<Self> {
        Ok(AccountFile {
            url: account.url.clone(),
            key: account.key_pair.to_stored()?,
        })
    }
}

/// 負責取得可用的帳戶：優先沿用帳戶檔，失敗時改為註冊新帳戶。
pub struct AccountManager<'a> {
    client: &'a dyn AcmeClient,
    storage: &'a dyn Storage,
    account_file: PathBuf,
    contacts: Vec<String>,
}

impl<'a> AccountManager<'a> {
    pub fn new(
        client: &'a dyn AcmeClient,
        storage: &'a dyn Storage,
        account_file: impl Into<PathBuf>,
        contacts: &[String],
    ) -> Self {
        AccountManager {
            client,
            storage,
            account_file: account_file.into(),
            contacts: contacts.to_vec(),
        }
    }

    /// 讀取帳戶檔並與 CA 重新同步聯絡方式。
    pub fn load(&self) -> Result<Account> {
        let path = &self.account_file;
        let raw = match self.storage.read_file(path) {
            Ok(raw) => raw,
            Err(StorageError::NotFound(_)) => return Err(AccountError::NotFound(path.clone())),
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| AccountError::CorruptState {
            path: path.clone(),
            reason,
        };
        let file: AccountFile = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        if file.url.is_empty() {
            return Err(corrupt("account url is empty".to_owned()));
        }
        let key_pair = KeyPair::from_stored(&file.key).map_err(|e| corrupt(e.to_string()))?;

        let account = Account {
            url: file.url,
            key_pair,
        };
        self.client
            .update_account(&account, &self.contacts)
            .map_err(AccountError::Resync)?;

        info!("Loaded account {}", account.url);
        Ok(account)
    }

    /// 產生新的金鑰並註冊帳戶，成功後寫入帳戶檔。
    pub fn create(&self) -> Result<Account> {
        let key_pair = KeyPair::generate()?;
        let url = self
            .client
            .new_account(&key_pair, &self.contacts)
            .map_err(AccountError::Registration)?;
        let account = Account { url, key_pair };

        let file = AccountFile::from_account(&account)?;
        self.storage
            .write_file(&self.account_file, &serde_json::to_vec_pretty(&file)?)?;

        info!(
            "Registered account {} (saved to {})",
            account.url,
            self.account_file.display()
        );
        Ok(account)
    }

    /// 先嘗試 [`load`](Self::load)，任何失敗都改走 [`create`](Self::create)。
    pub fn load_or_create(&self) -> Result<Account> {
        match self.load() {
            Ok(account) => Ok(account),
            Err(e) => {
                warn!("Could not load existing account: {}", e);
                info!("Creating new account");
                self.create()
            }
        }
    }
}
