use reqwest::{
    blocking::Client,
    header::{HeaderMap, ToStrError},
    StatusCode,
};
use thiserror::Error;

const REPLAY_NONCE: &str = "Replay-Nonce";

#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Failed to request a nonce: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("No Replay-Nonce header in response from {url} (status {status})")]
    NoNonceHeader { url: String, status: StatusCode },
    #[error("Invalid Replay-Nonce header: {0}")]
    InvalidHeaderValue(#[from] ToStrError),
}

/// 每個受保護的請求都要一個尚未用過的 nonce。
pub trait NonceT: Send + Sync {
    fn get(&self) -> Result<String, NonceError>;
}

/// 透過 `newNonce` 端點的 HEAD 請求取得 `Replay-Nonce`。
///
/// 每次簽名前都重新取得，挑戰工作執行緒之間不共用 nonce 狀態。
#[derive(Debug, Clone)]
pub struct Nonce {
    client: Client,
    url: String,
}

impl Nonce {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Nonce {
            client,
            url: url.into(),
        }
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        let response = self.client.head(&self.url).send()?;
        replay_nonce(response.headers())?.ok_or_else(|| NonceError::NoNonceHeader {
            url: self.url.clone(),
            status: response.status(),
        })
    }
}

/// 從任何 ACME 回應標頭中讀出 `Replay-Nonce`。
pub fn replay_nonce(headers: &HeaderMap) -> Result<Option<String>, NonceError> {
    match headers.get(REPLAY_NONCE) {
        Some(value) => Ok(Some(value.to_str()?.to_owned())),
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) struct FixedNonce(pub &'static str);

#[cfg(test)]
impl NonceT for FixedNonce {
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.0.to_owned())
    }
}
