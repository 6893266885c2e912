use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 取得目錄時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Directory request to {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// CA 公布的端點集合。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Directory {
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService", default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl Directory {
    /// 從指定 URL 取得目錄資料。無法連線或內容不是目錄時回傳錯誤，
    /// 呼叫端應視為啟動失敗。
    pub fn fetch(client: &Client, url: &str) -> DirectoryResult<Self> {
        let response = client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: url.to_owned(),
                status,
            });
        }
        Self::from_json(&response.text()?)
    }

    pub fn from_json(json: &str) -> DirectoryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directory() {
        let json = r#"{
            "keyChange": "https://acme.test/key-change",
            "meta": {"termsOfService": "https://acme.test/tos.pdf"},
            "newAccount": "https://acme.test/new-acct",
            "newNonce": "https://acme.test/new-nonce",
            "newOrder": "https://acme.test/new-order",
            "revokeCert": "https://acme.test/revoke-cert"
        }"#;
        let directory = Directory::from_json(json).unwrap();
        assert_eq!(directory.new_account, "https://acme.test/new-acct");
        assert_eq!(directory.new_nonce, "https://acme.test/new-nonce");
        assert_eq!(directory.new_order, "https://acme.test/new-order");
        assert_eq!(
            directory.meta.unwrap().terms_of_service.as_deref(),
            Some("https://acme.test/tos.pdf")
        );
    }

    #[test]
    fn test_missing_endpoint_is_error() {
        assert!(Directory::from_json(r#"{"newNonce": "x"}"#).is_err());
    }
}
