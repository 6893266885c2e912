//! DNS-01 記錄的發布與查詢。
//!
//! 本 crate 不管理 DNS 伺服器：[`DnsResolver::present`] 預設只記錄需要手動
//! 建立的 TXT 記錄，實際的檢查由 [`DnsResolver::lookup_txt`] 完成。

use log::{debug, info};
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

/// Google 公開的 DNS-over-HTTPS JSON 端點。
pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google/resolve";

const TXT_RECORD_TYPE: u16 = 16;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Resolver returned {status} for {name}")]
    Status {
        name: String,
        status: reqwest::StatusCode,
    },
}

/// 一筆待發布的 TXT 記錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub name: String,
    pub value: String,
}

impl TxtRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        TxtRecord {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// DNS-01 記錄名稱：`_acme-challenge.<基底網域>`，萬用字元前綴會被去除。
pub fn record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{}", base.trim_end_matches('.'))
}

pub trait DnsResolver: Send + Sync {
    /// 讓記錄可被查詢到。預設實作只提示使用者手動建立。
    fn present(&self, record: &TxtRecord) -> Result<(), DnsError> {
        info!(
            "Please create DNS TXT record: {} IN TXT \"{}\"",
            record.name, record.value
        );
        Ok(())
    }

    /// 查詢名稱下目前所有的 TXT 值。
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// 透過 JSON 格式的 DNS-over-HTTPS 端點查詢 TXT 記錄。
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

impl DohResolver {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        DohResolver {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl DnsResolver for DohResolver {
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", name), ("type", "TXT")])
            .header(reqwest::header::ACCEPT, "application/dns-json")
            .send()?;
        if !response.status().is_success() {
            return Err(DnsError::Status {
                name: name.to_owned(),
                status: response.status(),
            });
        }
        let values = parse_doh_answer(&response.text()?)?;
        debug!("TXT {} -> {:?}", name, values);
        Ok(values)
    }
}

/// 取出回應中 TXT 類型的資料，去掉外圍引號。
/// 長記錄可能被拆成多段 `"a" "b"`，這裡將其接回。
fn parse_doh_answer(json: &str) -> Result<Vec<String>, DnsError> {
    let response: DohResponse = serde_json::from_str(json)?;
    Ok(response
        .answer
        .into_iter()
        .filter(|a| a.record_type == TXT_RECORD_TYPE)
        .map(|a| {
            a.data
                .split("\" \"")
                .map(|part| part.trim_matches('"'))
                .collect::<String>()
        })
        .collect())
}
