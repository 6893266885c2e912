use std::{collections::HashSet, path::PathBuf, time::Duration};

use reqwest::Url;
use thiserror::Error;

use crate::{dns::DEFAULT_DOH_ENDPOINT, poll::PollPolicy};

/// Let's Encrypt 測試環境目錄。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 正式環境目錄。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No domains provided")]
    NoDomains,
    #[error("Invalid {field} URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("Invalid contact email: {0}")]
    InvalidContact(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// 一次簽發流程使用的全部設定，建立後不可變。
#[derive(Debug, Clone)]
pub struct Config {
    pub directory_url: String,
    /// 聯絡信箱，不含 `mailto:`。
    pub contacts: Vec<String>,
    /// 要簽發的網域，依輸入順序且不重複；第一個作為 CN。
    pub domains: Vec<String>,
    pub account_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub doh_endpoint: String,
    /// TXT 檢查策略，預設只查一次。
    pub dns_check: PollPolicy,
    pub authorization_poll: PollPolicy,
    pub order_poll: PollPolicy,
    /// 挑戰階段的整體期限。
    pub deadline: Option<Duration>,
    pub http_timeout: Duration,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// 將逗號分隔的清單切開：去除空白、略過空項目、保留第一次出現的順序。
pub fn parse_list(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// [`Config`] 的建構器，未設定的欄位使用預設值。
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    directory_url: String,
    contacts: Vec<String>,
    domains: Vec<String>,
    account_file: PathBuf,
    cert_file: PathBuf,
    key_file: PathBuf,
    doh_endpoint: String,
    dns_check: PollPolicy,
    authorization_poll: PollPolicy,
    order_poll: PollPolicy,
    deadline: Option<Duration>,
    http_timeout: Duration,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub const DEFAULT_ACCOUNT_FILE: &'static str = "data/cache/account.json";
    pub const DEFAULT_CERT_FILE: &'static str = "data/ssl/cert.pem";
    pub const DEFAULT_KEY_FILE: &'static str = "data/ssl/key.pem";
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(2), 30);

    pub fn new() -> Self {
        ConfigBuilder {
            directory_url: LETS_ENCRYPT_STAGING.to_string(),
            contacts: Vec::new(),
            domains: Vec::new(),
            account_file: PathBuf::from(Self::DEFAULT_ACCOUNT_FILE),
            cert_file: PathBuf::from(Self::DEFAULT_CERT_FILE),
            key_file: PathBuf::from(Self::DEFAULT_KEY_FILE),
            doh_endpoint: DEFAULT_DOH_ENDPOINT.to_string(),
            dns_check: PollPolicy::once(),
            authorization_poll: Self::DEFAULT_POLL,
            order_poll: Self::DEFAULT_POLL,
            deadline: Some(Self::DEFAULT_DEADLINE),
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.directory_url = url.to_string();
        self
    }

    pub fn contacts(mut self, contacts: &[String]) -> Self {
        self.contacts = contacts.to_vec();
        self
    }

    pub fn domains(mut self, domains: &[String]) -> Self {
        self.domains = domains.to_vec();
        self
    }

    pub fn account_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.account_file = path.into();
        self
    }

    pub fn cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = path.into();
        self
    }

    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = path.into();
        self
    }

    pub fn doh_endpoint(mut self, url: &str) -> Self {
        self.doh_endpoint = url.to_string();
        self
    }

    pub fn dns_check(mut self, policy: PollPolicy) -> Self {
        self.dns_check = policy;
        self
    }

    pub fn authorization_poll(mut self, policy: PollPolicy) -> Self {
        self.authorization_poll = policy;
        self
    }

    pub fn order_poll(mut self, policy: PollPolicy) -> Self {
        self.order_poll = policy;
        self
    }

    /// `None` 表示不設期限。
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// 驗證設定並建立 [`Config`]。
    pub fn build(self) -> Result<Config> {
        let domains = dedup(
            self.domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        );
        if domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }
        for domain in &domains {
            validate_domain(domain)?;
        }

        let contacts: Vec<String> = dedup(self.contacts)
            .into_iter()
            .map(|c| c.trim_start_matches("mailto:").to_string())
            .collect();
        for contact in &contacts {
            let valid = match contact.split_once('@') {
                Some((local, host)) => !local.is_empty() && !host.is_empty(),
                None => false,
            };
            if !valid {
                return Err(ConfigError::InvalidContact(contact.clone()));
            }
        }

        validate_url("directory", &self.directory_url)?;
        validate_url("DNS-over-HTTPS", &self.doh_endpoint)?;

        for (name, policy) in [
            ("DNS check attempts", self.dns_check),
            ("authorization poll attempts", self.authorization_poll),
            ("order poll attempts", self.order_poll),
        ] {
            if policy.attempts == 0 {
                return Err(ConfigError::ZeroAttempts(name));
            }
        }

        Ok(Config {
            directory_url: self.directory_url,
            contacts,
            domains,
            account_file: self.account_file,
            cert_file: self.cert_file,
            key_file: self.key_file,
            doh_endpoint: self.doh_endpoint,
            dns_check: self.dns_check,
            authorization_poll: self.authorization_poll,
            order_poll: self.order_poll,
            deadline: self.deadline,
            http_timeout: self.http_timeout,
        })
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

fn validate_url(field: &'static str, value: &str) -> Result<()> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

/// 萬用字元只允許出現在最左邊一層。
fn validate_domain(domain: &str) -> Result<()> {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    let valid = !base.is_empty()
        && base.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidDomain(domain.to_string()))
    }
}
