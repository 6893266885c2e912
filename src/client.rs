//! 與 CA 溝通的傳輸層。
//!
//! [`AcmeClient`] 是協調流程與網路之間的介面；[`HttpAcmeClient`] 以阻塞式
//! HTTPS 搭配 ES256 JWS 實作它。每個請求都各自取得新的 nonce，因此同一個
//! client 可以同時被多個挑戰工作執行緒共用。

use std::time::Duration;

use log::{debug, trace, warn};
use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CONTENT_TYPE, LOCATION},
    StatusCode,
};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    account::Account,
    base64::Base64,
    certificate::{CertificateChain, CertificateError},
    challenge::{Authorization, Challenge},
    directory::{Directory, DirectoryError},
    jwk::{Jwk, JwkError},
    jws::{Jws, JwsError},
    key_pair::{KeyError, KeyPair},
    nonce::{Nonce, NonceError},
    order::Order,
    payload::{
        ChallengeValidationPayload, FinalizeOrderPayload, Identifier, NewAccountPayload,
        NewOrderPayload, PayloadT, UpdateAccountPayload,
    },
    protection::{Protection, ProtectionError, Signer},
    signature::{create_signature, SignatureError},
};

const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// RFC 7807 問題文件，CA 拒絕請求時回傳。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub subproblems: Vec<Problem>,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.problem_type)
        } else {
            write!(f, "{}: {}", self.problem_type, self.detail)
        }
    }
}

/// 傳輸層可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Request header error: {0}")]
    Header(#[from] reqwest::header::ToStrError),
    #[error("CA returned {status}: {problem}")]
    Problem { status: StatusCode, problem: Problem },
    #[error("Request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("Missing Location header in response from {0}")]
    MissingLocationHeader(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

impl ClientError {
    /// 可以在有限次數內重試的錯誤：逾時、連線失敗、5xx 與 `badNonce`。
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_timeout() || e.is_connect(),
            ClientError::Nonce(NonceError::RequestFailed(e)) => e.is_timeout() || e.is_connect(),
            ClientError::Problem { status, problem } => {
                status.is_server_error() || problem.problem_type == BAD_NONCE
            }
            ClientError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// CA 回傳的問題文件（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            ClientError::Problem { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// 協調流程所需的 CA 操作。
///
/// 每個方法只發出一次請求，輪詢與重試由呼叫端依策略處理。
pub trait AcmeClient: Send + Sync {
    /// 以 `jwk` 註冊新帳戶，回傳帳戶 URL。
    fn new_account(&self, key_pair: &KeyPair, contacts: &[String]) -> Result<String>;

    /// 更新聯絡方式並確認帳戶仍然有效。
    fn update_account(&self, account: &Account, contacts: &[String]) -> Result<()>;

    fn new_order(&self, account: &Account, identifiers: &[Identifier]) -> Result<Order>;

    fn fetch_order(&self, account: &Account, url: &str) -> Result<Order>;

    fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization>;

    /// 通知 CA 挑戰已就緒，回傳 CA 回應中的挑戰狀態。
    fn update_challenge(&self, account: &Account, challenge: &Challenge) -> Result<Challenge>;

    fn finalize_order(&self, account: &Account, order: &Order, csr_der: &[u8]) -> Result<Order>;

    /// 下載 PEM 證書鏈。
    fn fetch_certificates(&self, account: &Account, url: &str) -> Result<CertificateChain>;
}

/// 以 HTTPS 實作的 [`AcmeClient`]。
#[derive(Debug)]
pub struct HttpAcmeClient {
    client: Client,
    directory: Directory,
    nonce: Nonce,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    status: Option<String>,
}

impl HttpAcmeClient {
    /// 建立共用的 HTTP client 並取得目錄。目錄取得失敗屬於啟動錯誤。
    pub fn connect(directory_url: &str, http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let directory = Directory::fetch(&client, directory_url)?;
        debug!("Fetched directory from {}", directory_url);
        let nonce = Nonce::new(client.clone(), directory.new_nonce.clone());

        Ok(HttpAcmeClient {
            client,
            directory,
            nonce,
        })
    }

    /// 簽名並送出請求；`payload` 為 `None` 時即 POST-as-GET。
    ///
    /// 遇到 `badNonce` 時以新的 nonce 重送一次。
    fn post(
        &self,
        url: &str,
        signer: Signer,
        key_pair: &KeyPair,
        payload: Option<&dyn ErasedPayload>,
        accept: Option<&str>,
    ) -> Result<Response> {
        let payload_b64 = match payload {
            Some(payload) => payload.encode()?,
            None => Base64::new(b""),
        };

        with_nonce_retry(url, || {
            let header = Protection::new(&self.nonce, &key_pair.alg_name)
                .signer(signer.clone())
                .create_header(url)?
                .to_base64()?;
            let signature = create_signature(&header, &payload_b64, key_pair)?;
            let body = Jws::new(&header, &payload_b64, &signature).to_json()?;

            trace!("POST {}", url);
            let mut request = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/jose+json")
                .body(body);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }
            Self::check(url, request.send()?)
        })
    }

    fn check(url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text()?;
        match serde_json::from_str::<Problem>(&body) {
            Ok(problem) if !problem.problem_type.is_empty() => {
                Err(ClientError::Problem { status, problem })
            }
            _ => Err(ClientError::Status {
                url: url.to_owned(),
                status,
                body,
            }),
        }
    }

    fn kid(account: &Account) -> Signer {
        Signer::Kid(account.url.clone())
    }

    fn location(url: &str, response: &Response) -> Result<String> {
        Ok(response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| ClientError::MissingLocationHeader(url.to_owned()))?
            .to_str()?
            .to_owned())
    }
}

/// 執行 `send`；CA 回報 `badNonce` 時以新的 nonce 再送一次，之後不再重試。
fn with_nonce_retry<T>(url: &str, mut send: impl FnMut() -> Result<T>) -> Result<T> {
    match send() {
        Err(ClientError::Problem { problem, .. }) if problem.problem_type == BAD_NONCE => {
            warn!("Bad nonce for {}, retrying with a fresh one", url);
            send()
        }
        other => other,
    }
}

/// 讓不同型別的載荷能經由同一個 `post` 送出。
trait ErasedPayload {
    fn encode(&self) -> Result<Base64>;
}

impl<P: PayloadT> ErasedPayload for P {
    fn encode(&self) -> Result<Base64> {
        self.validate()
            .map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        Ok(self.to_base64()?)
    }
}

impl AcmeClient for HttpAcmeClient {
    fn new_account(&self, key_pair: &KeyPair, contacts: &[String]) -> Result<String> {
        let url = &self.directory.new_account;
        let payload = NewAccountPayload::new(contacts, true);
        let signer = Signer::Jwk(Jwk::new(key_pair)?);
        let response = self.post(url, signer, key_pair, Some(&payload), None)?;
        Self::location(url, &response)
    }

    fn update_account(&self, account: &Account, contacts: &[String]) -> Result<()> {
        let payload = UpdateAccountPayload::new(contacts);
        let response = self.post(
            &account.url,
            Self::kid(account),
            &account.key_pair,
            Some(&payload),
            None,
        )?;
        let body: AccountResponse = response.json()?;
        match body.status.as_deref() {
            None | Some("valid") => Ok(()),
            Some(other) => Err(ClientError::UnexpectedResponse {
                url: account.url.clone(),
                reason: format!("account status is {}", other),
            }),
        }
    }

    fn new_order(&self, account: &Account, identifiers: &[Identifier]) -> Result<Order> {
        let url = &self.directory.new_order;
        let payload = NewOrderPayload::new(identifiers);
        let response = self.post(
            url,
            Self::kid(account),
            &account.key_pair,
            Some(&payload),
            None,
        )?;
        let location = Self::location(url, &response)?;
        Order::from_json(&location, &response.text()?).map_err(Into::into)
    }

    fn fetch_order(&self, account: &Account, url: &str) -> Result<Order> {
        let response = self.post(url, Self::kid(account), &account.key_pair, None, None)?;
        Order::from_json(url, &response.text()?).map_err(Into::into)
    }

    fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        let response = self.post(url, Self::kid(account), &account.key_pair, None, None)?;
        let thumbprint = account.key_pair.thumbprint()?;
        Authorization::from_json(url, &response.text()?, &thumbprint).map_err(Into::into)
    }

    fn update_challenge(&self, account: &Account, challenge: &Challenge) -> Result<Challenge> {
        let payload = ChallengeValidationPayload::new();
        let response = self.post(
            &challenge.url,
            Self::kid(account),
            &account.key_pair,
            Some(&payload),
            None,
        )?;
        let thumbprint = account.key_pair.thumbprint()?;
        Challenge::from_json(&response.text()?, &thumbprint)?.ok_or_else(|| {
            ClientError::UnexpectedResponse {
                url: challenge.url.clone(),
                reason: "unknown challenge type".to_owned(),
            }
        })
    }

    fn finalize_order(&self, account: &Account, order: &Order, csr_der: &[u8]) -> Result<Order> {
        let payload = FinalizeOrderPayload::new(csr_der);
        let response = self.post(
            &order.finalize,
            Self::kid(account),
            &account.key_pair,
            Some(&payload),
            None,
        )?;
        Order::from_json(&order.url, &response.text()?).map_err(Into::into)
    }

    fn fetch_certificates(&self, account: &Account, url: &str) -> Result<CertificateChain> {
        let response = self.post(
            url,
            Self::kid(account),
            &account.key_pair,
            None,
            Some("application/pem-certificate-chain"),
        )?;
        Ok(CertificateChain::from_pem(&response.bytes()?)?)
    }
}
