use crate::{
    base64::Base64,
    jwk::Jwk,
    nonce::{NonceError, NonceT},
};
use serde::Serialize;
use thiserror::Error;

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 請求者身分：註冊帳戶時帶完整 JWK，其餘請求帶帳戶 URL（`kid`）。
#[derive(Debug, Clone)]
pub enum Signer {
    Jwk(Jwk),
    Kid(String),
}

/// 用於生成 JWS 保護頭（Protected Header）。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: String,
    signer: Option<Signer>,
}

/// JWS 保護頭，序列化為 JSON 後以 Base64 編碼放入 `protected` 欄位。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: String,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(serde_json::to_vec(self)?))
    }
}

impl<'a> Protection<'a> {
    pub fn new(nonce: &'a dyn NonceT, alg: impl Into<String>) -> Self {
        Self {
            nonce,
            alg: alg.into(),
            signer: None,
        }
    }

    /// 設定請求者身分，決定保護頭中出現 `jwk` 還是 `kid`。
    pub fn signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// 取得新的 nonce 並生成針對 `url` 的保護頭。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.get()?;

        let (jwk, kid) = match &self.signer {
            Some(Signer::Jwk(jwk)) => (Some(jwk.clone()), None),
            Some(Signer::Kid(kid)) => (None, Some(kid.clone())),
            None => (None, None),
        };

        Ok(ProtectedHeader {
            alg: self.alg.clone(),
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}
