//! Flattened JSON 序列化的 JSON Web Signature（RFC 7515 §7.2.2），ACME 請求主體即為此格式。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::Base64;

/// 一個 JWS 物件，三個欄位皆為 base64url 字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Jws {
    /// 由已編碼的 header、payload 與簽名組成 JWS。
    ///
    /// POST-as-GET 請求的 payload 為空位元組，編碼後是空字串。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    pub fn to_json(&self) -> Result<String, JwsError> {
        Ok(serde_json::to_string(self)?)
    }
}
