use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key，本 crate 只處理 P-256 的 EC 金鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// EC 格式的 JWK，只包含公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    crv: String,
    x: String,
    y: String,
}

impl EcJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let (x, y) = key_pair
            .coordinates()
            .map_err(|e| JwkError::KeyConversionError(e.to_string()))?;

        Ok(EcJwk {
            crv: KeyPair::CURVE.to_owned(),
            x: Base64::new(x).base64_url(),
            y: Base64::new(y).base64_url(),
        })
    }

    /// 產生 thumbprint 使用的 JSON：只含必要成員並依字典序排列。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("crv".to_string(), Value::String(self.crv.clone()));
        map.insert("kty".to_string(), Value::String("EC".to_string()));
        map.insert("x".to_string(), Value::String(self.x.clone()));
        map.insert("y".to_string(), Value::String(self.y.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        Ok(Jwk::Ec(EcJwk::from_key_pair(key_pair)?))
    }

    /// 將 JWK 序列化為 JSON 格式字串。
    pub fn to_json(&self) -> Result<String, JwkError> {
        serde_json::to_string(self).map_err(JwkError::from)
    }

    /// 將 JWK 轉換為 thumbprint 計算所需的 JSON 表示。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Ec(jwk) => jwk.to_acme_json(),
        }
    }
}
