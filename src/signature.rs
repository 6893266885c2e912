use openssl::{ecdsa::EcdsaSig, sha::sha256};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    SigningError(#[from] openssl::error::ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// 根據提供的 header、payload 與金鑰對產生 JWS 簽名。
///
/// 簽名輸入為 `BASE64URL(header) || '.' || BASE64URL(payload)`；
/// ES256 的結果是 r 與 s 各 32 位元組串接，而非 DER。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.base64_url(), payload_b64.base64_url());
    Ok(Base64::new(sign(signing_input.as_bytes(), key_pair)?))
}

/// 以 ES256 對任意資料簽名，回傳 `r || s`。
pub fn sign(data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
    if key_pair.alg_name != "ES256" {
        return Err(SignatureError::UnsupportedAlgorithm(
            key_pair.alg_name.clone(),
        ));
    }

    let digest = sha256(data);
    let sig = EcdsaSig::sign(&digest, &key_pair.pri_key)?;

    let width = KeyPair::FIELD_BYTES as i32;
    let mut raw = sig.r().to_vec_padded(width)?;
    raw.extend(sig.s().to_vec_padded(width)?);
    Ok(raw)
}

/// 驗證 [`sign`] 產生的 `r || s` 簽名。
pub fn verify(data: &[u8], signature: &[u8], key_pair: &KeyPair) -> Result<bool, SignatureError> {
    if signature.len() != KeyPair::FIELD_BYTES * 2 {
        return Ok(false);
    }
    let (r, s) = signature.split_at(KeyPair::FIELD_BYTES);
    let sig = EcdsaSig::from_private_components(
        openssl::bn::BigNum::from_slice(r)?,
        openssl::bn::BigNum::from_slice(s)?,
    )?;
    Ok(sig.verify(&sha256(data), &key_pair.pub_key)?)
}
