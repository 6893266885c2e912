use openssl::{
    bn::BigNumContext,
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{PKey, Private, Public},
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{Base64, DecodeError},
    jwk::{Jwk, JwkError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、編碼與 JWK 錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),
    #[error("Stored key is not valid base64: {0}")]
    Decode(#[from] DecodeError),
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
    #[error("PEM is not valid UTF-8")]
    PemEncoding,
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 表示一組 P-256 橢圓曲線金鑰對，帳戶金鑰與憑證金鑰皆使用此型別。
///
/// 簽名演算法固定為 ES256。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// JWS 使用的演算法名稱。
    pub alg_name: String,
    /// 私鑰。
    pub pri_key: EcKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: EcKey<Public>,
}

/// 帳戶金鑰的持久化表示：曲線名稱加上 SEC1 DER 編碼的私鑰。
///
/// 與 OpenSSL 內部欄位無關，只依賴標準編碼。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub curve: String,
    pub der: String,
}

impl KeyPair {
    /// 唯一支援的曲線名稱。
    pub const CURVE: &'static str = "P-256";
    /// 座標與簽名分量的位元組長度。
    pub const FIELD_BYTES: usize = 32;

    /// 產生一組新的 P-256 金鑰對。
    pub fn generate() -> Result<Self> {
        let group = Self::group()?;
        let pri_key = EcKey::generate(&group)?;
        Self::from_private(pri_key)
    }

    /// 根據 PEM 格式（SEC1 `EC PRIVATE KEY` 或 PKCS#8）的私鑰建立金鑰對。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?.ec_key()?;
        Self::from_private(pri_key)
    }

    /// 將持久化表示還原為金鑰對；曲線不符或 DER 無法解析時回傳錯誤。
    pub fn from_stored(stored: &StoredKey) -> Result<Self> {
        if stored.curve != Self::CURVE {
            return Err(KeyError::UnsupportedCurve(stored.curve.clone()));
        }
        let der = Base64::from_url(&stored.der)?;
        let pri_key = EcKey::private_key_from_der(der.as_bytes())?;
        Self::from_private(pri_key)
    }

    /// 轉換為持久化表示。
    pub fn to_stored(&self) -> Result<StoredKey> {
        Ok(StoredKey {
            curve: Self::CURVE.to_owned(),
            der: Base64::new(self.pri_key.private_key_to_der()?).base64_url(),
        })
    }

    /// 以單一 `EC PRIVATE KEY` PEM 區塊輸出私鑰。
    pub fn to_pem(&self) -> Result<String> {
        String::from_utf8(self.pri_key.private_key_to_pem()?).map_err(|_| KeyError::PemEncoding)
    }

    /// 包裝成 `PKey`，供 CSR 簽名使用。
    pub fn pkey(&self) -> Result<PKey<Private>> {
        Ok(PKey::from_ec_key(self.pri_key.clone())?)
    }

    /// 公鑰的 DER（SubjectPublicKeyInfo）編碼，可用於比較兩組金鑰是否相同。
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.pub_key.public_key_to_der()?)
    }

    /// 取得公鑰的仿射座標 (x, y)，各自補齊為 32 位元組。
    pub fn coordinates(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut ctx = BigNumContext::new()?;
        let mut x = openssl::bn::BigNum::new()?;
        let mut y = openssl::bn::BigNum::new()?;
        self.pub_key.public_key().affine_coordinates_gfp(
            self.pub_key.group(),
            &mut x,
            &mut y,
            &mut ctx,
        )?;
        let width = Self::FIELD_BYTES as i32;
        Ok((x.to_vec_padded(width)?, y.to_vec_padded(width)?))
    }

    /// 計算並回傳金鑰對的縮影（RFC 7638 thumbprint）。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::new(self)?;
        let hash = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }

    fn group() -> Result<EcGroup> {
        Ok(EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?)
    }

    fn from_private(pri_key: EcKey<Private>) -> Result<Self> {
        match pri_key.group().curve_name() {
            Some(Nid::X9_62_PRIME256V1) => {}
            other => {
                let name = other
                    .and_then(|nid| nid.short_name().ok())
                    .unwrap_or("unknown");
                return Err(KeyError::UnsupportedCurve(name.to_owned()));
            }
        }
        pri_key.check_key()?;
        let pub_key = EcKey::from_public_key(pri_key.group(), pri_key.public_key())?;

        Ok(Self {
            alg_name: "ES256".to_owned(),
            pri_key,
            pub_key,
        })
    }
}
