use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};

pub use base64::DecodeError;

/// ACME 所需的 Base64 封裝。
///
/// 內部保存原始位元組，輸出時依需求選擇 URL-safe（無填充）或標準編碼。
/// JWS 各欄位、JWK 座標、DNS-01 記錄值都使用 [`Base64::base64_url`]。
///
/// # 示例
///
/// ```
/// # use racme_dns::base64::Base64;
/// let b64 = Base64::new("abc");
/// assert_eq!(b64.base64_url(), "YWJj");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    bytes: Vec<u8>,
}

impl Base64 {
    /// 以任何可轉為位元組切片的資料建立實例。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            bytes: input.as_ref().to_vec(),
        }
    }

    /// 從 URL-safe 字串解碼，接受帶或不帶 `=` 填充的輸入。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let trimmed = url_encoded.trim_end_matches('=');
        Ok(Self {
            bytes: URL_SAFE_NO_PAD.decode(trimmed)?,
        })
    }

    /// 取得原始位元組。
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 取回原始位元組的所有權。
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// URL-safe、無填充的編碼結果（RFC 7515 `base64url`）。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    /// 標準 Base64 編碼（含填充）。
    pub fn standard(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}
