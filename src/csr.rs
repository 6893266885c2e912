use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::{KeyError, KeyPair};

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("No SAN entries")]
    NoSanEntries,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器。第一個加入的名稱同時作為 CN，所有名稱皆列入 SAN。
///
/// ```
/// use racme_dns::{csr::CSR, key_pair::KeyPair};
///
/// let key_pair = KeyPair::generate().unwrap();
/// let der = CSR::new()
///     .set_san("example.test")
///     .set_san("*.example.test")
///     .build(&key_pair)
///     .unwrap()
///     .to_der()
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct CSR {
    san_entries: Vec<String>,
}

impl CSR {
    pub fn new() -> Self {
        CSR {
            san_entries: Vec::new(),
        }
    }

    /// 新增一個 DNS 主體替代名稱。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 一次加入多個名稱，順序保持不變。
    pub fn set_sans<S: AsRef<str>>(mut self, dns_names: &[S]) -> Self {
        self.san_entries
            .extend(dns_names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    /// 以 SHA-256 與給定金鑰簽署 CSR。未設定任何名稱時回傳 `CsrError::NoSanEntries`。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let common_name = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;
        let pkey = key_pair.pkey()?;

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&pkey)?;
        req_builder.sign(&pkey, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}
