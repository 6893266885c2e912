use chrono::Utc;
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Certificate PEM is not valid UTF-8")]
    Encoding,
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

/// CA 回傳的證書鏈，葉證書在前，順序與 CA 一致。
#[derive(Clone)]
pub struct CertificateChain {
    certs: Vec<X509>,
}

impl std::fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateChain")
            .field("len", &self.certs.len())
            .finish()
    }
}

impl CertificateChain {
    /// 解析 `application/pem-certificate-chain` 內容。不含任何證書時回傳錯誤。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certs = X509::stack_from_pem(pem)?;
        if certs.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(CertificateChain { certs })
    }

    pub fn leaf(&self) -> &X509 {
        &self.certs[0]
    }

    pub fn certs(&self) -> &[X509] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// 輸出為單一 PEM 文件：每個區塊去除首尾空白後以換行串接。
    pub fn to_pem(&self) -> Result<String> {
        let mut blocks = Vec::with_capacity(self.certs.len());
        for cert in &self.certs {
            let pem = String::from_utf8(cert.to_pem()?).map_err(|_| CertificateError::Encoding)?;
            blocks.push(pem.trim().to_owned());
        }
        let mut out = blocks.join("\n");
        out.push('\n');
        Ok(out)
    }

    /// 葉證書距離到期的剩餘天數，已過期時為負值。
    pub fn days_remaining(&self) -> Result<i64> {
        let now = Asn1Time::from_unix(Utc::now().timestamp())?;
        let diff = now.diff(self.leaf().not_after())?;
        Ok(diff.days as i64)
    }
}
