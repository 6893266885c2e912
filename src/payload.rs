use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::base64::Base64;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 送出前會先呼叫 [`PayloadT::validate`]，避免把明顯錯誤的請求交給 CA。
pub trait PayloadT: Serialize {
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 先轉成 JSON 字串，再包成 [`Base64`]。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    fn validate(&self) -> Result<(), Box<dyn Error>>;
}

/// 為電子郵件補上 `mailto:` 前綴，已有前綴者維持不變。
pub fn mailto(email: &str) -> String {
    if email.starts_with("mailto:") {
        email.to_string()
    } else {
        format!("mailto:{}", email)
    }
}

/// 建立新帳號所需的載荷：聯絡方式與服務條款同意。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    pub fn new(emails: &[String], terms_of_service_agreed: bool) -> Self {
        NewAccountPayload {
            contact: emails.iter().map(|email| mailto(email)).collect(),
            terms_of_service_agreed,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if !self.terms_of_service_agreed {
            return Err("Terms of service must be agreed".into());
        }
        validate_contacts(&self.contact)
    }
}

/// 更新帳戶時的載荷；聯絡方式為空時只確認帳戶狀態。
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
}

impl UpdateAccountPayload {
    pub fn new(emails: &[String]) -> Self {
        let contact = if emails.is_empty() {
            None
        } else {
            Some(emails.iter().map(|email| mailto(email)).collect())
        };
        UpdateAccountPayload { contact }
    }
}

impl PayloadT for UpdateAccountPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        match &self.contact {
            Some(contact) => validate_contacts(contact),
            None => Ok(()),
        }
    }
}

fn validate_contacts(contact: &[String]) -> Result<(), Box<dyn Error>> {
    for entry in contact {
        let address = entry.trim_start_matches("mailto:");
        if address.is_empty() || !address.contains('@') {
            return Err(format!("Invalid contact: {}", entry).into());
        }
    }
    Ok(())
}

/// 證書所涵蓋的識別項；本 crate 只產生 `dns` 類型。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// 建立新訂單時的載荷，識別項順序與輸入一致。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(identifiers: &[Identifier]) -> Self {
        NewOrderPayload {
            identifiers: identifiers.to_vec(),
        }
    }
}

impl PayloadT for NewOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err("Identifier type must be 'dns'".into());
            }
            if identifier.value.is_empty() {
                return Err("Identifier value cannot be empty".into());
            }
        }
        Ok(())
    }
}

/// 通知 CA 挑戰已就緒，內容為空物件。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// 最終確認訂單的載荷，`csr` 為 DER 的 base64url。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.csr_b64_str.is_empty() {
            return Err("CSR cannot be empty".into());
        }
        Ok(())
    }
}
