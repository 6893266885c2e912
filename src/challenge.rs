use std::collections::HashMap;

use log::debug;
use openssl::sha::sha256;
use serde::Deserialize;

use crate::{base64::Base64, client::Problem, payload::Identifier};

/// ACME 挑戰類型。只有 DNS-01 會被實際完成，其餘類型僅解析保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 根據字串返回對應的挑戰類型，若不認識則返回 `None`。
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http-01" => Some(Self::Http01),
            "dns-01" => Some(Self::Dns01),
            "tls-alpn-01" => Some(Self::TlsAlpn01),
            _ => None,
        }
    }
}

/// 挑戰狀態（RFC 8555 §7.1.6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 是否已無法再轉為 valid。
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            Self::Invalid | Self::Deactivated | Self::Expired | Self::Revoked
        )
    }
}

/// 一個 ACME 驗證挑戰。
#[derive(Debug, Clone)]
pub struct Challenge {
    pub challenge_type: ChallengeType,
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
    /// `token.thumbprint`，綁定帳戶金鑰。
    pub key_authorization: String,
    pub error: Option<Problem>,
}

impl Challenge {
    /// DNS-01 的 TXT 記錄值：對 key authorization 做 SHA-256 後以 base64url 編碼。
    pub fn dns_txt_value(&self) -> String {
        dns_txt_value(&self.key_authorization)
    }
}

/// 將 key authorization 編碼為 DNS-01 記錄值。
pub fn dns_txt_value(key_authorization: &str) -> String {
    Base64::new(sha256(key_authorization.as_bytes())).base64_url()
}

/// 單一識別項的授權，包含可選用的挑戰。
#[derive(Debug, Clone)]
pub struct Authorization {
    pub url: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub wildcard: bool,
    pub challenges: HashMap<ChallengeType, Challenge>,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    identifier: Identifier,
    status: AuthorizationStatus,
    #[serde(default)]
    wildcard: bool,
    challenges: Vec<ChallengeResponse>,
}

#[derive(Deserialize)]
pub(crate) struct ChallengeResponse {
    r#type: String,
    url: String,
    status: ChallengeStatus,
    #[serde(default)]
    token: String,
    #[serde(default)]
    error: Option<Problem>,
}

impl Authorization {
    /// 解析授權回應，並以帳戶 thumbprint 建立各挑戰的 key authorization。
    ///
    /// 不認識的挑戰類型直接略過。
    pub fn from_json(url: &str, json: &str, thumbprint: &str) -> Result<Self, serde_json::Error> {
        let response: AuthorizationResponse = serde_json::from_str(json)?;

        let mut challenges = HashMap::new();
        for resp in response.challenges {
            match Challenge::from_response(resp, thumbprint) {
                Some(challenge) => {
                    challenges.insert(challenge.challenge_type.clone(), challenge);
                }
                None => debug!("Skipping unsupported challenge type in {}", url),
            }
        }

        Ok(Self {
            url: url.to_owned(),
            identifier: response.identifier,
            status: response.status,
            wildcard: response.wildcard,
            challenges,
        })
    }

    /// 此授權所證明的網域；萬用字元授權的識別項不含 `*.`，這裡補回。
    pub fn domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// TXT 記錄所在名稱，萬用字元與基底網域共用同一名稱。
    pub fn record_name(&self) -> String {
        crate::dns::record_name(&self.identifier.value)
    }

    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenges.get(&ChallengeType::Dns01)
    }
}

impl Challenge {
    pub(crate) fn from_response(resp: ChallengeResponse, thumbprint: &str) -> Option<Self> {
        let challenge_type = ChallengeType::parse(&resp.r#type)?;
        let key_authorization = format!("{}.{}", resp.token, thumbprint);

        Some(Self {
            challenge_type,
            url: resp.url,
            token: resp.token,
            status: resp.status,
            key_authorization,
            error: resp.error,
        })
    }

    /// 解析挑戰更新後的回應。
    pub fn from_json(json: &str, thumbprint: &str) -> Result<Option<Self>, serde_json::Error> {
        let resp: ChallengeResponse = serde_json::from_str(json)?;
        Ok(Self::from_response(resp, thumbprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHZ: &str = r#"{
        "status": "pending",
        "expires": "2026-10-25T00:00:00Z",
        "identifier": {"type": "dns", "value": "example.test"},
        "wildcard": true,
        "challenges": [
            {"type": "http-01", "url": "https://acme.test/chall/1", "status": "pending", "token": "tok-http"},
            {"type": "dns-01", "url": "https://acme.test/chall/2", "status": "pending", "token": "tok-dns"},
            {"type": "dns-account-01", "url": "https://acme.test/chall/3", "status": "pending", "token": "tok-x"}
        ]
    }"#;

    #[test]
    fn test_parse_authorization() {
        let authz = Authorization::from_json("https://acme.test/authz/1", AUTHZ, "thumb").unwrap();
        assert_eq!(authz.status, AuthorizationStatus::Pending);
        assert_eq!(authz.domain(), "*.example.test");
        assert_eq!(authz.record_name(), "_acme-challenge.example.test");
        assert_eq!(authz.challenges.len(), 2);

        let dns = authz.dns_challenge().unwrap();
        assert_eq!(dns.token, "tok-dns");
        assert_eq!(dns.key_authorization, "tok-dns.thumb");
        assert_eq!(dns.url, "https://acme.test/chall/2");
    }

    #[test]
    fn test_authorization_without_dns_challenge() {
        let json = r#"{
            "status": "pending",
            "identifier": {"type": "dns", "value": "example.test"},
            "challenges": [
                {"type": "http-01", "url": "https://acme.test/chall/1", "status": "pending", "token": "t"}
            ]
        }"#;
        let authz = Authorization::from_json("u", json, "thumb").unwrap();
        assert!(!authz.wildcard);
        assert_eq!(authz.domain(), "example.test");
        assert!(authz.dns_challenge().is_none());
    }

    #[test]
    fn test_dns_txt_value_known_vector() {
        // base64url(SHA-256(keyAuthorization))，無填充
        assert_eq!(
            dns_txt_value("token.thumbprint"),
            "61rBZ_4knHblO0MNoxFsXZ_eTFUHum0B6IVRbhvUn5I"
        );
        assert_eq!(
            dns_txt_value(
                "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.9jg46WB3rR_AHD-EBXdN7cBkH1WOu0tA3M9fm21mqTI"
            ),
            "lCM7cZyQXcVHK2nnW3jjAhNT3Fvm18UN-kWZZknKoYM"
        );
    }

    #[test]
    fn test_challenge_update_response() {
        let json = r#"{"type": "dns-01", "url": "https://acme.test/chall/2", "status": "invalid",
            "token": "tok", "error": {"type": "urn:ietf:params:acme:error:unauthorized", "detail": "no TXT"}}"#;
        let challenge = Challenge::from_json(json, "thumb").unwrap().unwrap();
        assert_eq!(challenge.status, ChallengeStatus::Invalid);
        assert_eq!(challenge.error.unwrap().detail, "no TXT");
    }
}
