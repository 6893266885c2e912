//! 單一授權的 DNS-01 挑戰流程。
//!
//! 每個授權 URL 由一個 [`ChallengeFulfiller::fulfill`] 呼叫處理，彼此之間
//! 不共享可變狀態；帳戶、client 與 resolver 在並行期間都是唯讀的。

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    account::Account,
    barrier::CancelToken,
    challenge::{Authorization, AuthorizationStatus, ChallengeStatus, ChallengeType},
    client::{AcmeClient, ClientError},
    dns::{DnsError, DnsResolver, TxtRecord},
    poll::{poll_until, retry_transient, PollError, PollPolicy},
};

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("No dns-01 challenge offered for {domain}")]
    ChallengeTypeMissing { domain: String },
    #[error("TXT record {record} does not contain {expected} (observed {observed:?})")]
    ChallengeUnproven {
        record: String,
        expected: String,
        observed: Vec<String>,
    },
    #[error("CA rejected the challenge response for {domain}: {source}")]
    ChallengeUpdate {
        domain: String,
        #[source]
        source: ClientError,
    },
    #[error("Authorization for {domain} is invalid: {detail}")]
    AuthorizationInvalid { domain: String, detail: String },
    #[error("Authorization for {domain} is still pending")]
    AuthorizationPending { domain: String },
    #[error("Failed to publish TXT record: {0}")]
    Dns(#[from] DnsError),
    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ChallengeError>;

impl From<PollError<ClientError>> for ChallengeError {
    fn from(err: PollError<ClientError>) -> Self {
        match err {
            PollError::Failed(e) => ChallengeError::Client(e),
            PollError::Cancelled | PollError::Exhausted { .. } => ChallengeError::Cancelled,
        }
    }
}

/// 完成單一授權所需的協作者與策略。
pub struct ChallengeFulfiller<'a> {
    client: &'a dyn AcmeClient,
    resolver: &'a dyn DnsResolver,
    account: &'a Account,
    dns_check: PollPolicy,
    authorization_poll: PollPolicy,
}

impl<'a> ChallengeFulfiller<'a> {
    pub fn new(
        client: &'a dyn AcmeClient,
        resolver: &'a dyn DnsResolver,
        account: &'a Account,
    ) -> Self {
        ChallengeFulfiller {
            client,
            resolver,
            account,
            dns_check: PollPolicy::once(),
            authorization_poll: PollPolicy::once(),
        }
    }

    pub fn dns_check(mut self, policy: PollPolicy) -> Self {
        self.dns_check = policy;
        self
    }

    pub fn authorization_poll(mut self, policy: PollPolicy) -> Self {
        self.authorization_poll = policy;
        self
    }

    /// 完成 `auth_url` 的 DNS-01 挑戰並等待授權生效，回傳已證明的網域。
    pub fn fulfill(&self, auth_url: &str, cancel: &CancelToken) -> Result<String> {
        debug!("Fetching authorization {}", auth_url);
        let authorization = retry_transient(self.authorization_poll, cancel, auth_url, || {
            self.client.fetch_authorization(self.account, auth_url)
        })?;
        let domain = authorization.domain();

        let challenge = authorization
            .dns_challenge()
            .ok_or_else(|| ChallengeError::ChallengeTypeMissing {
                domain: domain.clone(),
            })?;

        match authorization.status {
            AuthorizationStatus::Valid => {
                info!("Authorization for {} is already valid", domain);
                return Ok(domain);
            }
            status if status.is_terminal_failure() => {
                return Err(ChallengeError::AuthorizationInvalid {
                    detail: describe(&authorization),
                    domain,
                });
            }
            _ => {}
        }

        let record = TxtRecord::new(authorization.record_name(), challenge.dns_txt_value());
        self.resolver.present(&record)?;
        self.prove(&record, cancel)?;

        if cancel.is_cancelled() {
            return Err(ChallengeError::Cancelled);
        }
        info!("Notifying CA that {} is ready: {}", domain, challenge.url);
        let updated = self
            .client
            .update_challenge(self.account, challenge)
            .map_err(|source| ChallengeError::ChallengeUpdate {
                domain: domain.clone(),
                source,
            })?;
        if updated.status == ChallengeStatus::Invalid {
            let detail = updated
                .error
                .map(|p| p.to_string())
                .unwrap_or_else(|| "challenge is invalid".to_owned());
            return Err(ChallengeError::AuthorizationInvalid { domain, detail });
        }

        self.wait_valid(auth_url, &domain, cancel)?;
        info!("Authorization for {} is valid", domain);
        Ok(domain)
    }

    /// 查詢 TXT 記錄直到出現完全相同的值。
    fn prove(&self, record: &TxtRecord, cancel: &CancelToken) -> Result<()> {
        let mut observed = Vec::new();
        let result = poll_until(self.dns_check, cancel, &record.name, |attempt| {
            match self.resolver.lookup_txt(&record.name) {
                Ok(values) if values.iter().any(|v| *v == record.value) => Ok(Some(())),
                Ok(values) => {
                    debug!(
                        "{} has {:?}, expected {} (attempt {})",
                        record.name, values, record.value, attempt
                    );
                    observed = values;
                    Ok(None)
                }
                Err(e) => {
                    warn!("TXT lookup for {} failed: {}", record.name, e);
                    observed.clear();
                    Ok::<_, ChallengeError>(None)
                }
            }
        });

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Exhausted { .. }) => Err(ChallengeError::ChallengeUnproven {
                record: record.name.clone(),
                expected: record.value.clone(),
                observed,
            }),
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Cancelled) => Err(ChallengeError::Cancelled),
        }
    }

    fn wait_valid(&self, auth_url: &str, domain: &str, cancel: &CancelToken) -> Result<()> {
        let result = poll_until(self.authorization_poll, cancel, auth_url, |_| {
            match self.client.fetch_authorization(self.account, auth_url) {
                Ok(auth) => match auth.status {
                    AuthorizationStatus::Valid => Ok(Some(())),
                    status if status.is_terminal_failure() => {
                        Err(ChallengeError::AuthorizationInvalid {
                            domain: domain.to_owned(),
                            detail: describe(&auth),
                        })
                    }
                    _ => Ok(None),
                },
                Err(e) if e.is_transient() => {
                    warn!("Polling {} failed: {}", auth_url, e);
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        });

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Exhausted { .. }) => Err(ChallengeError::AuthorizationPending {
                domain: domain.to_owned(),
            }),
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Cancelled) => Err(ChallengeError::Cancelled),
        }
    }
}

fn describe(authorization: &Authorization) -> String {
    authorization
        .challenges
        .get(&ChallengeType::Dns01)
        .and_then(|c| c.error.as_ref())
        .map(|p| p.to_string())
        .unwrap_or_else(|| format!("status {:?}", authorization.status))
}
