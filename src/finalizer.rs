use std::{collections::BTreeSet, path::PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    account::Account,
    barrier::CancelToken,
    certificate::{CertificateChain, CertificateError},
    client::{AcmeClient, ClientError},
    csr::{CsrError, CSR},
    key_pair::{KeyError, KeyPair},
    order::{Order, OrderStatus},
    poll::{poll_until, retry_transient, PollError, PollPolicy},
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("Order identifiers {ordered:?} do not match requested domains {requested:?}")]
    IdentifierMismatch {
        ordered: Vec<String>,
        requested: Vec<String>,
    },
    #[error("Finalize request failed: {0}")]
    Finalization(#[source] ClientError),
    #[error("CA rejected finalization: {reason}")]
    FinalizationRejected { reason: String },
    #[error("Certificate for order {order_url} is not ready")]
    CertificateNotReady { order_url: String },
    #[error("Failed to fetch certificate: {0}")]
    Fetch(#[source] ClientError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FinalizeError>;

/// 產生憑證金鑰與 CSR、完成訂單並儲存證書鏈。
pub struct CertificateFinalizer<'a> {
    client: &'a dyn AcmeClient,
    storage: &'a dyn Storage,
    key_file: PathBuf,
    cert_file: PathBuf,
    order_poll: PollPolicy,
}

impl<'a> CertificateFinalizer<'a> {
    pub fn new(
        client: &'a dyn AcmeClient,
        storage: &'a dyn Storage,
        key_file: impl Into<PathBuf>,
        cert_file: impl Into<PathBuf>,
    ) -> Self {
        CertificateFinalizer {
            client,
            storage,
            key_file: key_file.into(),
            cert_file: cert_file.into(),
            order_poll: PollPolicy::once(),
        }
    }

    pub fn order_poll(mut self, policy: PollPolicy) -> Self {
        self.order_poll = policy;
        self
    }

    /// 呼叫前所有授權都必須已經是 valid。
    ///
    /// 金鑰檔在任何網路請求之前寫入；證書檔只在整個流程成功時寫入。
    pub fn finalize(
        &self,
        account: &Account,
        order: &Order,
        domains: &[String],
        cancel: &CancelToken,
    ) -> Result<CertificateChain> {
        let ordered: BTreeSet<&str> = order.identifiers.iter().map(|i| i.value.as_str()).collect();
        let requested: BTreeSet<&str> = domains.iter().map(String::as_str).collect();
        if ordered != requested || domains.is_empty() {
            return Err(FinalizeError::IdentifierMismatch {
                ordered: order.identifier_values(),
                requested: domains.to_vec(),
            });
        }

        info!("Generating certificate private key");
        let cert_key = KeyPair::generate()?;
        info!("Writing key file: {}", self.key_file.display());
        self.storage
            .write_file(&self.key_file, cert_key.to_pem()?.as_bytes())?;

        let csr = CSR::new()
            .set_sans(domains)
            .build(&cert_key)?
            .to_der()
            .map_err(CsrError::from)?;

        if cancel.is_cancelled() {
            return Err(FinalizeError::Cancelled);
        }
        info!("Finalising order: {}", order.url);
        let finalized = self
            .client
            .finalize_order(account, order, &csr)
            .map_err(FinalizeError::Finalization)?;

        let certificate_url = match ready_certificate(&finalized)? {
            Some(url) => url,
            None => self.wait_certificate(account, &finalized, cancel)?,
        };

        info!("Fetching certificate: {}", certificate_url);
        let chain = retry_transient(self.order_poll, cancel, &certificate_url, || {
            self.client.fetch_certificates(account, &certificate_url)
        })
        .map_err(|e| match e {
            PollError::Failed(e) => FinalizeError::Fetch(e),
            PollError::Cancelled | PollError::Exhausted { .. } => FinalizeError::Cancelled,
        })?;

        info!("Saving certificate to: {}", self.cert_file.display());
        self.storage
            .write_file(&self.cert_file, chain.to_pem()?.as_bytes())?;
        match chain.days_remaining() {
            Ok(days) => info!("Certificate expires in {} day(s)", days),
            Err(e) => debug!("Could not read certificate expiry: {}", e),
        }
        Ok(chain)
    }

    fn wait_certificate(
        &self,
        account: &Account,
        order: &Order,
        cancel: &CancelToken,
    ) -> Result<String> {
        let result = poll_until(self.order_poll, cancel, &order.url, |_| {
            match self.client.fetch_order(account, &order.url) {
                Ok(current) => ready_certificate(&current),
                Err(e) if e.is_transient() => {
                    warn!("Polling order {} failed: {}", order.url, e);
                    Ok(None)
                }
                Err(e) => Err(FinalizeError::Finalization(e)),
            }
        });

        match result {
            Ok(url) => Ok(url),
            Err(PollError::Exhausted { .. }) => Err(FinalizeError::CertificateNotReady {
                order_url: order.url.clone(),
            }),
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Cancelled) => Err(FinalizeError::Cancelled),
        }
    }
}

/// 訂單已簽發時回傳證書 URL；`invalid` 視為 CA 拒絕。
fn ready_certificate(order: &Order) -> Result<Option<String>> {
    match order.status {
        OrderStatus::Valid => Ok(order.certificate.clone()),
        OrderStatus::Invalid => Err(FinalizeError::FinalizationRejected {
            reason: order
                .error
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "order is invalid".to_owned()),
        }),
        _ => Ok(None),
    }
}
