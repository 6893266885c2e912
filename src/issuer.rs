//! 簽發流程的進入點：帳戶 → 訂單 → 並行挑戰 → 屏障 → 完成訂單。

use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::{
    account::{AccountError, AccountManager},
    barrier::{BarrierError, CancelToken, CompletionBarrier},
    certificate::CertificateChain,
    client::{AcmeClient, ClientError},
    config::{Config, ConfigError},
    dns::DnsResolver,
    finalizer::{CertificateFinalizer, FinalizeError},
    fulfiller::{ChallengeError, ChallengeFulfiller},
    order::{OrderError, OrderOrchestrator},
    storage::Storage,
};

/// 整個簽發流程的錯誤，依階段分類。
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to connect to the CA: {0}")]
    Client(#[from] ClientError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Order error: {0}")]
    Order(#[from] OrderError),
    #[error("Validation failed: {0}")]
    Validation(#[from] BarrierError<ChallengeError>),
    #[error("Finalization failed: {0}")]
    Finalize(#[from] FinalizeError),
}

pub type Result<T> = std::result::Result<T, IssueError>;

/// 簽發成功後的結果。
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub domains: Vec<String>,
    pub order_url: String,
    pub chain: CertificateChain,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

pub struct Issuer<'a> {
    config: &'a Config,
    client: &'a dyn AcmeClient,
    resolver: &'a dyn DnsResolver,
    storage: &'a dyn Storage,
}

impl<'a> Issuer<'a> {
    pub fn new(
        config: &'a Config,
        client: &'a dyn AcmeClient,
        resolver: &'a dyn DnsResolver,
        storage: &'a dyn Storage,
    ) -> Self {
        Issuer {
            config,
            client,
            resolver,
            storage,
        }
    }

    pub fn issue(&self) -> Result<IssuedCertificate> {
        let config = self.config;

        info!("Loading account file {}", config.account_file.display());
        let account = AccountManager::new(
            self.client,
            self.storage,
            &config.account_file,
            &config.contacts,
        )
        .load_or_create()?;
        info!("Account url: {}", account.url);

        info!("Creating new order for domains: {:?}", config.domains);
        let order = OrderOrchestrator::new(self.client).create_order(&account, &config.domains)?;
        info!("Order created: {}", order.url);

        let fulfiller = ChallengeFulfiller::new(self.client, self.resolver, &account)
            .dns_check(config.dns_check)
            .authorization_poll(config.authorization_poll);
        let proven = CompletionBarrier::new(config.deadline)
            .wait_all(&order.authorizations, |auth_url, cancel| {
                fulfiller.fulfill(auth_url, cancel)
            })?;
        info!("All {} challenge(s) completed: {:?}", proven.len(), proven);

        let chain = CertificateFinalizer::new(
            self.client,
            self.storage,
            &config.key_file,
            &config.cert_file,
        )
        .order_poll(config.order_poll)
        .finalize(&account, &order, &config.domains, &CancelToken::new())?;

        info!("Done.");
        Ok(IssuedCertificate {
            domains: config.domains.clone(),
            order_url: order.url,
            chain,
            cert_file: config.cert_file.clone(),
            key_file: config.key_file.clone(),
        })
    }
}
