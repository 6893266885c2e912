use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    account::Account,
    client::{AcmeClient, ClientError, Problem},
    payload::Identifier,
};

/// 建立訂單時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order rejected: {reason}")]
    OrderRejected { reason: String },
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, OrderError>;

/// 訂單狀態，由 CA 驅動：`pending → ready → processing → valid`，或 `invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// 一份 ACME 訂單。`url` 來自 `Location` 標頭，不在回應主體內。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    #[serde(skip)]
    pub url: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub expires: Option<String>,
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Order {
    pub fn from_json(url: &str, json: &str) -> std::result::Result<Self, serde_json::Error> {
        let mut order: Order = serde_json::from_str(json)?;
        order.url = url.to_owned();
        Ok(order)
    }

    /// 訂單識別項的值，萬用字元保留 `*.` 前綴。
    pub fn identifier_values(&self) -> Vec<String> {
        self.identifiers.iter().map(|i| i.value.clone()).collect()
    }
}

/// 依輸入順序為網域清單建立訂單。
pub struct OrderOrchestrator<'a> {
    client: &'a dyn AcmeClient,
}

impl<'a> OrderOrchestrator<'a> {
    pub fn new(client: &'a dyn AcmeClient) -> Self {
        OrderOrchestrator { client }
    }

    /// 送出 `newOrder`。CA 以問題文件拒絕、訂單一開始就是 `invalid`，
    /// 或沒有任何授權時，回傳 [`OrderError::OrderRejected`]。
    /// 5xx 與 `badNonce` 屬於暫時性錯誤，以 [`OrderError::Client`] 原樣傳回。
    pub fn create_order(&self, account: &Account, domains: &[String]) -> Result<Order> {
        let identifiers: Vec<Identifier> = domains.iter().map(Identifier::dns).collect();

        let order = match self.client.new_order(account, &identifiers) {
            Ok(order) => order,
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(ClientError::Problem { problem, .. }) => {
                warn!("CA rejected order for {:?}: {}", domains, problem);
                return Err(OrderError::OrderRejected {
                    reason: problem.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if order.status == OrderStatus::Invalid {
            let reason = order
                .error
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "order is invalid".to_owned());
            return Err(OrderError::OrderRejected { reason });
        }
        if order.authorizations.is_empty() {
            return Err(OrderError::OrderRejected {
                reason: "order has no authorizations".to_owned(),
            });
        }

        info!(
            "Created order {} ({:?}) with {} authorization(s)",
            order.url,
            order.status,
            order.authorizations.len()
        );
        Ok(order)
    }
}
