//! 測試用的假 CA 與假 DNS。

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    x509::{extension::SubjectAlternativeName, X509Builder, X509NameBuilder, X509Req, X509},
};
use reqwest::StatusCode;

use crate::{
    account::Account,
    certificate::CertificateChain,
    challenge::{
        dns_txt_value, Authorization, AuthorizationStatus, Challenge, ChallengeStatus,
        ChallengeType,
    },
    client::{AcmeClient, ClientError, Problem, Result},
    dns::{DnsError, DnsResolver, TxtRecord},
    key_pair::KeyPair,
    order::{Order, OrderStatus},
    payload::Identifier,
};

const BASE: &str = "https://acme.test";

pub fn test_account() -> Account {
    Account {
        url: format!("{}/acct/test", BASE),
        key_pair: KeyPair::generate().unwrap(),
    }
}

/// 以 `key` 自簽一張涵蓋 `names` 的證書，有效 `days` 天。
pub fn self_signed(key: &KeyPair, names: &[&str], days: u32) -> X509 {
    let pkey = key.pkey().unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", names[0]).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(days).unwrap())
        .unwrap();
    let mut san = SubjectAlternativeName::new();
    for n in names {
        san.dns(n);
    }
    let san = san.build(&builder.x509v3_context(None, None)).unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn problem(status: StatusCode, kind: &str, detail: &str) -> ClientError {
    ClientError::Problem {
        status,
        problem: Problem {
            problem_type: format!("urn:ietf:params:acme:error:{}", kind),
            detail: detail.to_owned(),
            subproblems: Vec::new(),
        },
    }
}

struct FakeAuthorization {
    identifier: Identifier,
    wildcard: bool,
    token: String,
    challenge_url: String,
    has_dns: bool,
    valid_from_start: bool,
    updated: bool,
    invalid: bool,
    pending_polls_left: u32,
}

impl FakeAuthorization {
    fn domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }
}

struct FakeOrder {
    identifiers: Vec<Identifier>,
    authorizations: Vec<String>,
    finalized: bool,
    processing_polls_left: u32,
    certificate: Option<String>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    accounts: HashMap<String, bool>,
    contacts: Vec<String>,
    orders: HashMap<String, FakeOrder>,
    authorizations: HashMap<String, FakeAuthorization>,
    certificates: HashMap<String, Vec<u8>>,
    events: Vec<String>,
    last_csr: Option<Vec<u8>>,

    rejected_identifiers: HashSet<String>,
    reject_registration: bool,
    reject_finalize: bool,
    no_dns: HashSet<String>,
    prevalidated: HashSet<String>,
    rejected_updates: HashSet<String>,
    invalid_challenges: HashSet<String>,
    pending_polls: u32,
    processing_polls: u32,
    failing_fetches: u32,
    failing_orders: u32,
}

impl State {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_status(&self, order: &FakeOrder) -> OrderStatus {
        if order.finalized {
            if order.processing_polls_left > 0 {
                OrderStatus::Processing
            } else {
                OrderStatus::Valid
            }
        } else if order
            .authorizations
            .iter()
            .all(|url| self.authorization_valid(url))
        {
            OrderStatus::Ready
        } else {
            OrderStatus::Pending
        }
    }

    fn authorization_valid(&self, url: &str) -> bool {
        self.authorizations
            .get(url)
            .map(|a| a.valid_from_start || (a.updated && !a.invalid && a.pending_polls_left == 0))
            .unwrap_or(false)
    }

    fn to_order(&self, url: &str) -> Order {
        let order = &self.orders[url];
        let status = self.order_status(order);
        Order {
            url: url.to_owned(),
            status,
            expires: None,
            identifiers: order.identifiers.clone(),
            authorizations: order.authorizations.clone(),
            finalize: format!("{}/finalize", url),
            certificate: if status == OrderStatus::Valid {
                order.certificate.clone()
            } else {
                None
            },
            error: None,
        }
    }
}

/// 記憶體中的 CA。每個請求都會立即處理，狀態變化可透過設定方法調整。
#[derive(Default)]
pub struct FakeAcme {
    state: Mutex<State>,
}

impl FakeAcme {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn reject_identifier(&self, value: &str) {
        self.state().rejected_identifiers.insert(value.to_owned());
    }

    pub fn reject_registration(&self) {
        self.state().reject_registration = true;
    }

    pub fn deactivate_accounts(&self) {
        for active in self.state().accounts.values_mut() {
            *active = false;
        }
    }

    pub fn reject_finalize(&self) {
        self.state().reject_finalize = true;
    }

    /// 之後建立的 `domain` 授權不提供 dns-01。
    pub fn omit_dns_challenge(&self, domain: &str) {
        self.state().no_dns.insert(domain.to_owned());
    }

    /// 之後建立的 `domain` 授權一開始就是 valid。
    pub fn prevalidate(&self, domain: &str) {
        self.state().prevalidated.insert(domain.to_owned());
    }

    pub fn reject_challenge_update(&self, domain: &str) {
        self.state().rejected_updates.insert(domain.to_owned());
    }

    pub fn invalidate_challenge(&self, domain: &str) {
        self.state().invalid_challenges.insert(domain.to_owned());
    }

    /// 挑戰送出後，授權還會維持 pending `polls` 次查詢。
    pub fn pending_polls(&self, polls: u32) {
        self.state().pending_polls = polls;
    }

    /// 完成訂單後，訂單還會維持 processing `polls` 次查詢。
    pub fn processing_polls(&self, polls: u32) {
        self.state().processing_polls = polls;
    }

    /// 接下來 `count` 次授權查詢回傳 503。
    pub fn fail_next_fetches(&self, count: u32) {
        self.state().failing_fetches = count;
    }

    /// 接下來 `count` 次建立訂單回傳 500 `serverInternal`。
    pub fn fail_next_orders(&self, count: u32) {
        self.state().failing_orders = count;
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub fn registered_contacts(&self) -> Vec<String> {
        self.state().contacts.clone()
    }

    pub fn account_count(&self) -> usize {
        self.state().accounts.len()
    }

    pub fn last_csr(&self) -> Option<Vec<u8>> {
        self.state().last_csr.clone()
    }

    pub fn expected_txt_value(&self, auth_url: &str, account: &Account) -> String {
        let token = self.state().authorizations[auth_url].token.clone();
        dns_txt_value(&format!(
            "{}.{}",
            token,
            account.key_pair.thumbprint().unwrap()
        ))
    }
}

impl AcmeClient for FakeAcme {
    fn new_account(&self, _key_pair: &KeyPair, contacts: &[String]) -> Result<String> {
        let mut state = self.state();
        if state.reject_registration {
            return Err(problem(
                StatusCode::BAD_REQUEST,
                "invalidContact",
                "contact rejected",
            ));
        }
        let url = format!("{}/acct/{}", BASE, state.id());
        state.accounts.insert(url.clone(), true);
        state.contacts = contacts.to_vec();
        Ok(url)
    }

    fn update_account(&self, account: &Account, contacts: &[String]) -> Result<()> {
        let mut state = self.state();
        match state.accounts.get(&account.url) {
            Some(true) => {
                state.contacts = contacts.to_vec();
                Ok(())
            }
            Some(false) => Err(problem(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "account is deactivated",
            )),
            None => Err(problem(
                StatusCode::BAD_REQUEST,
                "accountDoesNotExist",
                "unknown account",
            )),
        }
    }

    fn new_order(&self, _account: &Account, identifiers: &[Identifier]) -> Result<Order> {
        let mut state = self.state();
        if state.failing_orders > 0 {
            state.failing_orders -= 1;
            return Err(problem(
                StatusCode::INTERNAL_SERVER_ERROR,
                "serverInternal",
                "try again later",
            ));
        }
        if let Some(bad) = identifiers
            .iter()
            .find(|i| state.rejected_identifiers.contains(&i.value))
        {
            return Err(problem(
                StatusCode::BAD_REQUEST,
                "rejectedIdentifier",
                &format!("{} is not allowed", bad.value),
            ));
        }

        let identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|i| Identifier::dns(i.value.to_ascii_lowercase()))
            .collect();
        let order_url = format!("{}/order/{}", BASE, state.id());
        let mut authorizations = Vec::new();
        for identifier in &identifiers {
            let id = state.id();
            let (value, wildcard) = match identifier.value.strip_prefix("*.") {
                Some(base) => (base.to_owned(), true),
                None => (identifier.value.clone(), false),
            };
            let mut authorization = FakeAuthorization {
                identifier: Identifier::dns(value),
                wildcard,
                token: format!("token-{}", id),
                challenge_url: format!("{}/chall/{}", BASE, id),
                has_dns: true,
                valid_from_start: false,
                updated: false,
                invalid: false,
                pending_polls_left: 0,
            };
            let domain = authorization.domain();
            authorization.has_dns = !state.no_dns.contains(&domain);
            authorization.valid_from_start = state.prevalidated.contains(&domain);

            let url = format!("{}/authz/{}", BASE, id);
            state.authorizations.insert(url.clone(), authorization);
            authorizations.push(url);
        }

        let processing_polls = state.processing_polls;
        state.orders.insert(
            order_url.clone(),
            FakeOrder {
                identifiers,
                authorizations,
                finalized: false,
                processing_polls_left: processing_polls,
                certificate: None,
            },
        );
        Ok(state.to_order(&order_url))
    }

    fn fetch_order(&self, _account: &Account, url: &str) -> Result<Order> {
        let mut state = self.state();
        let order = state.to_order(url);
        if let Some(order) = state.orders.get_mut(url) {
            if order.finalized && order.processing_polls_left > 0 {
                order.processing_polls_left -= 1;
            }
        }
        Ok(order)
    }

    fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        let mut state = self.state();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(ClientError::Status {
                url: url.to_owned(),
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            });
        }

        let authorization = state.authorizations.get_mut(url).unwrap();
        let status = if authorization.valid_from_start {
            AuthorizationStatus::Valid
        } else if authorization.invalid {
            AuthorizationStatus::Invalid
        } else if authorization.updated {
            if authorization.pending_polls_left > 0 {
                authorization.pending_polls_left -= 1;
                AuthorizationStatus::Pending
            } else {
                AuthorizationStatus::Valid
            }
        } else {
            AuthorizationStatus::Pending
        };

        let thumbprint = account.key_pair.thumbprint().unwrap();
        let mut challenges = HashMap::new();
        challenges.insert(
            ChallengeType::Http01,
            Challenge {
                challenge_type: ChallengeType::Http01,
                url: format!("{}-http", authorization.challenge_url),
                token: authorization.token.clone(),
                status: ChallengeStatus::Pending,
                key_authorization: format!("{}.{}", authorization.token, thumbprint),
                error: None,
            },
        );
        if authorization.has_dns {
            challenges.insert(
                ChallengeType::Dns01,
                Challenge {
                    challenge_type: ChallengeType::Dns01,
                    url: authorization.challenge_url.clone(),
                    token: authorization.token.clone(),
                    status: ChallengeStatus::Pending,
                    key_authorization: format!("{}.{}", authorization.token, thumbprint),
                    error: None,
                },
            );
        }

        Ok(Authorization {
            url: url.to_owned(),
            identifier: authorization.identifier.clone(),
            status,
            wildcard: authorization.wildcard,
            challenges,
        })
    }

    fn update_challenge(&self, _account: &Account, challenge: &Challenge) -> Result<Challenge> {
        let mut state = self.state();
        let pending_polls = state.pending_polls;
        let (domain, invalid) = {
            let authorization = state
                .authorizations
                .values()
                .find(|a| a.challenge_url == challenge.url)
                .unwrap();
            let domain = authorization.domain();
            if state.rejected_updates.contains(&domain) {
                return Err(problem(
                    StatusCode::BAD_REQUEST,
                    "malformed",
                    "challenge update rejected",
                ));
            }
            let invalid = state.invalid_challenges.contains(&domain);
            (domain, invalid)
        };

        if let Some(authorization) = state
            .authorizations
            .values_mut()
            .find(|a| a.challenge_url == challenge.url)
        {
            authorization.updated = true;
            authorization.invalid = invalid;
            authorization.pending_polls_left = pending_polls;
        }
        state.events.push(format!("challenge:{}", domain));

        let mut updated = challenge.clone();
        if invalid {
            updated.status = ChallengeStatus::Invalid;
            updated.error = Some(Problem {
                problem_type: "urn:ietf:params:acme:error:unauthorized".to_owned(),
                detail: "incorrect TXT record".to_owned(),
                subproblems: Vec::new(),
            });
        } else {
            updated.status = ChallengeStatus::Processing;
        }
        Ok(updated)
    }

    fn finalize_order(&self, _account: &Account, order: &Order, csr_der: &[u8]) -> Result<Order> {
        let mut state = self.state();
        let ready = state.order_status(&state.orders[&order.url]) == OrderStatus::Ready;
        if !ready {
            return Err(problem(
                StatusCode::FORBIDDEN,
                "orderNotReady",
                "authorizations are not valid",
            ));
        }
        state.last_csr = Some(csr_der.to_vec());
        state.events.push("finalize".to_owned());
        if state.reject_finalize {
            return Err(problem(StatusCode::BAD_REQUEST, "badCSR", "CSR rejected"));
        }

        let csr = X509Req::from_der(csr_der).unwrap();
        let csr_key = csr.public_key().unwrap();
        assert!(csr.verify(&csr_key).unwrap());

        let names: Vec<&str> = order.identifiers.iter().map(|i| i.value.as_str()).collect();
        let ca_key = KeyPair::generate().unwrap();
        let leaf = self_signed(&ca_key, &names, 90);
        let issuer = self_signed(&ca_key, &["intermediate.fake.test"], 365);
        let mut pem = leaf.to_pem().unwrap();
        pem.extend(issuer.to_pem().unwrap());

        let cert_url = format!("{}/cert/{}", BASE, state.id());
        state.certificates.insert(cert_url.clone(), pem);
        if let Some(fake) = state.orders.get_mut(&order.url) {
            fake.finalized = true;
            fake.certificate = Some(cert_url);
        }
        Ok(state.to_order(&order.url))
    }

    fn fetch_certificates(&self, _account: &Account, url: &str) -> Result<CertificateChain> {
        let pem = self.state().certificates.get(url).cloned().ok_or_else(|| {
            problem(StatusCode::NOT_FOUND, "malformed", "no such certificate")
        })?;
        Ok(CertificateChain::from_pem(&pem)?)
    }
}

/// 記憶體中的 DNS：`present` 之後 `lookup_txt` 就能查到。
#[derive(Default)]
pub struct FakeDns {
    records: Mutex<HashMap<String, Vec<String>>>,
    presented: Mutex<Vec<TxtRecord>>,
    stale: Mutex<HashSet<String>>,
    truncated: Mutex<HashSet<String>>,
    hidden: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeDns {
    pub const STALE_VALUE: &'static str = "stale-value-from-a-previous-run";

    pub fn new() -> Self {
        Self::default()
    }

    /// `name` 只會查到舊的值。
    pub fn serve_stale(&self, name: &str) {
        self.stale.lock().unwrap().insert(name.to_owned());
    }

    /// `name` 查到的值少最後一個字元。
    pub fn truncate_values(&self, name: &str) {
        self.truncated.lock().unwrap().insert(name.to_owned());
    }

    /// 前 `lookups` 次查詢 `name` 時回傳空集合。
    pub fn hide_for_lookups(&self, name: &str, lookups: u32) {
        self.hidden.lock().unwrap().insert(name.to_owned(), lookups);
    }

    pub fn delay(&self, name: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(name.to_owned(), delay);
    }

    pub fn presented(&self) -> Vec<TxtRecord> {
        self.presented.lock().unwrap().clone()
    }
}

impl DnsResolver for FakeDns {
    fn present(&self, record: &TxtRecord) -> std::result::Result<(), DnsError> {
        self.presented.lock().unwrap().push(record.clone());
        let value = if self.stale.lock().unwrap().contains(&record.name) {
            Self::STALE_VALUE.to_owned()
        } else if self.truncated.lock().unwrap().contains(&record.name) {
            record.value[..record.value.len() - 1].to_owned()
        } else {
            record.value.clone()
        };
        let mut records = self.records.lock().unwrap();
        let values = records.entry(record.name.clone()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
        Ok(())
    }

    fn lookup_txt(&self, name: &str) -> std::result::Result<Vec<String>, DnsError> {
        let delay = self.delays.lock().unwrap().get(name).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(left) = self.hidden.lock().unwrap().get_mut(name) {
            if *left > 0 {
                *left -= 1;
                return Ok(Vec::new());
            }
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}
