//! # racme-dns
//!
//! 以 ACME（RFC 8555）的 DNS-01 驗證向 Let's Encrypt 等 CA 申請 X.509 憑證。
//!
//! 一次簽發依序經過以下階段：
//!
//! 1. **帳戶**（[`account`]）：讀取帳戶檔並與 CA 重新同步，失敗時註冊新帳戶。
//! 2. **訂單**（[`order`]）：依輸入順序為每個網域建立 `dns` 識別項。
//! 3. **挑戰**（[`fulfiller`]）：每個授權各自在一個執行緒中完成 DNS-01：
//!    計算 TXT 值、確認 `_acme-challenge.<網域>` 上可查到、通知 CA 並等待授權生效。
//! 4. **屏障**（[`barrier`]）：收齊所有授權的結果；任何一個失敗即取消其餘工作並中止。
//! 5. **完成**（[`finalizer`]）：產生憑證金鑰與 CSR，完成訂單並寫出證書鏈。
//!
//! [`issuer::Issuer`] 把以上階段串在一起，並以單一不可變的 [`config::Config`] 驅動。
//! 與 CA 的通訊經由 [`client::AcmeClient`]，TXT 查詢經由 [`dns::DnsResolver`]，
//! 檔案存取經由 [`storage::Storage`]，三者都可以替換。
//!
//! ## 示例
//!
//! ```no_run
//! use racme_dns::{
//!     client::HttpAcmeClient,
//!     config::Config,
//!     dns::{DohResolver, DEFAULT_DOH_ENDPOINT},
//!     issuer::Issuer,
//!     storage::FileStorage,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder()
//!         .domains(&["example.com".to_owned(), "*.example.com".to_owned()])
//!         .contacts(&["admin@example.com".to_owned()])
//!         .build()?;
//!
//!     let client = HttpAcmeClient::connect(&config.directory_url, config.http_timeout)?;
//!     let resolver = DohResolver::new(reqwest::blocking::Client::new(), DEFAULT_DOH_ENDPOINT);
//!     let storage = FileStorage::default();
//!
//!     let issued = Issuer::new(&config, &client, &resolver, &storage).issue()?;
//!     println!("saved to {}", issued.cert_file.display());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod barrier;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod finalizer;
pub mod fulfiller;
pub mod issuer;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod signature;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
