use std::{process::ExitCode, time::Duration};

use clap::Parser;
use log::{error, info};

use racme_dns::{
    client::HttpAcmeClient,
    config::{parse_list, Config, LETS_ENCRYPT_STAGING},
    dns::{DohResolver, DEFAULT_DOH_ENDPOINT},
    issuer::{IssueError, Issuer},
    poll::PollPolicy,
    storage::FileStorage,
};

/// 以 DNS-01 驗證向 ACME CA 申請憑證。
#[derive(Debug, Parser)]
#[command(name = "racme-dns", version, about, long_about = None)]
struct Cli {
    /// ACME 目錄 URL
    #[arg(long = "dirurl", env = "RACME_DIRECTORY_URL", default_value = LETS_ENCRYPT_STAGING)]
    directory_url: String,

    /// 逗號分隔的聯絡信箱（不需加 mailto:）
    #[arg(long, env = "RACME_CONTACT", default_value = "")]
    contact: String,

    /// 逗號分隔的網域清單，第一個作為 CN
    #[arg(long, env = "RACME_DOMAINS")]
    domains: String,

    /// 帳戶檔，不存在時會建立新帳戶
    #[arg(long = "accountfile", env = "RACME_ACCOUNT_FILE", default_value = "data/cache/account.json")]
    account_file: String,

    /// PEM 證書鏈輸出檔
    #[arg(long = "certfile", env = "RACME_CERT_FILE", default_value = "data/ssl/cert.pem")]
    cert_file: String,

    /// PEM 憑證私鑰輸出檔
    #[arg(long = "keyfile", env = "RACME_KEY_FILE", default_value = "data/ssl/key.pem")]
    key_file: String,

    /// 查詢 TXT 記錄用的 DNS-over-HTTPS 端點
    #[arg(long = "dns-resolver", env = "RACME_DNS_RESOLVER", default_value = DEFAULT_DOH_ENDPOINT)]
    dns_resolver: String,

    /// TXT 記錄檢查次數
    #[arg(long, env = "RACME_DNS_ATTEMPTS", default_value_t = 1)]
    dns_attempts: u32,

    /// TXT 記錄檢查間隔（秒）
    #[arg(long, env = "RACME_DNS_INTERVAL_SECS", default_value_t = 10)]
    dns_interval_secs: u64,

    /// 挑戰階段的整體期限（秒），0 表示不限
    #[arg(long, env = "RACME_DEADLINE_SECS", default_value_t = 600)]
    deadline_secs: u64,

    /// 單一 HTTP 請求逾時（秒）
    #[arg(long, env = "RACME_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout_secs: u64,

    /// 顯示除錯訊息
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Result<Config, IssueError> {
        let deadline = match self.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(Config::builder()
            .directory_url(&self.directory_url)
            .contacts(&parse_list(&self.contact))
            .domains(&parse_list(&self.domains))
            .account_file(&self.account_file)
            .cert_file(&self.cert_file)
            .key_file(&self.key_file)
            .doh_endpoint(&self.dns_resolver)
            .dns_check(PollPolicy::new(
                Duration::from_secs(self.dns_interval_secs),
                self.dns_attempts,
            ))
            .deadline(deadline)
            .http_timeout(Duration::from_secs(self.http_timeout_secs))
            .build()?)
    }
}

fn run(cli: &Cli) -> Result<(), IssueError> {
    let config = cli.config()?;

    info!("Connecting to acme directory url: {}", config.directory_url);
    let client = HttpAcmeClient::connect(&config.directory_url, config.http_timeout)?;

    let http = reqwest::blocking::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(racme_dns::client::ClientError::from)?;
    let resolver = DohResolver::new(http, config.doh_endpoint.clone());
    let storage = FileStorage::default();

    let issued = Issuer::new(&config, &client, &resolver, &storage).issue()?;
    info!(
        "Issued certificate for {:?} ({} certificate(s) in chain), saved to {} and {}",
        issued.domains,
        issued.chain.len(),
        issued.cert_file.display(),
        issued.key_file.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
