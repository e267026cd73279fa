//! Configuration management for dormwatch
//!
//! Settings come from an optional TOML file overlaid by environment
//! variables. Every field maps to the upper-cased environment variable of
//! the same name, e.g. `user_cookie` is read from `USER_COOKIE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Portal endpoint returning the ammeter balance as JSON
pub const DEFAULT_BALANCE_API_URL: &str =
    "http://sd.sontan.net/sdms-pay-weixin-gzzq/service/ammeterBalance?type=1";

/// Page the portal expects requests to originate from
pub const DEFAULT_BALANCE_API_REFERER: &str =
    "http://sd.sontan.net/sdms-pay-weixin-gzzq/newWeixin/ele/eleInfo.html";

/// The portal only answers requests that look like the WeChat in-app browser
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 \
    MicroMessenger/7.0.20.1781(0x6700143B)";

/// Log directory mounted by the container image
const CONTAINER_LOG_DIR: &str = "/app/logs";

const LOG_FILE_NAME: &str = "dormwatch.log";

/// Upper bound for CHECK_INTERVAL and ALERT_COOLDOWN (one year)
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 3600;

// Values shipped in `.env.example`; treated as "not configured".
const PLACEHOLDER_COOKIE: &str = "YOUR_COOKIE_HERE";
const PLACEHOLDER_SENDER: &str = "your_email@qq.com";
const PLACEHOLDER_PASSWORD: &str = "your_smtp_password";
const PLACEHOLDER_RECEIVER: &str = "receiver@example.com";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session cookie for the utility portal, refreshed by hand when it expires
    pub user_cookie: String,

    /// Alert when the remaining balance drops below this many kWh
    pub electricity_threshold: f64,
    /// Seconds between balance checks
    pub check_interval: u64,
    /// Minimum seconds between two low-balance emails
    pub alert_cooldown: u64,

    /// SMTP relay host
    pub smtp_server: String,
    /// SMTP relay port
    pub smtp_port: u16,
    /// Implicit TLS when true, STARTTLS otherwise
    pub smtp_use_ssl: bool,
    /// Sender address, also used as the SMTP login
    pub sender_email: String,
    /// SMTP password or app-specific authorization code
    pub sender_password: String,
    /// Alert recipient
    pub receiver_email: String,

    /// Balance query endpoint
    pub balance_api_url: String,
    /// Referer header sent with the balance query
    pub balance_api_referer: String,
    /// User-Agent header sent with the balance query
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    /// Retries after the first failed attempt on network errors
    pub max_retries: u32,
    /// Base backoff between retries in seconds
    pub retry_delay: u64,

    /// Case-insensitive substrings in a portal error message meaning the cookie expired
    pub auth_expired_markers: Vec<String>,
    /// Email the operator once when the cookie expires
    pub notify_on_auth_expired: bool,
    /// Email the operator after this many failed cycles in a row (0 disables)
    pub failure_alert_threshold: u32,

    /// Log file path; stdout only when unset and not running in the container
    pub log_file: Option<PathBuf>,
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
    /// Log format (json or pretty)
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_cookie: String::new(),
            electricity_threshold: 20.0,
            check_interval: 3600,
            alert_cooldown: 6 * 3600,
            smtp_server: "smtp.qq.com".to_string(),
            smtp_port: 465,
            smtp_use_ssl: true,
            sender_email: String::new(),
            sender_password: String::new(),
            receiver_email: String::new(),
            balance_api_url: DEFAULT_BALANCE_API_URL.to_string(),
            balance_api_referer: DEFAULT_BALANCE_API_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: 30,
            max_retries: 3,
            retry_delay: 5,
            auth_expired_markers: vec![
                "登录".to_string(),
                "session".to_string(),
                "token".to_string(),
            ],
            notify_on_auth_expired: false,
            failure_alert_threshold: 0,
            log_file: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::default())
    }

    /// Load configuration with an explicit environment source
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let settings = builder
            .add_source(
                env.list_separator(",")
                    .with_list_parse_key("auth_expired_markers"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check that everything needed to run is present and well-formed
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if is_unset(&self.user_cookie, PLACEHOLDER_COOKIE) {
            problems.push("USER_COOKIE is not set".to_string());
        }
        if is_unset(&self.sender_email, PLACEHOLDER_SENDER) {
            problems.push("SENDER_EMAIL is not set".to_string());
        } else if self.sender_email.parse::<lettre::Address>().is_err() {
            problems.push(format!("SENDER_EMAIL '{}' is not a valid address", self.sender_email));
        }
        if is_unset(&self.sender_password, PLACEHOLDER_PASSWORD) {
            problems.push("SENDER_PASSWORD is not set".to_string());
        }
        if is_unset(&self.receiver_email, PLACEHOLDER_RECEIVER) {
            problems.push("RECEIVER_EMAIL is not set".to_string());
        } else if self.receiver_email.parse::<lettre::Address>().is_err() {
            problems.push(format!(
                "RECEIVER_EMAIL '{}' is not a valid address",
                self.receiver_email
            ));
        }

        if !self.electricity_threshold.is_finite() || self.electricity_threshold < 0.0 {
            problems.push(format!(
                "ELECTRICITY_THRESHOLD must be a non-negative number, got {}",
                self.electricity_threshold
            ));
        }
        if self.check_interval == 0 {
            problems.push("CHECK_INTERVAL must be at least 1 second".to_string());
        } else if self.check_interval > MAX_PERIOD_SECS {
            problems.push(format!(
                "CHECK_INTERVAL must be at most {MAX_PERIOD_SECS} seconds, got {}",
                self.check_interval
            ));
        }
        if self.alert_cooldown > MAX_PERIOD_SECS {
            problems.push(format!(
                "ALERT_COOLDOWN must be at most {MAX_PERIOD_SECS} seconds, got {}",
                self.alert_cooldown
            ));
        }
        if self.request_timeout == 0 {
            problems.push("REQUEST_TIMEOUT must be at least 1 second".to_string());
        }
        if self.smtp_server.trim().is_empty() {
            problems.push("SMTP_SERVER is not set".to_string());
        }
        if self.balance_api_url.trim().is_empty() {
            problems.push("BALANCE_API_URL is not set".to_string());
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            problems.push(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }

    /// Interval between two balance checks
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// Minimum gap between two low-balance emails, saturating at
    /// `chrono::Duration::MAX` for values `validate` rejects
    pub fn alert_cooldown(&self) -> chrono::Duration {
        i64::try_from(self.alert_cooldown)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Timeout applied to each balance request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Where log lines should be written besides stdout, if anywhere
    pub fn resolve_log_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.log_file {
            return Some(path.clone());
        }
        let container_dir = Path::new(CONTAINER_LOG_DIR);
        container_dir
            .is_dir()
            .then(|| container_dir.join(LOG_FILE_NAME))
    }
}

fn is_unset(value: &str, placeholder: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == placeholder
}
