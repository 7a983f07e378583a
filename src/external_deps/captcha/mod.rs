//! Captcha provider integrations.
//!
//! Providers speak the asynchronous task protocol: submit a task, poll until
//! it resolves, and report the account balance. CapSolver and 2Captcha share
//! the same wire format, so both adapters sit on one [`TaskApiClient`].

mod capsolver;
mod task_api;
mod twocaptcha;

pub use capsolver::CapSolverProvider;
pub use task_api::TaskApiClient;
pub use twocaptcha::TwoCaptchaProvider;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

use crate::modules::proxy::ProxyEndpoint;

/// Challenge families the solving service understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeKind {
    RecaptchaV2,
    RecaptchaV2Enterprise,
    RecaptchaV3 { action: String, min_score: f64 },
    RecaptchaV3Enterprise { action: String, min_score: f64 },
    HCaptcha,
    FunCaptcha,
    ImageToText { case_sensitive: bool },
}

impl ChallengeKind {
    pub fn recaptcha_v3() -> Self {
        ChallengeKind::RecaptchaV3 {
            action: "submit".to_string(),
            min_score: 0.3,
        }
    }

    /// Provider task type; proxied variants drop the `ProxyLess` suffix.
    pub fn task_type(&self, proxied: bool) -> &'static str {
        match (self, proxied) {
            (ChallengeKind::RecaptchaV2, false) => "ReCaptchaV2TaskProxyLess",
            (ChallengeKind::RecaptchaV2, true) => "ReCaptchaV2Task",
            (ChallengeKind::RecaptchaV2Enterprise, _) => "ReCaptchaV2EnterpriseTaskProxyLess",
            (ChallengeKind::RecaptchaV3 { .. }, _) => "ReCaptchaV3TaskProxyLess",
            (ChallengeKind::RecaptchaV3Enterprise { .. }, _) => "ReCaptchaV3EnterpriseTaskProxyLess",
            (ChallengeKind::HCaptcha, _) => "HCaptchaTaskProxyLess",
            (ChallengeKind::FunCaptcha, _) => "FunCaptchaTaskProxyLess",
            (ChallengeKind::ImageToText { .. }, _) => "ImageToTextTask",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChallengeKind::RecaptchaV2 | ChallengeKind::RecaptchaV2Enterprise => "reCAPTCHA v2",
            ChallengeKind::RecaptchaV3 { .. } | ChallengeKind::RecaptchaV3Enterprise { .. } => {
                "reCAPTCHA v3"
            }
            ChallengeKind::HCaptcha => "hCaptcha",
            ChallengeKind::FunCaptcha => "FunCaptcha",
            ChallengeKind::ImageToText { .. } => "image captcha",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the task is about: a site deployment or a raw image.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTarget {
    Site { url: Url, site_key: String },
    Image(Vec<u8>),
}

/// Task description submitted to a provider.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub kind: ChallengeKind,
    pub target: TaskTarget,
    pub proxy: Option<ProxyEndpoint>,
}

impl CaptchaTask {
    pub fn new(kind: ChallengeKind, target: TaskTarget) -> Self {
        Self {
            kind,
            target,
            proxy: None,
        }
    }

    pub fn for_site(kind: ChallengeKind, url: Url, site_key: impl Into<String>) -> Self {
        Self::new(
            kind,
            TaskTarget::Site {
                url,
                site_key: site_key.into(),
            },
        )
    }

    pub fn image(image: Vec<u8>, case_sensitive: bool) -> Self {
        Self::new(
            ChallengeKind::ImageToText { case_sensitive },
            TaskTarget::Image(image),
        )
    }

    /// Let the provider solve from the same relay the request used. Only
    /// reCAPTCHA v2 has a proxied task type; other kinds ignore it.
    pub fn with_proxy(mut self, proxy: ProxyEndpoint) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Provider `task` object.
    pub fn to_payload(&self) -> Result<Value, CaptchaError> {
        let proxied = self.proxy.is_some() && self.kind == ChallengeKind::RecaptchaV2;
        let mut task = Map::new();
        task.insert("type".into(), json!(self.kind.task_type(proxied)));

        match (&self.kind, &self.target) {
            (ChallengeKind::ImageToText { case_sensitive }, TaskTarget::Image(bytes)) => {
                task.insert("body".into(), json!(BASE64.encode(bytes)));
                task.insert("case".into(), json!(case_sensitive));
            }
            (ChallengeKind::ImageToText { .. }, TaskTarget::Site { .. }) => {
                return Err(CaptchaError::Configuration(
                    "image captcha requires an image payload".into(),
                ));
            }
            (_, TaskTarget::Image(_)) => {
                return Err(CaptchaError::Configuration(format!(
                    "{} requires a site url and key",
                    self.kind
                )));
            }
            (kind, TaskTarget::Site { url, site_key }) => {
                task.insert("websiteURL".into(), json!(url.as_str()));
                task.insert("websiteKey".into(), json!(site_key));
                if let ChallengeKind::RecaptchaV3 { action, min_score }
                | ChallengeKind::RecaptchaV3Enterprise { action, min_score } = kind
                {
                    task.insert("pageAction".into(), json!(action));
                    task.insert("minScore".into(), json!(min_score));
                }
                if proxied && let Some(proxy) = &self.proxy {
                    task.insert("proxyType".into(), json!(proxy.protocol.scheme()));
                    task.insert("proxyAddress".into(), json!(proxy.host));
                    task.insert("proxyPort".into(), json!(proxy.port));
                    task.insert("proxyLogin".into(), json!(proxy.username));
                    task.insert("proxyPassword".into(), json!(proxy.password));
                }
            }
        }

        Ok(Value::Object(task))
    }
}

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Bookkeeping for one task from submission to a terminal state.
#[derive(Debug, Clone)]
pub struct ChallengeTask {
    pub task_id: String,
    pub kind: ChallengeKind,
    pub status: TaskStatus,
    pub solution: Option<String>,
    pub cost: Option<f64>,
}

impl ChallengeTask {
    pub fn submitted(task_id: impl Into<String>, kind: ChallengeKind) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            status: TaskStatus::Pending,
            solution: None,
            cost: None,
        }
    }

    /// Move to the terminal state matching `outcome`. Terminal tasks stay put.
    pub fn settle(&mut self, outcome: &CaptchaResult) {
        if self.status.is_terminal() {
            return;
        }
        match outcome {
            Ok(solution) => {
                self.status = TaskStatus::Ready;
                self.solution = Some(solution.token.clone());
                self.cost = solution.cost;
            }
            Err(CaptchaError::Timeout(_)) => self.status = TaskStatus::TimedOut,
            Err(_) => self.status = TaskStatus::Failed,
        }
    }
}

/// One poll answer from the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Processing,
    Ready { solution: Value, cost: Option<f64> },
    Failed(String),
}

/// Resolved captcha token.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaSolution {
    pub token: String,
    pub task_id: Option<String>,
    pub cost: Option<f64>,
}

impl CaptchaSolution {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            task_id: None,
            cost: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    /// Pull the token out of a provider `solution` object.
    pub fn from_provider(solution: &Value) -> Option<Self> {
        ["gRecaptchaResponse", "text", "token"]
            .iter()
            .find_map(|key| solution.get(*key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(Self::new)
    }
}

/// Common result type returned by captcha providers.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit a task and return the provider task id.
    async fn create_task(&self, task: &CaptchaTask) -> Result<String, CaptchaError>;

    async fn task_result(&self, task_id: &str) -> Result<PollStatus, CaptchaError>;

    /// Account balance in USD.
    async fn balance(&self) -> Result<f64, CaptchaError>;
}

/// Errors surfaced by captcha providers and the resolver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha provider request failed: {0}")]
    Transport(String),
    #[error("captcha provider returned error: {0}")]
    Provider(String),
    #[error("failed to create captcha task: {0}")]
    Submission(String),
    #[error("captcha task failed: {0}")]
    Failed(String),
    #[error("timeout waiting for captcha solution after {0:?}")]
    Timeout(Duration),
    #[error("failed to check account balance: {0}")]
    BalanceUnavailable(String),
    #[error("insufficient balance: ${balance} (minimum ${minimum})")]
    InsufficientBalance { balance: f64, minimum: f64 },
    #[error("no site key configured for domain {0}")]
    NoSiteKey(String),
    #[error("failed after {attempts} attempts. Last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("captcha solving cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Url {
        Url::parse("https://www.reddit.com/r/rust").unwrap()
    }

    #[test]
    fn builds_recaptcha_v3_payload() {
        let task = CaptchaTask::for_site(ChallengeKind::recaptcha_v3(), site(), "key-1");
        let payload = task.to_payload().unwrap();
        assert_eq!(payload["type"], "ReCaptchaV3TaskProxyLess");
        assert_eq!(payload["websiteKey"], "key-1");
        assert_eq!(payload["pageAction"], "submit");
        assert_eq!(payload["minScore"], 0.3);
    }

    #[test]
    fn proxied_recaptcha_v2_switches_task_type() {
        let proxy = ProxyEndpoint::parse("10.0.0.2:8000:bob:pw", Default::default()).unwrap();
        let task = CaptchaTask::for_site(ChallengeKind::RecaptchaV2, site(), "key").with_proxy(proxy);
        let payload = task.to_payload().unwrap();
        assert_eq!(payload["type"], "ReCaptchaV2Task");
        assert_eq!(payload["proxyAddress"], "10.0.0.2");
        assert_eq!(payload["proxyPort"], 8000);
        assert_eq!(payload["proxyLogin"], "bob");

        let hcaptcha = CaptchaTask::for_site(ChallengeKind::HCaptcha, site(), "key")
            .with_proxy(ProxyEndpoint::parse("h:1:u:p", Default::default()).unwrap());
        let payload = hcaptcha.to_payload().unwrap();
        assert_eq!(payload["type"], "HCaptchaTaskProxyLess");
        assert!(payload.get("proxyAddress").is_none());
    }

    #[test]
    fn image_task_is_base64_encoded() {
        let payload = CaptchaTask::image(b"png".to_vec(), true).to_payload().unwrap();
        assert_eq!(payload["type"], "ImageToTextTask");
        assert_eq!(payload["body"], "cG5n");
        assert_eq!(payload["case"], true);

        let mismatched = CaptchaTask::new(ChallengeKind::HCaptcha, TaskTarget::Image(vec![1]));
        assert!(matches!(mismatched.to_payload(), Err(CaptchaError::Configuration(_))));
    }

    #[test]
    fn extracts_token_from_known_solution_fields() {
        let solution = CaptchaSolution::from_provider(&json!({"text": "abc"})).unwrap();
        assert_eq!(solution.token, "abc");
        assert!(CaptchaSolution::from_provider(&json!({"other": "x"})).is_none());
    }

    #[test]
    fn task_settles_once() {
        let mut task = ChallengeTask::submitted("t-1", ChallengeKind::RecaptchaV2);
        task.settle(&Err(CaptchaError::Timeout(Duration::from_secs(1))));
        assert_eq!(task.status, TaskStatus::TimedOut);
        task.settle(&Ok(CaptchaSolution::new("late")));
        assert_eq!(task.status, TaskStatus::TimedOut);
        assert!(task.solution.is_none());
    }
}
