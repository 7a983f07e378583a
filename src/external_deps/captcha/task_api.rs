//! Client for the `createTask` / `getTaskResult` / `getBalance` JSON protocol.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{CaptchaError, CaptchaTask, PollStatus};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Common envelope of every task-API answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    error_id: i64,
    error_code: Option<String>,
    error_description: Option<String>,
    task_id: Option<Value>,
    status: Option<String>,
    solution: Option<Value>,
    balance: Option<f64>,
    cost: Option<Value>,
}

impl Envelope {
    fn error_message(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.error_code.clone())
            .unwrap_or_else(|| format!("errorId {}", self.error_id))
    }
}

/// Shared HTTP client for task-based captcha services.
#[derive(Debug, Clone)]
pub struct TaskApiClient {
    api_key: String,
    base_url: Url,
    http: Client,
}

impl TaskApiClient {
    pub fn new(api_key: impl Into<String>, base_url: &str, user_agent: &str) -> Result<Self, CaptchaError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CaptchaError::Configuration("api key is empty".into()));
        }
        let base_url = Url::parse(base_url)
            .map_err(|err| CaptchaError::Configuration(format!("invalid base url: {err}")))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|err| CaptchaError::Configuration(err.to_string()))?;

        Ok(Self {
            api_key,
            base_url,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call(&self, method: &str, mut body: Value) -> Result<Envelope, CaptchaError> {
        body["clientKey"] = json!(self.api_key);
        let endpoint = self
            .base_url
            .join(method)
            .map_err(|err| CaptchaError::Configuration(err.to_string()))?;

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| CaptchaError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| CaptchaError::Transport(err.to_string()))?;

        response
            .json::<Envelope>()
            .await
            .map_err(|err| CaptchaError::Transport(format!("malformed response: {err}")))
    }

    pub async fn create_task(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        let payload = task.to_payload()?;
        let envelope = self
            .call("createTask", json!({ "task": payload }))
            .await
            .map_err(|err| match err {
                CaptchaError::Transport(msg) => CaptchaError::Submission(msg),
                other => other,
            })?;

        if envelope.error_id != 0 {
            return Err(CaptchaError::Submission(envelope.error_message()));
        }

        let task_id = match envelope.task_id {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(CaptchaError::Submission("response carried no taskId".into())),
        };
        log::info!("created captcha task: {task_id}");
        Ok(task_id)
    }

    pub async fn task_result(&self, task_id: &str) -> Result<PollStatus, CaptchaError> {
        let envelope = self
            .call("getTaskResult", json!({ "taskId": task_id }))
            .await?;

        if envelope.error_id != 0 {
            return Ok(PollStatus::Failed(envelope.error_message()));
        }

        match envelope.status.as_deref() {
            Some("ready") => Ok(PollStatus::Ready {
                solution: envelope.solution.unwrap_or(Value::Null),
                cost: envelope.cost.as_ref().and_then(parse_cost),
            }),
            Some("processing") | Some("idle") | None => Ok(PollStatus::Processing),
            Some(other) => Ok(PollStatus::Failed(
                envelope
                    .error_description
                    .unwrap_or_else(|| format!("task status {other}")),
            )),
        }
    }

    pub async fn balance(&self) -> Result<f64, CaptchaError> {
        let envelope = self
            .call("getBalance", json!({}))
            .await
            .map_err(|err| CaptchaError::BalanceUnavailable(err.to_string()))?;

        if envelope.error_id != 0 {
            return Err(CaptchaError::BalanceUnavailable(envelope.error_message()));
        }
        let balance = envelope.balance.unwrap_or(0.0);
        log::info!("captcha account balance: ${balance}");
        Ok(balance)
    }
}

fn parse_cost(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
