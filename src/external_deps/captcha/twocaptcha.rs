use super::{CaptchaError, CaptchaProvider, CaptchaTask, PollStatus, TaskApiClient};
use async_trait::async_trait;

const TWOCAPTCHA_API: &str = "https://api.2captcha.com";

/// Adapter for the 2Captcha service (task API v2).
#[derive(Debug, Clone)]
pub struct TwoCaptchaProvider {
    client: TaskApiClient,
}

impl TwoCaptchaProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CaptchaError> {
        Self::with_base_url(api_key, TWOCAPTCHA_API)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self, CaptchaError> {
        Ok(Self {
            client: TaskApiClient::new(api_key, base_url, "ListingScraper-2Captcha/1.0")?,
        })
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaProvider {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn create_task(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        self.client.create_task(task).await
    }

    async fn task_result(&self, task_id: &str) -> Result<PollStatus, CaptchaError> {
        self.client.task_result(task_id).await
    }

    async fn balance(&self) -> Result<f64, CaptchaError> {
        self.client.balance().await
    }
}
