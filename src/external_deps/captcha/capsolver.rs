use super::{CaptchaError, CaptchaProvider, CaptchaTask, PollStatus, TaskApiClient};
use async_trait::async_trait;

const CAPSOLVER_API: &str = "https://api.capsolver.com";

/// Adapter for the CapSolver service.
#[derive(Debug, Clone)]
pub struct CapSolverProvider {
    client: TaskApiClient,
}

impl CapSolverProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CaptchaError> {
        Self::with_base_url(api_key, CAPSOLVER_API)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self, CaptchaError> {
        Ok(Self {
            client: TaskApiClient::new(api_key, base_url, "ListingScraper-Capsolver/1.0")?,
        })
    }
}

#[async_trait]
impl CaptchaProvider for CapSolverProvider {
    fn name(&self) -> &'static str {
        "capsolver"
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
