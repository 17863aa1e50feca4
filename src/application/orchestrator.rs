//! Parallel agent fan-out.
//!
//! Each active agent gets its own task; one agent hanging or erroring never
//! affects another. Per attempt: a hard timeout, then bounded retries with
//! backoff for retryable failures, then one switch to the fallback model.
//! Both models failing yields an EMPTY decision rather than an error — the
//! cycle always records one decision per agent.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::validator;
use crate::config::ModelRouter;
use crate::domain::errors::ModelError;
use crate::domain::ports::{ChatMessage, ChatRequest, CompletionClient, ModelEndpoint};
use crate::domain::types::{AgentConfig, AgentDecision};
use crate::infrastructure::observability::Metrics;

const MODEL_TEMPERATURE: f64 = 0.2;
const MODEL_MAX_TOKENS: u32 = 4096;
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1000;

/// One agent's unit of work for a cycle: the rendered prompt plus its
/// fingerprint.
pub struct AgentJob {
    pub agent: AgentConfig,
    pub prompt: String,
    pub fingerprint: String,
}

pub struct AgentOrchestrator {
    client: Arc<dyn CompletionClient>,
    router: ModelRouter,
    metrics: Metrics,
    attempt_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        router: ModelRouter,
        metrics: Metrics,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            router,
            metrics,
            attempt_timeout,
        }
    }

    /// Fan out to every agent and join. Decisions come back ordered by
    /// `agent_id` so downstream persistence is reproducible.
    pub async fn dispatch(&self, cycle_id: i64, jobs: Vec<AgentJob>) -> Vec<AgentDecision> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let client = Arc::clone(&self.client);
            let router = self.router.clone();
            let metrics = self.metrics.clone();
            let attempt_timeout = self.attempt_timeout;
            handles.push(tokio::spawn(async move {
                run_agent(client, router, metrics, attempt_timeout, cycle_id, job).await
            }));
        }

        let mut decisions: Vec<AgentDecision> = join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(decision) => Some(decision),
                Err(e) => {
                    warn!("AgentOrchestrator: agent task aborted: {}", e);
                    None
                }
            })
            .collect();

        decisions.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        decisions
    }
}

/// One attempt against one endpoint, bounded by the per-attempt timeout.
async fn call_once(
    client: &Arc<dyn CompletionClient>,
    attempt_timeout: Duration,
    endpoint: &ModelEndpoint,
    request: &ChatRequest,
) -> Result<String, ModelError> {
    match timeout(attempt_timeout, client.complete(endpoint, request)).await {
        Ok(inner) => inner,
        Err(_) => Err(ModelError::Timeout {
            seconds: attempt_timeout.as_secs(),
        }),
    }
}

async fn call_with_retry(
    client: &Arc<dyn CompletionClient>,
    metrics: &Metrics,
    attempt_timeout: Duration,
    endpoint: &ModelEndpoint,
    request: &ChatRequest,
) -> Result<String, ModelError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call_once(client, attempt_timeout, endpoint, request).await {
            Ok(text) => return Ok(text),
            Err(e) => {
                let kind = match &e {
                    ModelError::Timeout { .. } => "timeout",
                    ModelError::Transient { .. } => "transient",
                    ModelError::Provider { .. } => "provider",
                };
                metrics.model_failures_total.with_label_values(&[kind]).inc();

                if e.is_retryable() && attempt < MAX_ATTEMPTS {
                    let backoff = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                    warn!(
                        "ModelClient: {} attempt {}/{} failed ({}), backing off {}ms",
                        endpoint.model,
                        attempt,
                        MAX_ATTEMPTS,
                        e,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

async fn run_agent(
    client: Arc<dyn CompletionClient>,
    router: ModelRouter,
    metrics: Metrics,
    attempt_timeout: Duration,
    cycle_id: i64,
    job: AgentJob,
) -> AgentDecision {
    let request = ChatRequest {
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: job.prompt.clone(),
        }],
        temperature: MODEL_TEMPERATURE,
        max_tokens: MODEL_MAX_TOKENS,
    };

    let primary = router.resolve(&job.agent.primary_model);
    let (raw, model_used) = match call_with_retry(
        &client,
        &metrics,
        attempt_timeout,
        &primary,
        &request,
    )
    .await
    {
        Ok(text) => (text, job.agent.primary_model.clone()),
        Err(primary_err) => {
            warn!(
                "AgentOrchestrator: primary model {} failed for {} ({}), switching to fallback {}",
                job.agent.primary_model, job.agent.agent_id, primary_err, job.agent.fallback_model
            );
            metrics.model_fallbacks_total.inc();

            // The fallback model gets exactly one shot, no retry ladder.
            let fallback = router.resolve(&job.agent.fallback_model);
            match call_once(&client, attempt_timeout, &fallback, &request).await {
                Ok(text) => (text, job.agent.fallback_model.clone()),
                Err(fallback_err) => {
                    let kind = match &fallback_err {
                        ModelError::Timeout { .. } => "timeout",
                        ModelError::Transient { .. } => "transient",
                        ModelError::Provider { .. } => "provider",
                    };
                    metrics.model_failures_total.with_label_values(&[kind]).inc();
                    warn!(
                        "AgentOrchestrator: fallback model also failed for {} ({}), recording EMPTY decision",
                        job.agent.agent_id, fallback_err
                    );
                    return AgentDecision::empty(
                        cycle_id,
                        &job.agent.agent_id,
                        &job.agent.fallback_model,
                        &job.fingerprint,
                    );
                }
            }
        }
    };

    let validated = validator::validate(&raw, &job.agent.agent_id);
    info!(
        "AgentOrchestrator: {} decided via {} ({}, {} actions)",
        job.agent.agent_id,
        model_used,
        validated.parse_status,
        validated.actions.len()
    );

    AgentDecision {
        decision_id: Uuid::new_v4(),
        cycle_id,
        agent_id: job.agent.agent_id.clone(),
        created_at: Utc::now(),
        model_used,
        prompt_fingerprint: job.fingerprint,
        raw_response: raw,
        chain_of_thought: validated.chain_of_thought,
        actions: validated.actions,
        parse_status: validated.parse_status,
    }
}
