//! LLM-backed job handler.
//!
//! Each job gets a fresh conversation built only from its own system prompt
//! and parameters, so concurrent jobs never share agent state.

mod ollama;
mod tools;

pub use ollama::{ChatMessage, OllamaClient};
pub use tools::OutputTools;

use crate::config::AgentConfig;
use crate::handler::{HandlerResult, JobHandler};
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use rbq_core::Job;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct AgentHandler {
    llm: OllamaClient,
    tools: OutputTools,
    max_tool_rounds: usize,
}

impl AgentHandler {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let llm = OllamaClient::new(
            &config.base_url,
            &config.model,
            std::time::Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(AgentHandler {
            llm,
            tools: OutputTools::new(&config.output_dir),
            max_tool_rounds: config.max_tool_rounds,
        })
    }

    /// Path the final answer of `job` is written to.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.tools.dir().join(format!("job-{}-{}.md", job.seq, job.id))
    }

    /// Drive the model until it answers without tool calls or the round
    /// limit is hit; returns the final text.
    async fn converse(&self, job: &Job) -> anyhow::Result<String> {
        let definitions = OutputTools::definitions();
        let mut messages = vec![
            ChatMessage::system(job.system_prompt()),
            ChatMessage::user(user_prompt(job)),
        ];

        for round in 1..=self.max_tool_rounds {
            let reply = self
                .llm
                .chat(&messages, &definitions)
                .await
                .with_context(|| format!("model {} failed in round {round}", self.llm.model()))?;

            let calls = reply.tool_calls().to_vec();
            if calls.is_empty() {
                return Ok(reply.content);
            }

            debug!(job_id = %job.id, round, calls = calls.len(), "Model requested tools");
            messages.push(reply);
            for call in calls {
                let result = self
                    .tools
                    .call(&call.function.name, &call.function.arguments())
                    .await;
                messages.push(ChatMessage::tool(&call.function.name, result));
            }
        }

        warn!(
            job_id = %job.id,
            rounds = self.max_tool_rounds,
            "Tool round limit reached, asking for a final answer"
        );
        let reply = self
            .llm
            .chat(&messages, &[])
            .await
            .context("final answer request failed")?;
        Ok(reply.content)
    }
}

/// The job's query, with the optional limit and any extra parameters as
/// hints for the model.
fn user_prompt(job: &Job) -> String {
    let params = &job.spec.params;
    let mut prompt = params.query.clone();

    if let Some(limit) = params.limit {
        prompt.push_str(&format!("\n\nReturn at most {limit} results."));
    }
    if !params.extra.is_empty() {
        let extra = Value::Object(params.extra.clone());
        prompt.push_str(&format!("\n\nAdditional parameters: {extra}"));
    }
    prompt
}

#[async_trait]
impl JobHandler for AgentHandler {
    async fn handle(&self, job: &Job) -> HandlerResult {
        let answer = self.converse(job).await?;
        info!(job_id = %job.id, seq = job.seq, "{}", answer);

        let path = self.output_path(job);
        tokio::fs::create_dir_all(self.tools.dir())
            .await
            .with_context(|| format!("cannot create {}", self.tools.dir().display()))?;
        tokio::fs::write(&path, answer.as_bytes())
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;

        info!(job_id = %job.id, path = %path.display(), "Saved agent output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbq_core::{JobId, JobParams, JobSpec};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(query: &str) -> Job {
        let mut params = JobParams::new(query);
        params.limit = Some(3);
        Job::new(JobId::from("abc"), 7, JobSpec::new("You are terse.", params))
    }

    fn handler(server: &MockServer, dir: &TempDir, max_tool_rounds: usize) -> AgentHandler {
        AgentHandler::new(&AgentConfig {
            base_url: server.uri(),
            output_dir: dir.path().to_path_buf(),
            max_tool_rounds,
            ..Default::default()
        })
        .unwrap()
    }

    fn answer(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": content}
        }))
    }

    fn tool_request(filename: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": {
                        "name": "write_text",
                        "arguments": {"filename": filename, "data": "from tool"}
                    }
                }]
            }
        }))
    }

    #[test]
    fn test_user_prompt_includes_hints() {
        let mut job = job("rust crates");
        job.spec.params.extra.insert("lang".to_string(), json!("en"));

        let prompt = user_prompt(&job);
        assert!(prompt.starts_with("rust crates"));
        assert!(prompt.contains("at most 3 results"));
        assert!(prompt.contains(r#""lang":"en""#));
    }

    #[tokio::test]
    async fn test_plain_answer_is_saved() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_string_contains("You are terse."))
            .respond_with(answer("final answer"))
            .mount(&server)
            .await;

        let handler = handler(&server, &dir, 4);
        let job = job("q");
        handler.handle(&job).await.unwrap();

        let saved = std::fs::read_to_string(handler.output_path(&job)).unwrap();
        assert_eq!(saved, "final answer");
        assert!(handler.output_path(&job).ends_with("job-7-abc.md"));
    }

    #[tokio::test]
    async fn test_tool_calls_are_executed_then_answered() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        // Once the tool result is in the conversation, answer.
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_string_contains("successfully written"))
            .respond_with(answer("done"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(tool_request("notes.txt"))
            .with_priority(2)
            .mount(&server)
            .await;

        let handler = handler(&server, &dir, 4);
        let job = job("q");
        handler.handle(&job).await.unwrap();

        let tool_file = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(tool_file, "from tool");
        let saved = std::fs::read_to_string(handler.output_path(&job)).unwrap();
        assert_eq!(saved, "done");
    }

    #[tokio::test]
    async fn test_round_limit_forces_final_answer() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        // The last request is sent without tools.
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(NoTools)
            .respond_with(answer("gave up on tools"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(tool_request("loop.txt"))
            .with_priority(2)
            .expect(2)
            .mount(&server)
            .await;

        let handler = handler(&server, &dir, 2);
        let job = job("q");
        handler.handle(&job).await.unwrap();

        let saved = std::fs::read_to_string(handler.output_path(&job)).unwrap();
        assert_eq!(saved, "gave up on tools");
    }

    #[tokio::test]
    async fn test_llm_failure_fails_the_job() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let handler = handler(&server, &dir, 4);
        let job = job("q");
        let err = handler.handle(&job).await.unwrap_err();

        assert!(format!("{err:#}").contains("503"));
        assert!(!handler.output_path(&job).exists());
    }

    struct NoTools;

    impl wiremock::Match for NoTools {
        fn matches(&self, request: &wiremock::Request) -> bool {
            serde_json::from_slice::<Value>(&request.body)
                .map(|body| body.get("tools").is_none())
                .unwrap_or(false)
        }
    }
}
