//! LLM agent backend for the LLM Agent stage (§4.5.5): a single
//! synchronous call to an OpenAI-compatible chat-completions endpoint,
//! grounded on the same `reqwest`-based request shape as
//! `backends::stt::LiteLlmSttBackend`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentBackendError {
    #[error("request to agent endpoint failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent endpoint returned an error: {0}")]
    EndpointError(String),
}

/// One call to make against a configured model.
pub struct AgentRequest<'a> {
    pub system_prompt: &'a str,
    pub input: &'a str,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Object-safe interface an LLM Agent stage delegates to.
pub trait AgentBackend: Send + Sync {
    fn run(&self, request: AgentRequest<'_>) -> Result<String, AgentBackendError>;
}

/// OpenAI-compatible chat-completions client. `provider` names the model
/// (e.g. `openai:gpt-4o-mini`, `ollama:llama3.2`); the part before `:` is
/// currently unused beyond documentation — routing is by `endpoint`.
pub struct HttpAgentBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAgentBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }
}

impl AgentBackend for HttpAgentBackend {
    fn run(&self, request: AgentRequest<'_>) -> Result<String, AgentBackendError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.input},
            ],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let mut http_request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send()?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(AgentBackendError::EndpointError(format!("{status}: {text}")));
        }

        #[derive(serde::Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(serde::Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(serde::Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let parsed: ChatResponse = response.json()?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}
