use deepcode_core::{ChatMessage, LlmConfig, Transcript, TransportError};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use std::thread;
use std::time::Duration;

/// Seam between the loop controller and the model endpoint. The controller
/// only ever sees a finished response string or a `TransportError`; retry
/// policy lives entirely on this side of the boundary.
pub trait ModelClient {
    fn complete(&self, transcript: &Transcript) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct DeepSeekClient {
    cfg: LlmConfig,
    client: Client,
}

impl DeepSeekClient {
    pub fn new(cfg: LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    fn api_key(&self) -> Result<String, TransportError> {
        if let Some(key) = &self.cfg.api_key
            && !key.trim().is_empty()
        {
            return Ok(key.clone());
        }
        std::env::var(&self.cfg.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| TransportError::MissingApiKey(self.cfg.api_key_env.clone()))
    }

    fn build_payload(&self, transcript: &Transcript) -> Value {
        json!({
            "model": self.cfg.model,
            "messages": payload_messages(transcript),
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "stream": self.cfg.stream,
        })
    }

    fn request_once(&self, api_key: &str, payload: &Value) -> RequestOutcome {
        let response = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(api_key)
            .json(payload)
            .send();

        match response {
            Ok(resp) => {
                let status = resp.status();
                let retry_after = parse_retry_after_seconds(resp.headers().get(RETRY_AFTER));
                let body = match resp.text() {
                    Ok(body) => body,
                    Err(err) => {
                        return RequestOutcome::Retryable {
                            error: TransportError::Network(err.to_string()),
                            retry_after: None,
                        };
                    }
                };
                if status.is_success() {
                    let parsed = if self.cfg.stream {
                        parse_streaming_payload(&body)
                    } else {
                        parse_non_streaming_payload(&body)
                    };
                    return match parsed {
                        Ok(text) => RequestOutcome::Done(text),
                        Err(error) => RequestOutcome::Fatal(error),
                    };
                }
                let error = TransportError::Api {
                    status: status.as_u16(),
                    detail: truncate_detail(&body),
                };
                if should_retry_status(status) {
                    RequestOutcome::Retryable { error, retry_after }
                } else {
                    RequestOutcome::Fatal(error)
                }
            }
            Err(err) => {
                let error = TransportError::Network(err.to_string());
                if err.is_timeout() || err.is_connect() || err.is_request() {
                    RequestOutcome::Retryable {
                        error,
                        retry_after: None,
                    }
                } else {
                    RequestOutcome::Fatal(error)
                }
            }
        }
    }
}

enum RequestOutcome {
    Done(String),
    Retryable {
        error: TransportError,
        retry_after: Option<u64>,
    },
    Fatal(TransportError),
}

impl ModelClient for DeepSeekClient {
    fn complete(&self, transcript: &Transcript) -> Result<String, TransportError> {
        let api_key = self.api_key()?;
        let payload = self.build_payload(transcript);

        let mut attempt: u8 = 0;
        loop {
            match self.request_once(&api_key, &payload) {
                RequestOutcome::Done(text) => return Ok(text),
                RequestOutcome::Fatal(error) => return Err(error),
                RequestOutcome::Retryable { error, retry_after } => {
                    if attempt >= self.cfg.max_retries {
                        return Err(error);
                    }
                    thread::sleep(retry_delay(self.cfg.retry_base_ms, attempt, retry_after));
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

fn payload_messages(transcript: &Transcript) -> Vec<Value> {
    transcript
        .messages()
        .iter()
        .map(|msg| match msg {
            ChatMessage::System { content } => json!({"role": "system", "content": content}),
            ChatMessage::User { content } => json!({"role": "user", "content": content}),
            ChatMessage::Assistant { content } => {
                json!({"role": "assistant", "content": content})
            }
            // Tool results ride as user turns; the endpoint has no native
            // tool-result role for extracted (non-function-calling) tools.
            ChatMessage::ToolOutput { content } => json!({"role": "user", "content": content}),
        })
        .collect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_delay(base_ms: u64, attempt: u8, retry_after: Option<u64>) -> Duration {
    if let Some(secs) = retry_after {
        return Duration::from_secs(secs.min(30));
    }
    Duration::from_millis(base_ms.saturating_mul(1 << attempt.min(6)))
}

fn parse_retry_after_seconds(header: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    header?.to_str().ok()?.trim().parse::<u64>().ok()
}

fn parse_non_streaming_payload(body: &str) -> Result<String, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| TransportError::Malformed(err.to_string()))?;
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| TransportError::Malformed("missing choices[0].message.content".to_string()))
}

/// Assemble a server-sent-events stream into the complete response text.
/// The `[DONE]` marker is the response-complete signal; a stream that ends
/// without it is treated as malformed rather than handed on partially.
fn parse_streaming_payload(body: &str) -> Result<String, TransportError> {
    let mut text = String::new();
    let mut finished = false;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            finished = true;
            break;
        }
        let value: Value = serde_json::from_str(data)
            .map_err(|err| TransportError::Malformed(err.to_string()))?;
        if let Some(chunk) = value["choices"][0]["delta"]["content"].as_str() {
            text.push_str(chunk);
        }
    }
    if !finished {
        return Err(TransportError::Malformed(
            "stream ended without [DONE] marker".to_string(),
        ));
    }
    Ok(text)
}

fn truncate_detail(body: &str) -> String {
    const MAX: usize = 600;
    if body.len() > MAX {
        format!("{}…", &body[..body.floor_char_boundary(MAX)])
    } else {
        body.to_string()
    }
}
