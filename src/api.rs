use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::RemoteError;
use crate::transcript::Turn;

#[derive(Debug, Deserialize)]
struct Response {
    model: Option<String>,

    // Depending on whether you passed in "messages" or a "prompt", you
    // will get a different output shape
    choices: Vec<Choice>,

    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Choice {
    NonChat(NonChatChoice),
    Chat(ChatChoice),
}

#[derive(Debug, Deserialize)]
struct NonChatChoice {
    finish_reason: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    // Depends on the model. Ex: 'stop' | 'length' | 'content_filter' | 'tool_calls'
    finish_reason: Option<String>,
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    // OpenAI sends a string code, other compatible providers send a number
    code: Option<serde_json::Value>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseContainer {
    error: ErrorResponse,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// What gets sent to the completion service for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRequest<'a> {
    /// The whole conversation, sent to the chat completion endpoint.
    Chat(&'a [Turn]),
    /// A single prompt without history, sent to the plain completion endpoint.
    Prompt(&'a str),
}

/// A remote service that turns a request into a single generated reply.
#[async_trait]
pub trait CompletionService {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, RemoteError>;
}

/// `ApiClient` talks to an OpenAI compatible text generation API.
///
/// It holds the resolved configuration and one pooled HTTP client for the
/// lifetime of the process. Each call to [`CompletionService::complete`] is a
/// single non-streaming request.
pub struct ApiClient {
    config: Config,
    http: Client,
}

impl ApiClient {
    pub fn new(config: Config) -> Self {
        ApiClient {
            config,
            http: Client::new(),
        }
    }

    fn endpoint(&self, request: &CompletionRequest<'_>) -> String {
        let base = self.config.api.trim_end_matches('/');
        match request {
            CompletionRequest::Chat(_) => format!("{}/v1/chat/completions", base),
            CompletionRequest::Prompt(_) => format!("{}/v1/completions", base),
        }
    }

    /// Constructs the JSON request body for the given request.
    ///
    /// Chat requests carry the conversation as a `messages` array, plain requests
    /// carry a single `prompt` string. Both include the model, `max_tokens`, `n`
    /// and `temperature`; `top_p` and `seed` are only added when configured.
    fn build_request_body(&self, request: &CompletionRequest<'_>) -> serde_json::Value {
        let mut body = match request {
            CompletionRequest::Chat(turns) => json!({
                "model": self.config.model_id,
                "messages": turns,
            }),
            CompletionRequest::Prompt(prompt) => json!({
                "model": self.config.model_id,
                "prompt": prompt,
            }),
        };

        body["max_tokens"] = json!(self.config.max_tokens);
        body["n"] = json!(self.config.samples);
        body["temperature"] = json!(self.config.temp);
        if let Some(top_p) = self.config.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(seed) = self.config.seed {
            body["seed"] = json!(seed);
        }

        body
    }
}

#[async_trait]
impl CompletionService for ApiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, RemoteError> {
        let url = self.endpoint(&request);
        let body = self.build_request_body(&request);

        tracing::debug!(%url, model = %self.config.model_id, "sending completion request");
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        tracing::debug!(status = status.as_u16(), "received completion response");

        if !status.is_success() {
            return Err(error_for_status(status, &response_text));
        }
        parse_reply(&response_text)
    }
}

/// Maps a non-success HTTP status and its body onto a [`RemoteError`].
fn error_for_status(status: StatusCode, response_text: &str) -> RemoteError {
    let message = match serde_json::from_str::<ErrorResponseContainer>(response_text) {
        Ok(container) => container.error.message,
        Err(_) if response_text.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string(),
        Err(_) => response_text.trim().to_string(),
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth {
            status: status.as_u16(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            status: status.as_u16(),
            message,
        },
        _ => RemoteError::Api {
            code: status.as_u16().to_string(),
            message,
        },
    }
}

/// Pulls the reply text out of a successful response body.
///
/// The first choice wins when `n` is larger than one. A body carrying an
/// `error` object is reported as an API error even with a success status.
fn parse_reply(response_text: &str) -> Result<String, RemoteError> {
    match serde_json::from_str::<Response>(response_text) {
        Ok(api_result) => {
            if let Some(usage) = &api_result.usage {
                tracing::debug!(
                    model = api_result.model.as_deref().unwrap_or_default(),
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "completion usage"
                );
            }

            let choice = api_result
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| RemoteError::Malformed("response contained no choices".into()))?;
            let (text, finish_reason) = match choice {
                Choice::NonChat(c) => (Some(c.text), c.finish_reason),
                Choice::Chat(c) => (c.message.content, c.finish_reason),
            };
            if finish_reason.as_deref() == Some("length") {
                tracing::info!("reply was cut off by the max_tokens limit");
            }
            text.ok_or_else(|| RemoteError::Malformed("reply had no message content".into()))
        }
        Err(_) => match serde_json::from_str::<ErrorResponseContainer>(response_text) {
            Ok(container) => Err(RemoteError::Api {
                code: container
                    .error
                    .code
                    .map(|code| match code {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "unknown".to_string()),
                message: container.error.message,
            }),
            Err(e) => Err(RemoteError::Malformed(format!(
                "failed to parse JSON: {}; raw JSON: {}",
                e, response_text
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn client(args: &[&str]) -> ApiClient {
        let config = Config::try_parse_from(
            ["termchat", "--key", "sk-test"]
                .iter()
                .chain(args.iter())
                .copied(),
        )
        .unwrap()
        .resolve(None)
        .unwrap();
        ApiClient::new(config)
    }

    #[test]
    fn chat_body_carries_history_and_generation_parameters() {
        let turns = vec![
            Turn::user("Hello"),
            Turn::assistant("Hi!"),
            Turn::user("How are you?"),
        ];
        let body = client(&[]).build_request_body(&CompletionRequest::Chat(&turns));

        assert_eq!(
            body,
            json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Hi!"},
                    {"role": "user", "content": "How are you?"},
                ],
                "max_tokens": 150,
                "n": 1,
                "temperature": 0.5,
            })
        );
    }

    #[test]
    fn prompt_body_has_no_messages_and_optional_fields_when_set() {
        let body = client(&["--top-p", "0.5", "--seed", "7"])
            .build_request_body(&CompletionRequest::Prompt("Hello"));

        assert_eq!(body["prompt"], "Hello");
        assert!(body.get("messages").is_none());
        assert_eq!(body["top_p"], 0.5);
        assert_eq!(body["seed"], 7);
    }

    #[test]
    fn endpoint_follows_request_kind() {
        let api = client(&["--api", "http://localhost:8080/"]);
        assert_eq!(
            api.endpoint(&CompletionRequest::Chat(&[])),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            api.endpoint(&CompletionRequest::Prompt("x")),
            "http://localhost:8080/v1/completions"
        );
    }

    #[test]
    fn parses_chat_reply() {
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4",
            "choices": [
                {"index": 0, "finish_reason": "stop",
                 "message": {"role": "assistant", "content": "Hello there!"}},
                {"index": 1, "finish_reason": "stop",
                 "message": {"role": "assistant", "content": "second sample"}}
            ],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;
        assert_eq!(parse_reply(body).unwrap(), "Hello there!");
    }

    #[test]
    fn parses_plain_reply() {
        let body = r#"{"choices": [{"text": "42", "finish_reason": "length"}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "42");
    }

    #[test]
    fn empty_choices_and_null_content_are_malformed() {
        assert!(matches!(
            parse_reply(r#"{"choices": []}"#),
            Err(RemoteError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#),
            Err(RemoteError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply("<html>bad gateway</html>"),
            Err(RemoteError::Malformed(_))
        ));
    }

    #[test]
    fn error_object_in_body_is_an_api_error() {
        let body = r#"{"error": {"message": "model overloaded", "type": "server_error", "code": "overloaded"}}"#;
        match parse_reply(body) {
            Err(RemoteError::Api { code, message }) => {
                assert_eq!(code, "overloaded");
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}}"#;
        match error_for_status(StatusCode::UNAUTHORIZED, body) {
            RemoteError::Auth { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            RemoteError::RateLimited { status: 429, .. }
        ));

        match error_for_status(StatusCode::BAD_GATEWAY, "") {
            RemoteError::Api { code, message } => {
                assert_eq!(code, "502");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
