use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use maitre_core::config::BridgeConfig;
use maitre_core::domain::action::{ActionArguments, BridgeAction, ConfirmationToken};
use maitre_core::domain::conversation::SessionId;

use super::BridgeError;

/// What the interpreter made of a guest message.
#[derive(Clone, Debug, PartialEq)]
pub enum Interpretation {
    Action {
        action: String,
        arguments: ActionArguments,
        reason: Option<String>,
        requires_confirmation: bool,
    },
    Clarify {
        question: String,
    },
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    Completed { action: String, data: Value },
    ConfirmationRequired { token: ConfirmationToken },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ActionCatalog {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub confirmation_required: Vec<String>,
}

/// Interpreter/executor collaborator.
#[async_trait]
pub trait ActionService: Send + Sync {
    async fn interpret(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<Interpretation, BridgeError>;

    async fn execute(
        &self,
        action: &BridgeAction,
        token: Option<&ConfirmationToken>,
    ) -> Result<ExecutionOutcome, BridgeError>;

    async fn catalog(&self) -> Result<ActionCatalog, BridgeError>;
}

#[derive(Debug, Deserialize)]
struct InterpretResponse {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    arguments: ActionArguments,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    clarify: Option<String>,
    #[serde(default)]
    requires_confirmation: bool,
}

impl From<InterpretResponse> for Interpretation {
    fn from(response: InterpretResponse) -> Self {
        if let Some(question) = response.clarify.filter(|question| !question.trim().is_empty()) {
            return Self::Clarify { question };
        }
        match response.action.filter(|action| !action.trim().is_empty() && action != "unknown") {
            Some(action) => Self::Action {
                action,
                arguments: response.arguments,
                reason: response.reason,
                requires_confirmation: response.requires_confirmation,
            },
            None => Self::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    #[serde(default, alias = "token")]
    confirmation_token: Option<String>,
}

/// `POST {base}/interpret`, `POST {base}/execute`, `GET {base}/actions`.
pub struct HttpActionService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpActionService {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| BridgeError::NotConfigured("bridge.base_url is not set".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BridgeError::NotConfigured(error.to_string()))?;

        Ok(Self { client, base_url, api_key: config.api_key.clone() })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BridgeError> {
        self.authorized(request)
            .send()
            .await
            .map_err(|error| BridgeError::Unreachable(error.to_string()))
    }
}

#[async_trait]
impl ActionService for HttpActionService {
    async fn interpret(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<Interpretation, BridgeError> {
        let response = self
            .send(
                self.client
                    .post(format!("{}/interpret", self.base_url))
                    .json(&json!({ "text": text, "session_id": session_id.0 })),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status { status: status.as_u16() });
        }
        let body: InterpretResponse =
            response.json().await.map_err(|error| BridgeError::Protocol(error.to_string()))?;
        Ok(body.into())
    }

    async fn execute(
        &self,
        action: &BridgeAction,
        token: Option<&ConfirmationToken>,
    ) -> Result<ExecutionOutcome, BridgeError> {
        let mut payload = json!({
            "action": action.kind().as_str(),
            "arguments": action.arguments(),
        });
        if let Some(token) = token {
            payload["confirmation_token"] = Value::String(token.as_str().to_string());
        }

        let response = self
            .send(self.client.post(format!("{}/execute", self.base_url)).json(&payload))
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body: ConfirmationResponse =
                response.json().await.map_err(|error| BridgeError::Protocol(error.to_string()))?;
            let token = body
                .confirmation_token
                .as_deref()
                .and_then(ConfirmationToken::parse)
                .ok_or_else(|| {
                    BridgeError::Protocol("409 response without a valid confirmation token".into())
                })?;
            return Ok(ExecutionOutcome::ConfirmationRequired { token });
        }
        if !status.is_success() {
            return Err(BridgeError::Status { status: status.as_u16() });
        }

        let body: ExecuteResponse =
            response.json().await.map_err(|error| BridgeError::Protocol(error.to_string()))?;
        Ok(ExecutionOutcome::Completed {
            action: body.action.unwrap_or_else(|| action.kind().as_str().to_string()),
            data: body.data,
        })
    }

    async fn catalog(&self) -> Result<ActionCatalog, BridgeError> {
        let response =
            self.send(self.client.get(format!("{}/actions", self.base_url))).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status { status: status.as_u16() });
        }
        response.json().await.map_err(|error| BridgeError::Protocol(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use maitre_core::config::AppConfig;

    use super::{ActionCatalog, HttpActionService, InterpretResponse, Interpretation};
    use crate::bridge::BridgeError;

    fn interpretation(value: serde_json::Value) -> Interpretation {
        serde_json::from_value::<InterpretResponse>(value).expect("response shape").into()
    }

    #[test]
    fn interpreter_payloads_map_to_variants() {
        assert_eq!(
            interpretation(json!({ "clarify": "請問是哪一張桌子？" })),
            Interpretation::Clarify { question: "請問是哪一張桌子？".to_string() }
        );
        assert_eq!(interpretation(json!({ "action": "unknown" })), Interpretation::Unknown);
        assert_eq!(interpretation(json!({})), Interpretation::Unknown);

        let Interpretation::Action { action, arguments, requires_confirmation, .. } =
            interpretation(json!({
                "action": "close_order",
                "arguments": { "order_id": "O-7" },
                "requires_confirmation": true
            }))
        else {
            panic!("expected an action");
        };
        assert_eq!(action, "close_order");
        assert_eq!(arguments.get("order_id"), Some(&json!("O-7")));
        assert!(requires_confirmation);
    }

    #[test]
    fn catalog_tolerates_missing_lists() {
        let catalog: ActionCatalog =
            serde_json::from_value(json!({ "actions": ["list_slots"] })).expect("catalog");
        assert_eq!(catalog.actions, vec!["list_slots"]);
        assert!(catalog.confirmation_required.is_empty());
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let config = AppConfig::default().bridge;
        assert!(matches!(
            HttpActionService::from_config(&config),
            Err(BridgeError::NotConfigured(_))
        ));
    }
}
