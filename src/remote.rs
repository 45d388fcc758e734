use crate::session::UserId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request rejected: {0}")]
    Validation(String),

    #[error("could not be saved: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unreachable: {0}")]
    Transport(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SosResponse {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub message: String,
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> ServiceResult<UserId>;

    async fn signup(&self, username: &str, password: &str) -> ServiceResult<UserId>;

    async fn save_contact(
        &self,
        user_id: &UserId,
        guardian_name: &str,
        guardian_phone: &str,
    ) -> ServiceResult<()>;

    async fn poll_detection(&self) -> ServiceResult<Option<String>>;

    async fn trigger_sos(&self, user_id: &UserId) -> ServiceResult<SosResponse>;

    async fn submit_feedback(
        &self,
        user_id: &UserId,
        message: &str,
        rating: u8,
    ) -> ServiceResult<()>;
}

#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
}

impl HttpRemoteService {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> ServiceResult<(StatusCode, Value)> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        read_body(response).await
    }

    async fn get(&self, path: &str) -> ServiceResult<(StatusCode, Value)> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> ServiceResult<(StatusCode, Value)> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| ServiceError::Transport(err.to_string()))?;
    // Error pages are not always JSON; keep the status and move on.
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    Ok((status, body))
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn login(&self, username: &str, password: &str) -> ServiceResult<UserId> {
        let (status, body) = self
            .post("/login", json!({"username": username, "password": password}))
            .await?;
        match status {
            s if s.is_success() => user_id_from(&body)
                .ok_or_else(|| ServiceError::Transport("login response has no user_id".into())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ServiceError::Auth(server_message(status, &body)))
            }
            StatusCode::BAD_REQUEST => Err(ServiceError::Validation(server_message(status, &body))),
            _ => Err(unexpected(status, &body)),
        }
    }

    async fn signup(&self, username: &str, password: &str) -> ServiceResult<UserId> {
        let (status, body) = self
            .post("/signup", json!({"username": username, "password": password}))
            .await?;
        match status {
            s if s.is_success() => user_id_from(&body)
                .ok_or_else(|| ServiceError::Transport("signup response has no user_id".into())),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ServiceError::Validation(server_message(status, &body)))
            }
            _ => Err(unexpected(status, &body)),
        }
    }

    async fn save_contact(
        &self,
        user_id: &UserId,
        guardian_name: &str,
        guardian_phone: &str,
    ) -> ServiceResult<()> {
        let (status, body) = self
            .post(
                "/add-contact",
                json!({
                    "user_id": user_id.as_str(),
                    "guardian_name": guardian_name,
                    "guardian_phone": guardian_phone,
                }),
            )
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(ServiceError::Persistence(server_message(status, &body)))
        }
    }

    async fn poll_detection(&self) -> ServiceResult<Option<String>> {
        let (status, body) = self.get("/current_object").await?;
        if status.is_success() {
            Ok(detected_label(&body))
        } else {
            Err(unexpected(status, &body))
        }
    }

    async fn trigger_sos(&self, user_id: &UserId) -> ServiceResult<SosResponse> {
        let (status, body) = self
            .post("/trigger-sos", json!({"user_id": user_id.as_str()}))
            .await?;
        match status {
            s if s.is_success() => Ok(sos_response_from(&body)),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(server_message(status, &body))),
            _ => Err(unexpected(status, &body)),
        }
    }

    async fn submit_feedback(
        &self,
        user_id: &UserId,
        message: &str,
        rating: u8,
    ) -> ServiceResult<()> {
        let (status, body) = self
            .post(
                "/feedback",
                json!({
                    "user_id": user_id.as_str(),
                    "message": message,
                    "rating": rating,
                }),
            )
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(ServiceError::Persistence(server_message(status, &body)))
        }
    }
}

/// The service hands ids out as integers; older builds used strings.
fn user_id_from(body: &Value) -> Option<UserId> {
    match body.get("user_id")? {
        Value::String(value) if !value.trim().is_empty() => Some(UserId::new(value.trim())),
        Value::Number(value) => Some(UserId::new(value.to_string())),
        _ => None,
    }
}

fn detected_label(body: &Value) -> Option<String> {
    body.get("object")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(ToOwned::to_owned)
}

fn sos_response_from(body: &Value) -> SosResponse {
    let field = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };
    let name = field("name");
    let phone = field("phone");
    let message = field("message").unwrap_or_else(|| match &name {
        Some(name) => format!("Calling Emergency Contact: {name}"),
        None => "Calling Emergency Contact.".to_string(),
    });
    SosResponse {
        name,
        phone,
        message,
    }
}

fn server_message(status: StatusCode, body: &Value) -> String {
    body.pointer("/message")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| status.to_string())
}

fn unexpected(status: StatusCode, body: &Value) -> ServiceError {
    ServiceError::Transport(format!("HTTP {status}: {}", server_message(status, body)))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::{RemoteService, ServiceError, ServiceResult, SosResponse};
    use crate::session::UserId;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedRemote {
        pub(crate) logins: Mutex<VecDeque<ServiceResult<UserId>>>,
        pub(crate) signups: Mutex<VecDeque<ServiceResult<UserId>>>,
        pub(crate) contacts: Mutex<VecDeque<ServiceResult<()>>>,
        pub(crate) detections: Mutex<VecDeque<ServiceResult<Option<String>>>>,
        pub(crate) sos: Mutex<VecDeque<ServiceResult<SosResponse>>>,
        pub(crate) feedback: Mutex<VecDeque<ServiceResult<()>>>,
        pub(crate) response_delay: Mutex<Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRemote {
        pub(crate) fn push<T>(queue: &Mutex<VecDeque<ServiceResult<T>>>, result: ServiceResult<T>) {
            queue.lock().expect("script mutex poisoned").push_back(result);
        }

        pub(crate) fn set_delay(&self, delay: Duration) {
            *self.response_delay.lock().expect("script mutex poisoned") = delay;
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("script mutex poisoned").clone()
        }

        pub(crate) fn count(&self, endpoint: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.split(':').next() == Some(endpoint))
                .count()
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("script mutex poisoned").push(call);
        }

        async fn delay(&self) {
            let delay = *self.response_delay.lock().expect("script mutex poisoned");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        fn next<T>(
            queue: &Mutex<VecDeque<ServiceResult<T>>>,
            fallback: impl FnOnce() -> ServiceResult<T>,
        ) -> ServiceResult<T> {
            queue
                .lock()
                .expect("script mutex poisoned")
                .pop_front()
                .unwrap_or_else(fallback)
        }
    }

    #[async_trait]
    impl RemoteService for ScriptedRemote {
        async fn login(&self, username: &str, _password: &str) -> ServiceResult<UserId> {
            self.record(format!("login:{username}"));
            let result = Self::next(&self.logins, || {
                Err(ServiceError::Auth("Invalid credentials".into()))
            });
            self.delay().await;
            result
        }

        async fn signup(&self, username: &str, _password: &str) -> ServiceResult<UserId> {
            self.record(format!("signup:{username}"));
            let result = Self::next(&self.signups, || {
                Err(ServiceError::Validation("User already exists".into()))
            });
            self.delay().await;
            result
        }

        async fn save_contact(
            &self,
            user_id: &UserId,
            guardian_name: &str,
            _guardian_phone: &str,
        ) -> ServiceResult<()> {
            self.record(format!("contact:{user_id}:{guardian_name}"));
            let result = Self::next(&self.contacts, || Ok(()));
            self.delay().await;
            result
        }

        async fn poll_detection(&self) -> ServiceResult<Option<String>> {
            self.record("detect".to_string());
            Self::next(&self.detections, || Ok(None))
        }

        async fn trigger_sos(&self, user_id: &UserId) -> ServiceResult<SosResponse> {
            self.record(format!("sos:{user_id}"));
            let result = Self::next(&self.sos, || {
                Err(ServiceError::NotFound("No contact found".into()))
            });
            self.delay().await;
            result
        }

        async fn submit_feedback(
            &self,
            user_id: &UserId,
            message: &str,
            rating: u8,
        ) -> ServiceResult<()> {
            self.record(format!("feedback:{user_id}:{message}:{rating}"));
            let result = Self::next(&self.feedback, || Ok(()));
            self.delay().await;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        HttpRemoteService, RemoteService, ServiceError, detected_label, sos_response_from,
        user_id_from,
    };
    use crate::session::UserId;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Answers exactly one request with `status` and a JSON `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> HttpRemoteService {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let read = socket.read(&mut buf).await.expect("read");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
        });

        HttpRemoteService::new(format!("http://{addr}"), Duration::from_secs(5)).expect("client")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[test]
    fn user_id_accepts_numbers_and_strings() {
        assert_eq!(
            user_id_from(&json!({"user_id": 42})),
            Some(UserId::new("42"))
        );
        assert_eq!(
            user_id_from(&json!({"user_id": "abc"})),
            Some(UserId::new("abc"))
        );
        assert_eq!(user_id_from(&json!({"user_id": ""})), None);
        assert_eq!(user_id_from(&json!({"message": "ok"})), None);
    }

    #[test]
    fn empty_detection_is_no_label() {
        assert_eq!(
            detected_label(&json!({"object": "chair"})),
            Some("chair".to_string())
        );
        assert_eq!(detected_label(&json!({"object": ""})), None);
        assert_eq!(detected_label(&json!({"object": null})), None);
        assert_eq!(detected_label(&json!({})), None);
    }

    #[test]
    fn sos_response_keeps_absent_fields_absent() {
        let full = sos_response_from(&json!({
            "message": "Calling Emergency Contact: Mum",
            "name": "Mum",
            "phone": "555-0100"
        }));
        assert_eq!(full.name.as_deref(), Some("Mum"));
        assert_eq!(full.phone.as_deref(), Some("555-0100"));
        assert_eq!(full.message, "Calling Emergency Contact: Mum");

        let partial = sos_response_from(&json!({"message": "Calling"}));
        assert!(partial.name.is_none());
        assert!(partial.phone.is_none());
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let service = HttpRemoteService::new("http://127.0.0.1:9/", Duration::from_millis(500))
            .expect("client");
        assert_eq!(service.base_url(), "http://127.0.0.1:9");

        match service.poll_detection().await {
            Err(ServiceError::Transport(_)) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_maps_status_codes() {
        let service = serve_once("200 OK", r#"{"user_id": 42}"#).await;
        assert_eq!(
            service.login("alice", "secret").await,
            Ok(UserId::new("42"))
        );

        let service = serve_once("401 Unauthorized", r#"{"message": "Invalid credentials"}"#).await;
        assert_eq!(
            service.login("alice", "wrong").await,
            Err(ServiceError::Auth("Invalid credentials".to_string()))
        );

        let service = serve_once("400 Bad Request", r#"{"message": "Missing fields"}"#).await;
        assert_eq!(
            service.login("", "").await,
            Err(ServiceError::Validation("Missing fields".to_string()))
        );

        let service = serve_once("500 Internal Server Error", "oops").await;
        assert!(matches!(
            service.login("alice", "secret").await,
            Err(ServiceError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn signup_conflicts_are_validation_errors() {
        for status in ["400 Bad Request", "409 Conflict", "422 Unprocessable Entity"] {
            let service = serve_once(status, r#"{"message": "User already exists"}"#).await;
            assert_eq!(
                service.signup("bob", "pw").await,
                Err(ServiceError::Validation("User already exists".to_string())),
                "status {status}"
            );
        }
    }

    #[tokio::test]
    async fn contact_and_feedback_failures_are_persistence_errors() {
        let user = UserId::new("42");

        let service = serve_once("500 Internal Server Error", r#"{"message": "database locked"}"#).await;
        assert_eq!(
            service.save_contact(&user, "Mum", "555-0100").await,
            Err(ServiceError::Persistence("database locked".to_string()))
        );

        let service = serve_once("400 Bad Request", r#"{"message": "rating out of range"}"#).await;
        assert_eq!(
            service.submit_feedback(&user, "great app", 5).await,
            Err(ServiceError::Persistence("rating out of range".to_string()))
        );

        let service = serve_once("201 Created", r#"{"message": "Feedback saved"}"#).await;
        assert_eq!(service.submit_feedback(&user, "great app", 5).await, Ok(()));
    }

    #[tokio::test]
    async fn sos_without_contact_is_not_found() {
        let user = UserId::new("42");

        let service = serve_once("404 Not Found", r#"{"message": "No contact found"}"#).await;
        assert_eq!(
            service.trigger_sos(&user).await,
            Err(ServiceError::NotFound("No contact found".to_string()))
        );

        let service = serve_once(
            "200 OK",
            r#"{"message": "Calling Emergency Contact: Mum", "name": "Mum", "phone": "555-0100"}"#,
        )
        .await;
        let response = service.trigger_sos(&user).await.expect("sos");
        assert_eq!(response.name.as_deref(), Some("Mum"));
        assert_eq!(response.phone.as_deref(), Some("555-0100"));
    }

    #[tokio::test]
    async fn detection_reads_current_object() {
        let service = serve_once("200 OK", r#"{"object": "chair"}"#).await;
        assert_eq!(service.poll_detection().await, Ok(Some("chair".to_string())));

        let service = serve_once("503 Service Unavailable", "{}").await;
        assert!(matches!(
            service.poll_detection().await,
            Err(ServiceError::Transport(_))
        ));
    }
}
