//! HTTP relay transport.
//!
//! POSTs a JSON envelope to a mail relay endpoint (a transactional email
//! API or an internal mail service). When a signing secret is configured
//! the raw body is signed with HMAC-SHA256 and sent as
//! `X-Dashkeep-Signature: sha256=<hex>` so the relay can authenticate us.

use async_trait::async_trait;
use dashkeep_core::error::NotifyError;
use dashkeep_core::notification::{EmailDispatcher, TemplateKind};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use crate::templates;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Dashkeep-Signature";

#[derive(Debug, Clone)]
pub struct HttpRelayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub signing_secret: Option<String>,
    pub from_address: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct Envelope<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    template: &'static str,
    data: &'a serde_json::Value,
}

pub struct HttpRelayMailer {
    config: HttpRelayConfig,
    client: reqwest::Client,
}

impl HttpRelayMailer {
    pub fn new(config: HttpRelayConfig) -> Result<Self, NotifyError> {
        if config.endpoint.trim().is_empty() {
            return Err(NotifyError::NotConfigured("relay endpoint is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

/// Compute the `sha256=<hex>` signature for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::NotConfigured(format!("signing key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` (or bare hex) signature in constant time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[async_trait]
impl EmailDispatcher for HttpRelayMailer {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let email = templates::render(kind, data)?;
        let body = serde_json::to_vec(&Envelope {
            from: &self.config.from_address,
            to: recipient,
            subject: &email.subject,
            text: &email.text,
            template: kind.as_str(),
            data,
        })
        .map_err(|e| NotifyError::Template(format!("envelope: {e}")))?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json");

        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(secret) = self.config.signing_secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::DeliveryFailed {
                recipient: recipient.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), to = %recipient, "Email relay rejected message");
            return Err(NotifyError::Rejected {
                status_code: status.as_u16(),
                message,
            });
        }

        debug!(template = kind.as_str(), to = %recipient, "Email relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    }

    async fn accept(State(c): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
        c.requests.lock().unwrap().push((headers, body));
        StatusCode::ACCEPTED
    }

    async fn reject() -> (StatusCode, &'static str) {
        (StatusCode::UNPROCESSABLE_ENTITY, "bad recipient")
    }

    async fn spawn_relay(captured: Captured) -> String {
        let app = Router::new()
            .route("/send", post(accept))
            .route("/reject", post(reject))
            .with_state(captured);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(endpoint: String) -> HttpRelayConfig {
        HttpRelayConfig {
            endpoint,
            api_key: Some("key-123".into()),
            signing_secret: Some("s3cret".into()),
            from_address: "noreply@example.com".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn data() -> serde_json::Value {
        json!({ "name": "Ada", "dashboards": [{ "id": "sales", "name": "Sales" }] })
    }

    #[test]
    fn sign_and_verify() {
        let sig = sign("secret", b"payload").unwrap();
        assert!(sig.starts_with("sha256="));
        assert!(verify("secret", b"payload", &sig));
        assert!(verify("secret", b"payload", sig.trim_start_matches("sha256=")));
        assert!(!verify("secret", b"tampered", &sig));
        assert!(!verify("other", b"payload", &sig));
        assert!(!verify("secret", b"payload", "sha256=not-hex"));
    }

    #[test]
    fn empty_endpoint_rejected() {
        let result = HttpRelayMailer::new(config("  ".into()));
        assert!(matches!(result, Err(NotifyError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn posts_signed_envelope() {
        let captured = Captured::default();
        let base = spawn_relay(captured.clone()).await;
        let mailer = HttpRelayMailer::new(config(format!("{base}/send"))).unwrap();

        mailer
            .send(TemplateKind::AccessExpired, "ada@example.com", &data())
            .await
            .unwrap();

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];
        assert_eq!(headers["authorization"], "Bearer key-123");
        let sig = headers[SIGNATURE_HEADER].to_str().unwrap();
        assert!(verify("s3cret", body, sig));

        let envelope: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(envelope["to"], "ada@example.com");
        assert_eq!(envelope["template"], "access_expired");
        assert_eq!(envelope["subject"], "Dashboard access expired (1)");
    }

    #[tokio::test]
    async fn non_success_is_rejected() {
        let base = spawn_relay(Captured::default()).await;
        let mailer = HttpRelayMailer::new(config(format!("{base}/reject"))).unwrap();
        let result = mailer.send(TemplateKind::ExpiryUrgent, "x@example.com", &data()).await;
        match result {
            Err(NotifyError::Rejected { status_code, message }) => {
                assert_eq!(status_code, 422);
                assert_eq!(message, "bad recipient");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_relay_is_delivery_failure() {
        let mailer = HttpRelayMailer::new(config("http://127.0.0.1:1/send".into())).unwrap();
        let result = mailer.send(TemplateKind::ExpiryUrgent, "x@example.com", &data()).await;
        assert!(matches!(result, Err(NotifyError::DeliveryFailed { .. })));
    }
}
