use std::{fmt::Display, sync::Arc};

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_reporter_core::config::Config;
use hmac::{Hmac, Mac};
use octocrab::models::webhook_events::WebhookEvent;
use sha2::Sha256;

/// Verified GitHub webhook payload, extracted from the request body.
#[derive(Clone)]
#[must_use]
pub struct GitHubEvent {
    pub event: WebhookEvent,
}

/// Check the `X-Hub-Signature-256` header against the raw body. GitHub signs
/// the body with HMAC-SHA256 using the App's webhook secret.
pub fn verify_signature(
    secret: &str,
    signature_header: &str,
    body: &[u8],
) -> Result<(), &'static str> {
    let digest = signature_header
        .strip_prefix("sha256=")
        .ok_or("X-Hub-Signature-256 sha256= prefix missing")?;
    let signature = hex::decode(digest).map_err(|_| "X-Hub-Signature-256 malformed")?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid webhook secret")?;
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| "signature mismatch")
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, m.to_string()).into_response()
        }
        let event_header = req
            .headers()
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err("X-GitHub-Event header missing"))?
            .to_string();
        let config = <Arc<Config>>::from_ref(state);
        let signature = req
            .headers()
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body =
            Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
        if let Some(app_config) = &config.github.app {
            let signature = signature.ok_or_else(|| err("X-Hub-Signature-256 missing"))?;
            verify_signature(&app_config.webhook_secret, &signature, &body).map_err(err)?;
        }
        let event = WebhookEvent::try_from_header_and_body(&event_header, &body)
            .map_err(|_| err("error parsing body"))?;
        Ok(GitHubEvent { event })
    }
}
