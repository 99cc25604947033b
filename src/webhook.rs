//! C8 — WebhookNotifier: best-effort, at-most-once fan-out after a successful
//! bundle publish. Failures are logged, never retried, and never abort the
//! tick (spec.md §4.8).

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::timestamp::UnixTimestamp;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    bundle: &'a crate::model::BundleBody,
    cid: &'a str,
    nonce: i64,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, secret: Option<String>) -> Self {
        WebhookNotifier {
            client: reqwest::Client::new(),
            url,
            secret,
        }
    }

    /// Fires `BUNDLE_PROPOSED`. Never returns an error to the caller; any
    /// failure is logged at `warn!` and swallowed.
    pub async fn notify_bundle_proposed(&self, body: &crate::model::BundleBody, cid: &str, nonce: i64) {
        let Some(url) = &self.url else { return };
        let payload = WebhookPayload {
            event_type: "BUNDLE_PROPOSED",
            bundle: body,
            cid,
            nonce,
            created_at: UnixTimestamp::try_now().map(|t| t.seconds_since_epoch()).unwrap_or(0),
        };
        let json = match serde_json::to_vec(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize webhook payload");
                return;
            }
        };

        let mut request = self.client.post(url).header("content-type", "application/json");
        if let Some(secret) = &self.secret {
            if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
                mac.update(&json);
                let signature = hex::encode(mac.finalize().into_bytes());
                request = request.header("x-webhook-signature", signature);
            }
        }

        if let Err(e) = request.body(json).send().await {
            tracing::warn!(error = %e, cid, nonce, "webhook delivery failed");
        }
    }
}
