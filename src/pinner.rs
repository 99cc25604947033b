//! C8 — Pinner: best-effort long-term pin of a published bundle's gzip bytes
//! to the content store. Disabled unless `PIN_ENABLED=true`; failures are
//! logged, not retried, and never abort the tick.

use crate::chain_gateway::ChainGateway;
use std::sync::Arc;

pub struct Pinner {
    gateway: Arc<ChainGateway>,
    enabled: bool,
}

impl Pinner {
    pub fn new(gateway: Arc<ChainGateway>, enabled: bool) -> Self {
        Pinner { gateway, enabled }
    }

    pub async fn pin(&self, cid: &str, gzip_base64: &str, nonce: i64) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.gateway.store_put(gzip_base64.as_bytes().to_vec()).await {
            tracing::warn!(error = %e, cid, nonce, "pin failed");
        }
    }
}
