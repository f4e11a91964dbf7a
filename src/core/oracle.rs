//! Hash Oracle — resolves the verified digest a content key is known to
//! carry, so a job can flag a mismatch before trusting a freshly-built
//! verification pool. Kept separate from verification (component D): the
//! Oracle only ever answers "what digest has been published for this
//! content key", never "does this peer actually hold it" — that check
//! still goes through the prefix-digest pool builder before any bytes are
//! trusted.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::libp2p_transport::Libp2pTransport;

/// `Lookup(content-key) -> digest?`, `Publish(content-key, digest)`.
#[async_trait]
pub trait HashOracle: Send + Sync {
    async fn lookup(&self, content_key: &str) -> Option<String>;
    async fn publish(&self, content_key: &str, digest: &str);
}

/// Thin reference adapter riding the same gossipsub topic the default
/// Transport Adapter already subscribes to, so a caller that only needs
/// the default stack can share one Swarm between both roles.
pub struct Libp2pHashOracle {
    transport: Arc<Libp2pTransport>,
}

impl Libp2pHashOracle {
    pub fn new(transport: Arc<Libp2pTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl HashOracle for Libp2pHashOracle {
    async fn lookup(&self, content_key: &str) -> Option<String> {
        self.transport.lookup_digest(content_key).await
    }

    async fn publish(&self, content_key: &str, digest: &str) {
        self.transport.publish_digest(content_key, digest).await;
    }
}
