//! Outbound network contract.
//!
//! The gossip transport is an external collaborator; the core only needs a
//! way to broadcast its own announcements and blocks. Inbound traffic
//! reaches the engine through bounded channels owned by the embedding
//! application's ingress task.

use async_trait::async_trait;
use thiserror::Error;

use crate::announcement::SignedAnnouncement;
use crate::block::Block;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Network shut down")]
    Closed,
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn broadcast_announcement(&self, ann: &SignedAnnouncement) -> Result<(), NetworkError>;
    async fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError>;
}

/// Discards all broadcasts. Used by single-node deployments and tests.
#[derive(Default)]
pub struct NoopNetwork;

#[async_trait]
impl Network for NoopNetwork {
    async fn broadcast_announcement(&self, _ann: &SignedAnnouncement) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn broadcast_block(&self, _block: &Block) -> Result<(), NetworkError> {
        Ok(())
    }
}
