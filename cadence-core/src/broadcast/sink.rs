use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CadenceError, CadenceResult};

use super::types::PropertyUpdate;

/// Transport end of one subscriber. An error unsubscribes it.
#[async_trait]
pub trait UpdateSink: Send {
    async fn send(&mut self, update: PropertyUpdate) -> CadenceResult<()>;
}

#[async_trait]
impl UpdateSink for mpsc::Sender<PropertyUpdate> {
    async fn send(&mut self, update: PropertyUpdate) -> CadenceResult<()> {
        mpsc::Sender::send(self, update)
            .await
            .map_err(|_| CadenceError::TransportFailure("receiver dropped".to_string()))
    }
}

#[async_trait]
impl UpdateSink for mpsc::UnboundedSender<PropertyUpdate> {
    async fn send(&mut self, update: PropertyUpdate) -> CadenceResult<()> {
        mpsc::UnboundedSender::send(self, update)
            .map_err(|_| CadenceError::TransportFailure("receiver dropped".to_string()))
    }
}
