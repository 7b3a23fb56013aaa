//! Rendezvous channel between a running capability and its drain
//!
//! `send` only completes after the receiver has taken the entity, so a
//! capability can never run ahead of whoever is consuming its output.

use tokio::sync::{mpsc, oneshot};

use crate::entity::Entity;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Delivery {
    entity: Entity,
    ack: oneshot::Sender<()>,
}

/// Sending half, cloned freely into a capability's own tasks
#[derive(Debug, Clone)]
pub struct Stream {
    tx: mpsc::Sender<Delivery>,
}

/// Receiving half, owned by the dispatcher's drain task
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::Receiver<Delivery>,
}

impl Stream {
    pub fn channel() -> (Stream, StreamReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (Stream { tx }, StreamReceiver { rx })
    }

    /// Hand an entity to the receiver, waiting until it has been taken
    pub async fn send(&self, entity: impl Into<Entity>) -> Result<()> {
        let (ack, received) = oneshot::channel();
        self.tx
            .send(Delivery {
                entity: entity.into(),
                ack,
            })
            .await
            .map_err(|_| Error::StreamClosed)?;
        received.await.map_err(|_| Error::StreamClosed)
    }
}

impl StreamReceiver {
    /// Next entity, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Entity> {
        let delivery = self.rx.recv().await?;
        let _ = delivery.ack.send(());
        Some(delivery.entity)
    }
}
