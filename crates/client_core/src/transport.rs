use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::Message,
    protocol::{Channel, Destination, Roster},
};
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};

use crate::{engine::EngineEvent, session::SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Broadcast(Message),
    Private(Message),
    Roster(Roster),
    Error(String),
}

/// Where a transport delivers inbound frames. Frames are tagged with the
/// session that opened the connection so late frames from an old
/// connection are discarded by the engine.
#[derive(Clone)]
pub struct EventSink {
    session: SessionId,
    events: WeakUnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, events: &UnboundedSender<EngineEvent>) -> Self {
        Self {
            session,
            events: events.downgrade(),
        }
    }

    pub(crate) fn from_weak(session: SessionId, events: WeakUnboundedSender<EngineEvent>) -> Self {
        Self { session, events }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn deliver(&self, event: InboundEvent) -> bool {
        match self.events.upgrade() {
            Some(tx) => tx
                .send(EngineEvent::Inbound {
                    session: self.session,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, identity: &str, sink: EventSink) -> Result<()>;
    async fn subscribe(&self, channel: Channel) -> Result<()>;
    async fn send(&self, destination: Destination, message: &Message) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

pub struct MissingPushTransport;

#[async_trait]
impl PushTransport for MissingPushTransport {
    async fn connect(&self, identity: &str, _sink: EventSink) -> Result<()> {
        Err(anyhow!("push transport unavailable for '{identity}'"))
    }

    async fn subscribe(&self, channel: Channel) -> Result<()> {
        Err(anyhow!(
            "push transport unavailable for subscription {}",
            channel.path()
        ))
    }

    async fn send(&self, destination: Destination, _message: &Message) -> Result<()> {
        Err(anyhow!(
            "push transport unavailable for destination {}",
            destination.path()
        ))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
