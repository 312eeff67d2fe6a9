use std::sync::Arc;

use shared::{domain::BucketKey, error::SyncError};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn};

use crate::{
    engine::{ChatEngine, Effect, EngineEvent},
    server_api::{ChatServerApi, FileUpload},
    transport::{EventSink, PushTransport},
};

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("sync driver has stopped")]
    DriverStopped,
}

#[derive(Clone)]
pub struct EngineHandle {
    events: UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn submit(&self, event: EngineEvent) -> Result<(), HandleError> {
        self.events
            .send(event)
            .map_err(|_| HandleError::DriverStopped)
    }

    pub fn connect(&self, identity: impl Into<String>) -> Result<(), HandleError> {
        self.submit(EngineEvent::Connect {
            identity: identity.into(),
        })
    }

    pub fn disconnect(&self) -> Result<(), HandleError> {
        self.submit(EngineEvent::Disconnect)
    }

    pub fn switch_conversation(&self, bucket: BucketKey) -> Result<(), HandleError> {
        self.submit(EngineEvent::SwitchConversation(bucket))
    }

    pub fn send_text(&self, content: impl Into<String>) -> Result<(), HandleError> {
        self.submit(EngineEvent::SendText {
            content: content.into(),
        })
    }

    pub fn send_file(&self, upload: FileUpload) -> Result<(), HandleError> {
        self.submit(EngineEvent::SendFile(upload))
    }

    pub fn clear_conversation(&self, bucket: BucketKey) -> Result<(), HandleError> {
        self.submit(EngineEvent::ClearConversation(bucket))
    }
}

pub struct SyncDriver {
    engine: ChatEngine,
    transport: Arc<dyn PushTransport>,
    server: Arc<dyn ChatServerApi>,
    events_rx: UnboundedReceiver<EngineEvent>,
    events: WeakUnboundedSender<EngineEvent>,
    in_flight: JoinSet<EngineEvent>,
}

impl SyncDriver {
    /// The loop ends once every [`EngineHandle`] is dropped and no
    /// collaborator call is still in flight.
    pub fn new(
        engine: ChatEngine,
        transport: Arc<dyn PushTransport>,
        server: Arc<dyn ChatServerApi>,
    ) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Self {
            engine,
            transport,
            server,
            events_rx,
            events: events_tx.downgrade(),
            in_flight: JoinSet::new(),
        };
        (driver, EngineHandle { events: events_tx })
    }

    pub fn spawn(self) -> JoinHandle<ChatEngine> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> ChatEngine {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_transport_worker(
            Arc::clone(&self.transport),
            jobs_rx,
            done_tx,
            self.events.clone(),
        ));

        let mut handles_open = true;
        let mut transport_pending = 0usize;
        loop {
            if !handles_open && transport_pending == 0 && self.in_flight.is_empty() {
                break;
            }
            let event = tokio::select! {
                received = self.events_rx.recv(), if handles_open => match received {
                    Some(event) => event,
                    None => {
                        handles_open = false;
                        continue;
                    }
                },
                Some(done) = done_rx.recv(), if transport_pending > 0 => {
                    transport_pending -= 1;
                    match done {
                        Some(event) => event,
                        None => continue,
                    }
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok(event) => event,
                        Err(err) => {
                            warn!("driver: collaborator task ended abnormally: {err}");
                            continue;
                        }
                    }
                }
                else => break,
            };

            let effects = self.engine.handle(event).await;
            for effect in effects {
                if effect.is_transport() {
                    if jobs_tx.send(effect).is_ok() {
                        transport_pending += 1;
                    } else {
                        warn!("driver: transport worker is gone; dropping effect");
                    }
                } else {
                    self.spawn_call(effect);
                }
            }
        }

        drop(jobs_tx);
        if let Err(err) = worker.await {
            warn!("driver: transport worker ended abnormally: {err}");
        }
        self.engine
    }

    fn spawn_call(&mut self, effect: Effect) {
        let server = Arc::clone(&self.server);

        match effect {
            Effect::FetchHistory(ticket) => {
                self.in_flight.spawn(async move {
                    let result = server
                        .fetch_history(&ticket.local_identity, &ticket.bucket)
                        .await
                        .map_err(SyncError::fetch);
                    EngineEvent::HistoryFetched { ticket, result }
                });
            }
            Effect::FetchRoster { session } => {
                self.in_flight.spawn(async move {
                    let result = server.fetch_roster().await.map_err(SyncError::fetch);
                    EngineEvent::RosterFetched { session, result }
                });
            }
            Effect::ClearRemoteHistory {
                local_identity,
                bucket,
            } => {
                self.in_flight.spawn(async move {
                    let result = server
                        .clear_history(&local_identity, &bucket)
                        .await
                        .map_err(SyncError::fetch);
                    EngineEvent::RemoteClearFinished { bucket, result }
                });
            }
            Effect::Upload {
                session,
                upload,
                sender,
                receiver,
            } => {
                self.in_flight.spawn(async move {
                    let result = server
                        .upload_file(upload, &sender, &receiver)
                        .await
                        .map_err(SyncError::transport);
                    EngineEvent::UploadFinished { session, result }
                });
            }
            Effect::Connect { .. }
            | Effect::Subscribe { .. }
            | Effect::Publish { .. }
            | Effect::Disconnect { .. } => {
                debug!("driver: transport effect routed to server calls; ignoring");
            }
        }
    }
}

async fn run_transport_worker(
    transport: Arc<dyn PushTransport>,
    mut jobs: UnboundedReceiver<Effect>,
    done: UnboundedSender<Option<EngineEvent>>,
    events: WeakUnboundedSender<EngineEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let completion = match job {
            Effect::Connect { session, identity } => {
                let sink = EventSink::from_weak(session, events.clone());
                match transport.connect(&identity, sink).await {
                    Ok(()) => Some(EngineEvent::ConnectAcked(session)),
                    Err(err) => Some(EngineEvent::ConnectFailed {
                        session,
                        reason: format!("{err:#}"),
                    }),
                }
            }
            Effect::Subscribe { session, channel } => {
                debug!(channel = channel.path(), "transport: subscribing");
                transport
                    .subscribe(channel)
                    .await
                    .err()
                    .map(|err| EngineEvent::TransportFailed {
                        session,
                        reason: format!("{err:#}"),
                    })
            }
            Effect::Publish {
                session,
                destination,
                message,
            } => transport
                .send(destination, &message)
                .await
                .err()
                .map(|err| EngineEvent::TransportFailed {
                    session,
                    reason: format!("{err:#}"),
                }),
            Effect::Disconnect { session } => {
                if let Err(err) = transport.disconnect().await {
                    warn!(session = session.0, "transport: disconnect failed: {err:#}");
                }
                None
            }
            _ => None,
        };

        if done.send(completion).is_err() {
            warn!("transport: driver loop is gone; dropping completion");
        }
    }
}

#[cfg(test)]
#[path = "tests/driver_tests.rs"]
mod tests;
