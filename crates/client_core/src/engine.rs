use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use shared::{
    domain::{BucketKey, Message, MessageKind},
    error::{SyncError, ValidationError},
    identity::MessageIdentity,
    protocol::{Channel, Destination, Roster},
};
use storage::{HistoryStore, StoredEntry};
use tracing::{debug, error, info, warn};

use crate::{
    presenter::{empty_conversation_hint, presence_notice, Presenter},
    reconcile::{merge_histories, FetchTicket},
    router::route,
    server_api::FileUpload,
    session::{Session, SessionId, SessionState},
    transport::InboundEvent,
};

pub const DEFAULT_MAX_IDENTITY_LEN: usize = 20;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_identity_len: usize,
    pub max_upload_bytes: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_identity_len: DEFAULT_MAX_IDENTITY_LEN,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connect {
        identity: String,
    },
    Disconnect,
    SwitchConversation(BucketKey),
    SendText {
        content: String,
    },
    SendFile(FileUpload),
    ClearConversation(BucketKey),
    ConnectAcked(SessionId),
    ConnectFailed {
        session: SessionId,
        reason: String,
    },
    TransportFailed {
        session: SessionId,
        reason: String,
    },
    Inbound {
        session: SessionId,
        event: InboundEvent,
    },
    HistoryFetched {
        ticket: FetchTicket,
        result: Result<Vec<Message>, SyncError>,
    },
    RosterFetched {
        session: SessionId,
        result: Result<Roster, SyncError>,
    },
    UploadFinished {
        session: SessionId,
        result: Result<Message, SyncError>,
    },
    RemoteClearFinished {
        bucket: BucketKey,
        result: Result<(), SyncError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect {
        session: SessionId,
        identity: String,
    },
    Subscribe {
        session: SessionId,
        channel: Channel,
    },
    Publish {
        session: SessionId,
        destination: Destination,
        message: Message,
    },
    Disconnect {
        session: SessionId,
    },
    FetchHistory(FetchTicket),
    FetchRoster {
        session: SessionId,
    },
    ClearRemoteHistory {
        local_identity: String,
        bucket: BucketKey,
    },
    Upload {
        session: SessionId,
        upload: FileUpload,
        sender: String,
        receiver: BucketKey,
    },
}

impl Effect {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Effect::Connect { .. }
                | Effect::Subscribe { .. }
                | Effect::Publish { .. }
                | Effect::Disconnect { .. }
        )
    }
}

pub struct ChatEngine {
    session: Session,
    store: HistoryStore,
    active: BucketKey,
    displayed: HashSet<MessageIdentity>,
    roster: Roster,
    limits: EngineLimits,
    clock: Arc<dyn Clock>,
    presenter: Box<dyn Presenter>,
}

impl ChatEngine {
    pub fn new(store: HistoryStore, presenter: Box<dyn Presenter>) -> Self {
        Self {
            session: Session::new(),
            store,
            active: BucketKey::Broadcast,
            displayed: HashSet::new(),
            roster: Roster::new(),
            limits: EngineLimits::default(),
            clock: Arc::new(SystemClock),
            presenter,
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn active_conversation(&self) -> &BucketKey {
        &self.active
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_displayed(&self, id: &MessageIdentity) -> bool {
        self.displayed.contains(id)
    }

    pub fn displayed_count(&self) -> usize {
        self.displayed.len()
    }

    pub async fn handle(&mut self, event: EngineEvent) -> Vec<Effect> {
        match event {
            EngineEvent::Connect { identity } => self.connect(&identity),
            EngineEvent::Disconnect => self.disconnect(),
            EngineEvent::SwitchConversation(bucket) => self.switch_conversation(bucket),
            EngineEvent::SendText { content } => self.send_text(&content).await,
            EngineEvent::SendFile(upload) => self.send_file(upload),
            EngineEvent::ClearConversation(bucket) => self.clear_conversation(bucket).await,
            EngineEvent::ConnectAcked(session) => self.on_connected(session),
            EngineEvent::ConnectFailed { session, reason } => {
                self.on_transport_failure(session, SyncError::Transport(reason), true)
            }
            EngineEvent::TransportFailed { session, reason } => {
                self.on_transport_failure(session, SyncError::Transport(reason), false)
            }
            EngineEvent::Inbound { session, event } => self.on_inbound(session, event).await,
            EngineEvent::HistoryFetched { ticket, result } => {
                self.on_history_fetched(ticket, result).await;
                Vec::new()
            }
            EngineEvent::RosterFetched { session, result } => {
                self.on_roster_fetched(session, result);
                Vec::new()
            }
            EngineEvent::UploadFinished { session, result } => {
                self.on_upload_finished(session, result).await
            }
            EngineEvent::RemoteClearFinished { bucket, result } => {
                match result {
                    Ok(()) => debug!(bucket = %bucket, "history: remote clear acknowledged"),
                    Err(err) => warn!(bucket = %bucket, "history: remote clear failed: {err}"),
                }
                Vec::new()
            }
        }
    }

    fn connect(&mut self, identity: &str) -> Vec<Effect> {
        match self
            .session
            .begin_connect(identity, self.limits.max_identity_len)
        {
            Ok(session) => {
                let identity = self.session.identity().unwrap_or_default().to_string();
                info!(session = session.0, identity = %identity, "session: connecting");
                self.presenter.on_session_state(SessionState::Connecting);
                vec![Effect::Connect { session, identity }]
            }
            Err(err) => {
                self.reject(err);
                Vec::new()
            }
        }
    }

    fn on_connected(&mut self, session: SessionId) -> Vec<Effect> {
        if !self.session.acknowledge(session) {
            debug!(session = session.0, "session: ignoring stale connect acknowledgment");
            return Vec::new();
        }
        let identity = self.session.identity().unwrap_or_default().to_string();
        info!(session = session.0, identity = %identity, "session: connected");
        self.presenter.on_session_state(SessionState::Connected);

        let mut effects = vec![
            Effect::Publish {
                session,
                destination: Destination::Join,
                message: Message::presence(MessageKind::Join, identity.clone(), self.clock.now()),
            },
            Effect::Subscribe {
                session,
                channel: Channel::Broadcast,
            },
            Effect::Subscribe {
                session,
                channel: Channel::Private {
                    identity: identity.clone(),
                },
            },
            Effect::Subscribe {
                session,
                channel: Channel::Roster,
            },
            Effect::FetchRoster { session },
        ];
        effects.extend(self.reconcile_active());
        effects
    }

    fn disconnect(&mut self) -> Vec<Effect> {
        let session = self.session.id();
        let Some((previous, identity)) = self.session.end() else {
            debug!("session: disconnect requested while already disconnected");
            return Vec::new();
        };

        let mut effects = Vec::new();
        if previous == SessionState::Connected {
            effects.push(Effect::Publish {
                session,
                destination: Destination::Leave,
                message: Message::presence(MessageKind::Leave, identity.clone(), self.clock.now()),
            });
        }
        effects.push(Effect::Disconnect { session });

        info!(session = session.0, identity = %identity, "session: disconnected");
        self.reset_session_view();
        effects
    }

    fn on_transport_failure(
        &mut self,
        session: SessionId,
        err: SyncError,
        during_connect: bool,
    ) -> Vec<Effect> {
        let Some((previous, identity)) = self.session.fail(session) else {
            debug!(session = session.0, "session: ignoring failure from stale session");
            return Vec::new();
        };
        error!(
            session = session.0,
            identity = %identity,
            state = ?previous,
            "session: transport failure: {err}"
        );
        self.reset_session_view();
        let notice = if during_connect {
            format!("Failed to connect to the server: {err}")
        } else {
            format!("Connection lost: {err}")
        };
        self.presenter.on_system_notice(&notice);
        vec![Effect::Disconnect { session }]
    }

    fn reset_session_view(&mut self) {
        self.displayed.clear();
        self.roster.clear();
        self.presenter.on_roster_changed(&self.roster);
        self.presenter.on_session_state(SessionState::Disconnected);
    }

    fn switch_conversation(&mut self, bucket: BucketKey) -> Vec<Effect> {
        info!(bucket = %bucket, "history: switching conversation");
        self.active = bucket;
        self.reconcile_active()
    }

    /// Renders the cached bucket right away and, when connected, asks the
    /// server for the authoritative list.
    fn reconcile_active(&mut self) -> Vec<Effect> {
        let entries = self.store.get(&self.active);
        self.render_fresh(&entries);

        match self.session.connected_identity() {
            Some(identity) => vec![Effect::FetchHistory(FetchTicket {
                session: self.session.id(),
                local_identity: identity.to_string(),
                bucket: self.active.clone(),
            })],
            None => Vec::new(),
        }
    }

    async fn on_history_fetched(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, SyncError>,
    ) {
        if !self.session.is_current(ticket.session)
            || self.session.connected_identity() != Some(ticket.local_identity.as_str())
        {
            debug!(
                session = ticket.session.0,
                bucket = %ticket.bucket,
                "history: dropping fetch from stale session"
            );
            return;
        }
        let server = match result {
            Ok(server) => server,
            Err(err) => {
                warn!(bucket = %ticket.bucket, "history: fetch failed, keeping local history: {err}");
                return;
            }
        };

        let local = self.store.get(&ticket.bucket);
        let merged = merge_histories(local, server, &ticket.local_identity);
        info!(
            bucket = %ticket.bucket,
            entries = merged.entries.len(),
            added = merged.added_from_server,
            "history: reconciled bucket"
        );
        self.store.replace(&ticket.bucket, merged.entries).await;

        if ticket.bucket != self.active {
            debug!(bucket = %ticket.bucket, active = %self.active, "history: stored reconciliation for inactive bucket");
            return;
        }
        let entries = self.store.get(&self.active);
        self.render_fresh(&entries);
    }

    fn on_roster_fetched(&mut self, session: SessionId, result: Result<Roster, SyncError>) {
        if !self.session.is_current(session) {
            return;
        }
        match result {
            Ok(roster) => self.update_roster(roster),
            Err(err) => warn!(session = session.0, "session: roster fetch failed: {err}"),
        }
    }

    fn update_roster(&mut self, roster: Roster) {
        debug!(online = roster.len(), "session: roster updated");
        self.roster = roster;
        self.presenter.on_roster_changed(&self.roster);
    }

    async fn on_inbound(&mut self, session: SessionId, event: InboundEvent) -> Vec<Effect> {
        if !self.session.is_current(session) {
            debug!(session = session.0, "session: dropping frame from stale session");
            return Vec::new();
        }
        if let InboundEvent::Error(reason) = event {
            return self.on_transport_failure(session, SyncError::Transport(reason), false);
        }
        let Some(local_identity) = self.session.connected_identity().map(str::to_string) else {
            debug!(session = session.0, "session: dropping frame received before acknowledgment");
            return Vec::new();
        };

        match event {
            InboundEvent::Broadcast(message) if message.kind.is_presence() => {
                self.presenter.on_system_notice(&presence_notice(&message));
            }
            InboundEvent::Broadcast(message) => self.intake(message, &local_identity).await,
            InboundEvent::Private(message) => {
                let addressed_to_me = message.receiver.as_deref() == Some(local_identity.as_str());
                if message.sender != local_identity && !addressed_to_me {
                    debug!(sender = %message.sender, "intake: dropping private message not involving us");
                    return Vec::new();
                }
                self.intake(message, &local_identity).await;
            }
            InboundEvent::Roster(roster) => self.update_roster(roster),
            InboundEvent::Error(_) => {}
        }
        Vec::new()
    }

    /// Live push path: render if it belongs to the open conversation and was
    /// not shown yet, then append to history regardless.
    async fn intake(&mut self, message: Message, local_identity: &str) {
        let bucket = route(&message, local_identity);
        let is_from_me = message.sender == local_identity;
        self.show_if_active(&bucket, &message, is_from_me);
        self.store.append(&bucket, message, is_from_me).await;
    }

    async fn send_text(&mut self, content: &str) -> Vec<Effect> {
        let content = content.trim();
        if content.is_empty() {
            self.reject(ValidationError::EmptyMessage);
            return Vec::new();
        }
        let Some(identity) = self.session.connected_identity().map(str::to_string) else {
            self.reject(ValidationError::NotConnected);
            return Vec::new();
        };

        let message = Message::text(identity.clone(), &self.active, content, self.clock.now());
        self.record_outgoing(message, &identity).await
    }

    fn send_file(&mut self, upload: FileUpload) -> Vec<Effect> {
        let Some(identity) = self.session.connected_identity().map(str::to_string) else {
            self.reject(ValidationError::NotConnected);
            return Vec::new();
        };
        if upload.size() > self.limits.max_upload_bytes {
            self.reject(ValidationError::FileTooLarge {
                max: self.limits.max_upload_bytes,
                actual: upload.size(),
            });
            return Vec::new();
        }

        info!(file = %upload.file_name, size = upload.size(), to = %self.active, "upload: starting");
        vec![Effect::Upload {
            session: self.session.id(),
            upload,
            sender: identity,
            receiver: self.active.clone(),
        }]
    }

    async fn on_upload_finished(
        &mut self,
        session: SessionId,
        result: Result<Message, SyncError>,
    ) -> Vec<Effect> {
        if !self.session.is_current(session) {
            debug!(session = session.0, "upload: dropping result from stale session");
            return Vec::new();
        }
        match result {
            Ok(message) => match self.session.connected_identity().map(str::to_string) {
                Some(identity) => self.record_outgoing(message, &identity).await,
                None => Vec::new(),
            },
            Err(err) => {
                warn!("upload: failed: {err}");
                self.presenter
                    .on_system_notice(&format!("File upload failed: {err}"));
                Vec::new()
            }
        }
    }

    /// Locally authored send: the identity is marked displayed and the
    /// message stored before it goes out, so the push echo is a no-op.
    async fn record_outgoing(&mut self, message: Message, local_identity: &str) -> Vec<Effect> {
        let bucket = route(&message, local_identity);
        self.show_if_active(&bucket, &message, true);
        self.store.append(&bucket, message.clone(), true).await;
        vec![Effect::Publish {
            session: self.session.id(),
            destination: Destination::Message,
            message,
        }]
    }

    async fn clear_conversation(&mut self, bucket: BucketKey) -> Vec<Effect> {
        self.store.clear(&bucket).await;
        if bucket == self.active {
            self.render_fresh(&[]);
        }

        match self.session.connected_identity() {
            Some(identity) => vec![Effect::ClearRemoteHistory {
                local_identity: identity.to_string(),
                bucket,
            }],
            None => Vec::new(),
        }
    }

    fn show_if_active(&mut self, bucket: &BucketKey, message: &Message, is_from_me: bool) {
        if *bucket != self.active {
            return;
        }
        if self.displayed.insert(message.identity()) {
            self.presenter.on_render_message(message, is_from_me);
        } else {
            debug!(bucket = %bucket, "intake: suppressed already displayed message");
        }
    }

    fn render_fresh(&mut self, entries: &[StoredEntry]) {
        self.displayed.clear();
        self.presenter.on_view_reset(&self.active);
        for entry in entries {
            if self.displayed.insert(entry.identity()) {
                self.presenter
                    .on_render_message(&entry.message, entry.is_from_me);
            }
        }
        if entries.is_empty() {
            self.presenter
                .on_system_notice(&empty_conversation_hint(&self.active));
        }
    }

    fn reject(&mut self, err: ValidationError) {
        debug!("session: rejected request: {err}");
        self.presenter.on_system_notice(&err.to_string());
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
