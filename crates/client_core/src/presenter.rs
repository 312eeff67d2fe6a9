use shared::{
    domain::{BucketKey, Message},
    protocol::Roster,
};
use tokio::sync::broadcast;

use crate::session::SessionState;

pub trait Presenter: Send {
    fn on_render_message(&mut self, message: &Message, is_from_me: bool);
    fn on_system_notice(&mut self, text: &str);
    fn on_roster_changed(&mut self, roster: &Roster);
    fn on_view_reset(&mut self, bucket: &BucketKey);
    fn on_session_state(&mut self, _state: SessionState) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageRendered { message: Message, is_from_me: bool },
    SystemNotice(String),
    RosterChanged(Roster),
    ViewReset(BucketKey),
    SessionStateChanged(SessionState),
}

#[derive(Clone)]
pub struct BroadcastPresenter {
    events: broadcast::Sender<ClientEvent>,
}

impl BroadcastPresenter {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine; nothing is watching the view.
        let _ = self.events.send(event);
    }
}

impl Presenter for BroadcastPresenter {
    fn on_render_message(&mut self, message: &Message, is_from_me: bool) {
        self.emit(ClientEvent::MessageRendered {
            message: message.clone(),
            is_from_me,
        });
    }

    fn on_system_notice(&mut self, text: &str) {
        self.emit(ClientEvent::SystemNotice(text.to_string()));
    }

    fn on_roster_changed(&mut self, roster: &Roster) {
        self.emit(ClientEvent::RosterChanged(roster.clone()));
    }

    fn on_view_reset(&mut self, bucket: &BucketKey) {
        self.emit(ClientEvent::ViewReset(bucket.clone()));
    }

    fn on_session_state(&mut self, state: SessionState) {
        self.emit(ClientEvent::SessionStateChanged(state));
    }
}

pub(crate) fn empty_conversation_hint(bucket: &BucketKey) -> String {
    match bucket {
        BucketKey::Broadcast => {
            "This is the group chat; messages sent here are seen by everyone online.".to_string()
        }
        BucketKey::Peer(peer) => format!("Starting a private chat with {peer}."),
    }
}

pub(crate) fn presence_notice(message: &Message) -> String {
    if !message.content.trim().is_empty() {
        return message.content.clone();
    }
    match message.kind {
        shared::domain::MessageKind::Leave => format!("{} left the chat", message.sender),
        _ => format!("{} joined the chat", message.sender),
    }
}
