use shared::{error::ValidationError, protocol::BROADCAST_SENTINEL};

/// Tags one connect attempt. Completions carrying an older id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    id: SessionId,
    identity: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            id: SessionId::default(),
            identity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.state != SessionState::Disconnected && self.id == id
    }

    pub fn connected_identity(&self) -> Option<&str> {
        if self.is_connected() {
            self.identity.as_deref()
        } else {
            None
        }
    }

    pub fn begin_connect(
        &mut self,
        raw_identity: &str,
        max_identity_len: usize,
    ) -> Result<SessionId, ValidationError> {
        if self.state != SessionState::Disconnected {
            return Err(ValidationError::AlreadyConnected);
        }
        let identity = validate_identity(raw_identity, max_identity_len)?;

        self.id = SessionId(self.id.0 + 1);
        self.state = SessionState::Connecting;
        self.identity = Some(identity);
        Ok(self.id)
    }

    pub fn acknowledge(&mut self, id: SessionId) -> bool {
        if self.state == SessionState::Connecting && self.id == id {
            self.state = SessionState::Connected;
            true
        } else {
            false
        }
    }

    pub fn end(&mut self) -> Option<(SessionState, String)> {
        if self.state == SessionState::Disconnected {
            return None;
        }
        let previous = self.state;
        self.state = SessionState::Disconnected;
        let identity = self.identity.take().unwrap_or_default();
        Some((previous, identity))
    }

    pub fn fail(&mut self, id: SessionId) -> Option<(SessionState, String)> {
        if self.is_current(id) {
            self.end()
        } else {
            None
        }
    }
}

pub fn validate_identity(raw: &str, max_len: usize) -> Result<String, ValidationError> {
    let identity = raw.trim();
    if identity.is_empty() {
        return Err(ValidationError::EmptyIdentity);
    }
    let actual = identity.chars().count();
    if actual > max_len {
        return Err(ValidationError::IdentityTooLong {
            max: max_len,
            actual,
        });
    }
    if identity == BROADCAST_SENTINEL {
        return Err(ValidationError::ReservedIdentity(identity.to_string()));
    }
    Ok(identity.to_string())
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
