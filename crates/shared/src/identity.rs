use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageIdentity {
    sender: String,
    timestamp: DateTime<Utc>,
    content: String,
}

impl MessageIdentity {
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

pub fn identity(sender: &str, timestamp: DateTime<Utc>, content: &str) -> MessageIdentity {
    MessageIdentity {
        sender: sender.to_string(),
        timestamp,
        content: content.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
