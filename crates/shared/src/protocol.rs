use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Receiver value meaning "all participants" on the wire.
pub const BROADCAST_SENTINEL: &str = "所有人";

pub type Roster = BTreeSet<String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Broadcast,
    Private { identity: String },
    Roster,
}

impl Channel {
    pub fn path(&self) -> &'static str {
        match self {
            Channel::Broadcast => "/topic/public",
            // The server resolves the per-user queue from the session.
            Channel::Private { .. } => "/user/queue/private",
            Channel::Roster => "/topic/online-users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Join,
    Leave,
    Message,
}

impl Destination {
    pub fn path(self) -> &'static str {
        match self {
            Destination::Join => "/app/chat.join",
            Destination::Leave => "/app/chat.leave",
            Destination::Message => "/app/chat.message",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub user1: String,
    pub user2: String,
}

/// Timestamps are written as RFC 3339 UTC. On read, naive local date-times
/// (the form the server emits) are taken as UTC.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|err| format!("invalid timestamp '{raw}': {err}"))
    }
}

pub mod nullable_text {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
