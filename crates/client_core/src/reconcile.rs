use std::collections::HashSet;

use shared::{
    domain::{BucketKey, Message},
    identity::MessageIdentity,
};
use storage::StoredEntry;

use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub session: SessionId,
    pub local_identity: String,
    pub bucket: BucketKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub entries: Vec<StoredEntry>,
    pub added_from_server: usize,
}

/// Local entries first, then server messages whose identity is not known yet,
/// then a stable sort by timestamp so equal timestamps keep that order.
pub fn merge_histories(
    local: Vec<StoredEntry>,
    server: Vec<Message>,
    local_identity: &str,
) -> Reconciliation {
    let mut seen: HashSet<MessageIdentity> = HashSet::with_capacity(local.len() + server.len());
    let mut entries = Vec::with_capacity(local.len() + server.len());

    for entry in local {
        if seen.insert(entry.identity()) {
            entries.push(entry);
        }
    }

    let mut added_from_server = 0;
    for message in server {
        if seen.insert(message.identity()) {
            let is_from_me = message.sender == local_identity;
            entries.push(StoredEntry::new(message, is_from_me));
            added_from_server += 1;
        }
    }

    entries.sort_by_key(|entry| entry.message.timestamp);

    Reconciliation {
        entries,
        added_from_server,
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
