use shared::domain::{BucketKey, Message};

/// Picks the conversation bucket for `message` from the local user's side.
///
/// Broadcast always wins, even for the local user's own sends. Otherwise an
/// outgoing private message belongs to the addressed peer and an incoming one
/// to its sender. The result depends only on the message and the identity,
/// never on which channel delivered it.
pub fn route(message: &Message, local_identity: &str) -> BucketKey {
    match message.addressed_bucket() {
        BucketKey::Broadcast => BucketKey::Broadcast,
        addressed if message.sender == local_identity => addressed,
        _ => BucketKey::Peer(message.sender.clone()),
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
