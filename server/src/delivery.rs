//! Broadcast and directed delivery over registry snapshots
//!
//! These routines hold no state of their own. Each one reads the registry
//! once, releases the lock, and then hands frames to recipients' outboxes.
//! A recipient whose writer has stopped is skipped and logged; it never
//! affects other recipients or the session that triggered the delivery.

use crate::registry::{ConnectionHandle, Registry};
use log::{debug, warn};
use shared::{Frame, MAX_TEXT_LEN};
use thiserror::Error;

/// First line of every online-users listing
pub const WHO_HEADER: &str = "--- Online Users ---";

/// Sent to a client that logs in while the server is at capacity
pub const SERVER_FULL: &str = "Server full";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionHandle),

    #[error("connection {0} is no longer accepting frames")]
    RecipientGone(ConnectionHandle),
}

/// Sends `frame` to every registered client except `exclude`
///
/// Returns how many recipients accepted the frame.
pub async fn broadcast_except(
    registry: &Registry,
    frame: &Frame,
    exclude: Option<ConnectionHandle>,
) -> usize {
    let recipients = registry.snapshot().await;
    let mut delivered = 0;

    for client in recipients {
        if Some(client.handle) == exclude {
            continue;
        }
        match client.outbox.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => warn!(
                "Dropped broadcast to '{}' on {}: writer closed",
                client.identity, client.handle
            ),
        }
    }

    debug!(
        "Broadcast from '{}' reached {} client(s)",
        frame.identity(),
        delivered
    );
    delivered
}

/// Sends `frame` to exactly one registered connection
pub async fn deliver_to(
    registry: &Registry,
    frame: Frame,
    target: ConnectionHandle,
) -> Result<(), DeliveryError> {
    let client = registry
        .get(target)
        .await
        .ok_or(DeliveryError::NotRegistered(target))?;

    client
        .outbox
        .send(frame)
        .map_err(|_| DeliveryError::RecipientGone(target))
}

/// Builds the reply to a who request
///
/// One identity per line under `WHO_HEADER`. Identities that would push the
/// text past the field width are left out.
pub async fn online_listing(registry: &Registry) -> Frame {
    let mut text = format!("{}\n", WHO_HEADER);

    for identity in registry.identities().await {
        if text.len() + identity.len() + 1 <= MAX_TEXT_LEN {
            text.push_str(&identity);
            text.push('\n');
        }
    }

    Frame::system(&text)
}

pub fn joined_notice(identity: &str) -> Frame {
    Frame::system(&format!("{} joined the chat", identity))
}

pub fn left_notice(identity: &str) -> Frame {
    Frame::system(&format!("{} left the chat", identity))
}

pub fn not_found_notice(target: &str) -> Frame {
    Frame::system(&format!("User '{}' not found or offline", target))
}

pub fn private_usage_notice() -> Frame {
    Frame::system("Usage: <user> <message>")
}

/// Identity shown to the recipient of a private message
pub fn private_identity(sender: &str) -> String {
    format!("{} (private)", sender)
}
