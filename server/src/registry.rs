//! Registry of logged-in clients shared by every session
//!
//! This module owns the only piece of mutable state the sessions share:
//! - Connection handle allocation for accepted sockets
//! - The roster of logged-in clients, kept in login order
//! - Identity lookup for private messages
//! - Snapshots used by the delivery routines
//!
//! Every operation takes the roster lock for the duration of one map access
//! and releases it before returning. Nothing here performs network I/O, so
//! callers can send to a snapshot without blocking other sessions.

use log::{debug, info};
use shared::Frame;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Identifies one accepted connection for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Sending side of a connection's outbound frame queue
///
/// Each registered connection has a single writer task draining the queue,
/// so frames pushed here by any number of sessions reach the socket one at
/// a time and in push order.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Creates an outbox and the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a frame; hands it back if the writer has stopped
    pub fn send(&self, frame: Frame) -> Result<(), Frame> {
        self.tx.send(frame).map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A logged-in client as seen by other sessions
#[derive(Debug, Clone)]
pub struct Client {
    /// Connection the client logged in on
    pub handle: ConnectionHandle,
    /// Name chosen at login; not unique across clients
    pub identity: String,
    /// Queue feeding the client's socket
    pub outbox: Outbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateHandle(ConnectionHandle),

    #[error("server full ({max_clients} clients)")]
    Full { max_clients: usize },
}

/// Roster contents guarded by the registry lock
#[derive(Default)]
struct Roster {
    /// Clients keyed by login sequence number
    clients: BTreeMap<u64, Client>,
    /// Login sequence number of each registered handle
    positions: HashMap<ConnectionHandle, u64>,
    next_position: u64,
}

/// Shared collection of logged-in clients
///
/// Constructed once at startup and handed to every session and to the
/// operator channel behind an `Arc`. Identities are not required to be
/// unique: two connections may log in under the same name, in which case
/// lookups resolve to whichever logged in first.
pub struct Registry {
    roster: Mutex<Roster>,
    next_handle: AtomicU64,
    max_clients: Option<usize>,
}

impl Registry {
    /// Creates an empty registry with no capacity limit
    pub fn new() -> Self {
        Self {
            roster: Mutex::new(Roster::default()),
            next_handle: AtomicU64::new(1),
            max_clients: None,
        }
    }

    /// Creates an empty registry that refuses logins beyond `max_clients`
    pub fn with_max_clients(max_clients: usize) -> Self {
        Self {
            max_clients: Some(max_clients),
            ..Self::new()
        }
    }

    pub fn max_clients(&self) -> Option<usize> {
        self.max_clients
    }

    /// Hands out a fresh handle for a newly accepted connection
    ///
    /// Handles are never reused during the lifetime of the registry.
    pub fn allocate_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a client at the end of the roster
    ///
    /// Fails without modifying the roster if the handle is already present
    /// or the capacity limit has been reached.
    pub async fn insert(
        &self,
        handle: ConnectionHandle,
        identity: &str,
        outbox: Outbox,
    ) -> Result<(), RegistryError> {
        let mut roster = self.roster.lock().await;

        if roster.positions.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        if let Some(max_clients) = self.max_clients {
            if roster.clients.len() >= max_clients {
                return Err(RegistryError::Full { max_clients });
            }
        }

        let position = roster.next_position;
        roster.next_position += 1;
        roster.positions.insert(handle, position);
        roster.clients.insert(
            position,
            Client {
                handle,
                identity: identity.to_string(),
                outbox,
            },
        );

        info!(
            "Registered '{}' on {} ({} online)",
            identity,
            handle,
            roster.clients.len()
        );
        Ok(())
    }

    /// Removes the client registered on `handle`, if any
    ///
    /// Safe to call more than once; later calls return `None`.
    pub async fn remove(&self, handle: ConnectionHandle) -> Option<Client> {
        let mut roster = self.roster.lock().await;
        let position = roster.positions.remove(&handle)?;
        let client = roster.clients.remove(&position);

        if let Some(client) = &client {
            info!(
                "Deregistered '{}' on {} ({} online)",
                client.identity,
                handle,
                roster.clients.len()
            );
        }
        client
    }

    pub async fn get(&self, handle: ConnectionHandle) -> Option<Client> {
        let roster = self.roster.lock().await;
        let position = roster.positions.get(&handle)?;
        roster.clients.get(position).cloned()
    }

    /// Finds the earliest-registered client using `identity`
    pub async fn find_by_identity(&self, identity: &str) -> Option<ConnectionHandle> {
        let roster = self.roster.lock().await;
        let found = roster
            .clients
            .values()
            .find(|client| client.identity == identity)
            .map(|client| client.handle);

        debug!("Lookup of '{}' resolved to {:?}", identity, found);
        found
    }

    /// Copies the roster in login order
    ///
    /// The copy is detached from the registry, so it can be traversed (and
    /// sent to) after the lock has been released.
    pub async fn snapshot(&self) -> Vec<Client> {
        let roster = self.roster.lock().await;
        roster.clients.values().cloned().collect()
    }

    /// Identities of all registered clients in login order
    pub async fn identities(&self) -> Vec<String> {
        let roster = self.roster.lock().await;
        roster
            .clients
            .values()
            .map(|client| client.identity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.roster.lock().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.roster.lock().await.clients.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
