//! Per-connection session: login handshake, message loop and teardown
//!
//! A session walks `Connected -> LoggingIn -> Active -> Terminating -> Closed`.
//! Only a decoded `Login` frame as the very first frame gets a connection
//! into the registry; every other first frame closes it straight away, with
//! no notices sent. Once active, the session relays frames until its peer
//! closes, quits, or breaks the protocol, then deregisters and tells the
//! remaining clients it left.
//!
//! Outbound traffic never touches the socket directly. The session spawns a
//! writer task that owns the write half and drains the connection's
//! `Outbox`, so the session's own replies and broadcasts from other
//! sessions are serialized on one path.

use crate::delivery::{
    broadcast_except, deliver_to, joined_notice, left_notice, not_found_notice, online_listing,
    private_identity, private_usage_notice, SERVER_FULL,
};
use crate::registry::{ConnectionHandle, Outbox, Registry, RegistryError};
use log::{debug, error, info, warn};
use shared::{read_frame, write_frame, Frame, FrameError, FrameKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a closing session waits for its outbox to reach the peer
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    LoggingIn,
    Active,
    Terminating,
    Closed,
}

/// How a session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Never joined: wrong first frame, closed during login, or refused
    LoginRejected,
    PeerClosed,
    Quit,
    /// Malformed frame or a frame type not allowed while active
    ProtocolViolation,
    /// Reading from the connection failed
    TransportError,
}

pub struct Session {
    handle: ConnectionHandle,
    peer: String,
    registry: Arc<Registry>,
    state: SessionState,
}

impl Session {
    /// Creates a session for a freshly accepted connection
    ///
    /// `peer` is only used to label log lines.
    pub fn new(handle: ConnectionHandle, peer: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            handle,
            peer: peer.into(),
            registry,
            state: SessionState::Connected,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "Session {} ({}): {:?} -> {:?}",
            self.handle, self.peer, self.state, next
        );
        self.state = next;
    }

    /// Drives the connection until it closes
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.transition(SessionState::LoggingIn);

        let identity = match read_frame(&mut reader).await {
            Ok(frame) if frame.kind() == FrameKind::Login => frame.identity().to_string(),
            Ok(frame) => {
                warn!(
                    "{} ({}) sent {:?} before logging in, closing",
                    self.handle,
                    self.peer,
                    frame.kind()
                );
                return self.reject(writer).await;
            }
            Err(e) => {
                info!("{} ({}) left during login: {}", self.handle, self.peer, e);
                return self.reject(writer).await;
            }
        };

        let (outbox, queue) = Outbox::channel();
        if let Err(e) = self
            .registry
            .insert(self.handle, &identity, outbox.clone())
            .await
        {
            warn!("Refusing login of '{}' from {}: {}", identity, self.peer, e);
            if let RegistryError::Full { .. } = e {
                if let Err(e) = write_frame(&mut writer, &Frame::system(SERVER_FULL)).await {
                    debug!("Could not notify {} of full server: {}", self.peer, e);
                }
            }
            return self.reject(writer).await;
        }

        let writer_task = spawn_writer(self.handle, writer, queue);
        self.transition(SessionState::Active);
        info!("'{}' joined from {}", identity, self.peer);
        broadcast_except(&self.registry, &joined_notice(&identity), Some(self.handle)).await;

        let end = self.message_loop(&mut reader, &identity, &outbox).await;
        drop(reader);

        self.transition(SessionState::Terminating);
        self.registry.remove(self.handle).await;
        let notified = broadcast_except(&self.registry, &left_notice(&identity), None).await;
        info!(
            "'{}' ({}) left: {:?}, notified {} client(s)",
            identity, self.peer, end, notified
        );

        // The writer stops once the last outbox clone is gone
        drop(outbox);
        self.drain_writer(writer_task).await;

        self.transition(SessionState::Closed);
        end
    }

    /// Waits for queued frames to go out, giving up on a peer that stopped reading
    async fn drain_writer(&self, mut writer_task: JoinHandle<()>) {
        match timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Writer task for {} failed: {}", self.handle, e),
            Err(_) => {
                warn!(
                    "Writer for {} ({}) still blocked after {:?}, dropping backlog",
                    self.handle, self.peer, WRITER_DRAIN_TIMEOUT
                );
                writer_task.abort();
            }
        }
    }

    async fn reject<W>(mut self, mut writer: W) -> SessionEnd
    where
        W: AsyncWrite + Unpin,
    {
        let _ = writer.shutdown().await;
        self.transition(SessionState::Closed);
        SessionEnd::LoginRejected
    }

    async fn message_loop<R>(&self, reader: &mut R, identity: &str, outbox: &Outbox) -> SessionEnd
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = match read_frame(reader).await {
                Ok(frame) => frame,
                Err(FrameError::PeerClosed) => return SessionEnd::PeerClosed,
                Err(e) if e.is_malformed() => {
                    warn!("Malformed frame from '{}' ({}): {}", identity, self.peer, e);
                    return SessionEnd::ProtocolViolation;
                }
                Err(e) => {
                    warn!("Read from '{}' ({}) failed: {}", identity, self.peer, e);
                    return SessionEnd::TransportError;
                }
            };

            match frame.kind() {
                FrameKind::Chat => {
                    debug!("Chat [{}]: {}", identity, frame.text());
                    let stamped = frame.with_identity(identity);
                    broadcast_except(&self.registry, &stamped, Some(self.handle)).await;
                }
                FrameKind::Who => {
                    let listing = online_listing(&self.registry).await;
                    self.reply(outbox, listing);
                }
                FrameKind::PrivateChat => {
                    self.relay_private(identity, frame.text(), outbox).await;
                }
                FrameKind::Quit => return SessionEnd::Quit,
                FrameKind::Login => {
                    warn!("'{}' ({}) sent a second login", identity, self.peer);
                    return SessionEnd::ProtocolViolation;
                }
            }
        }
    }

    async fn relay_private(&self, sender: &str, text: &str, outbox: &Outbox) {
        let Some((target, message)) = parse_private(text) else {
            self.reply(outbox, private_usage_notice());
            return;
        };

        let delivered = match self.registry.find_by_identity(target).await {
            Some(handle) => {
                let frame = Frame::chat(&private_identity(sender), message);
                match deliver_to(&self.registry, frame, handle).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Private message from '{}' to '{}' failed: {}", sender, target, e);
                        false
                    }
                }
            }
            None => false,
        };

        if delivered {
            debug!("Private [{} -> {}]: {}", sender, target, message);
        } else {
            self.reply(outbox, not_found_notice(target));
        }
    }

    fn reply(&self, outbox: &Outbox, frame: Frame) {
        if outbox.send(frame).is_err() {
            warn!("Reply to {} ({}) dropped: writer closed", self.handle, self.peer);
        }
    }
}

/// Splits private-chat text into target identity and message
///
/// The target is the first whitespace-delimited token; the message is the
/// rest of the line. Returns `None` when either part is missing.
pub fn parse_private(text: &str) -> Option<(&str, &str)> {
    let (target, rest) = text.trim_start().split_once(char::is_whitespace)?;
    let message = rest.trim_start().trim_end_matches(['\r', '\n']);
    if message.trim().is_empty() {
        return None;
    }
    Some((target, message))
}

/// Spawns the task that owns a connection's write half
fn spawn_writer<W>(
    handle: ConnectionHandle,
    mut writer: W,
    mut queue: UnboundedReceiver<Frame>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!("Write to {} failed: {}", handle, e);
                return;
            }
        }
        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::WHO_HEADER;
    use shared::{FRAME_SIZE, SYSTEM_IDENTITY};
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream};
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(2);

    fn connect(registry: &Arc<Registry>) -> (DuplexStream, JoinHandle<SessionEnd>) {
        connect_buffered(registry, FRAME_SIZE * 16)
    }

    fn connect_buffered(
        registry: &Arc<Registry>,
        buffer: usize,
    ) -> (DuplexStream, JoinHandle<SessionEnd>) {
        let (client, server) = duplex(buffer);
        let (reader, writer) = split(server);
        let session = Session::new(registry.allocate_handle(), "test-peer", Arc::clone(registry));
        (client, tokio::spawn(session.run(reader, writer)))
    }

    async fn wait_for_len(registry: &Registry, expected: usize) {
        timeout(WAIT, async {
            while registry.len().await != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }

    async fn login(registry: &Arc<Registry>, name: &str) -> (DuplexStream, JoinHandle<SessionEnd>) {
        let before = registry.len().await;
        let (mut client, task) = connect(registry);
        write_frame(&mut client, &Frame::login(name)).await.unwrap();
        wait_for_len(registry, before + 1).await;
        (client, task)
    }

    async fn next_frame(client: &mut DuplexStream) -> Frame {
        timeout(WAIT, read_frame(client))
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
    }

    async fn send(client: &mut DuplexStream, frame: Frame) {
        write_frame(client, &frame).await.unwrap();
    }

    async fn who(client: &mut DuplexStream) -> Vec<String> {
        send(client, Frame::who("")).await;
        let listing = next_frame(client).await;
        assert_eq!(listing.identity(), SYSTEM_IDENTITY);

        let mut lines = listing.text().lines();
        assert_eq!(lines.next(), Some(WHO_HEADER));
        let mut names: Vec<String> = lines.map(str::to_string).collect();
        names.sort();
        names
    }

    async fn finish(task: JoinHandle<SessionEnd>) -> SessionEnd {
        timeout(WAIT, task)
            .await
            .expect("session did not end")
            .expect("session panicked")
    }

    #[test]
    fn test_new_session_state() {
        let registry = Arc::new(Registry::new());
        let handle = registry.allocate_handle();
        let session = Session::new(handle, "peer", registry);

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.handle(), handle);
    }

    #[test]
    fn test_parse_private() {
        assert_eq!(parse_private("bob hello"), Some(("bob", "hello")));
        assert_eq!(
            parse_private("  bob   hello there \n"),
            Some(("bob", "hello there "))
        );
        assert_eq!(parse_private("bob"), None);
        assert_eq!(parse_private("bob   "), None);
        assert_eq!(parse_private(""), None);
    }

    #[tokio::test]
    async fn test_join_notice_goes_to_others_only() {
        let registry = Arc::new(Registry::new());
        let (mut alice, _a) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;

        let notice = next_frame(&mut alice).await;
        assert_eq!(notice.kind(), FrameKind::Chat);
        assert_eq!(notice.identity(), SYSTEM_IDENTITY);
        assert_eq!(notice.text(), "bob joined the chat");

        // bob's first frame is his own who reply, not a notice about himself
        assert_eq!(who(&mut bob).await, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_chat_is_stamped_and_not_echoed() {
        let registry = Arc::new(Registry::new());
        let (mut alice, _a) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;
        let (mut carol, _c) = login(&registry, "carol").await;
        next_frame(&mut alice).await;
        next_frame(&mut alice).await;
        next_frame(&mut bob).await;

        send(&mut alice, Frame::chat("mallory", "hello")).await;

        for peer in [&mut bob, &mut carol] {
            let frame = next_frame(peer).await;
            assert_eq!(frame.kind(), FrameKind::Chat);
            assert_eq!(frame.identity(), "alice");
            assert_eq!(frame.text(), "hello");
        }
        assert_eq!(who(&mut alice).await, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_private_chat_reaches_target_only() {
        let registry = Arc::new(Registry::new());
        let (mut alice, _a) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;
        let (mut carol, _c) = login(&registry, "carol").await;
        next_frame(&mut alice).await;
        next_frame(&mut alice).await;
        next_frame(&mut bob).await;

        send(&mut alice, Frame::private_chat("alice", "bob", "hello")).await;

        let frame = next_frame(&mut bob).await;
        assert_eq!(frame.kind(), FrameKind::Chat);
        assert_eq!(frame.identity(), "alice (private)");
        assert_eq!(frame.text(), "hello");

        assert_eq!(who(&mut carol).await, vec!["alice", "bob", "carol"]);
        assert_eq!(who(&mut alice).await, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_private_chat_unknown_target() {
        let registry = Arc::new(Registry::new());
        let (mut alice, _a) = login(&registry, "alice").await;

        send(&mut alice, Frame::private_chat("alice", "dave", "hi")).await;

        let notice = next_frame(&mut alice).await;
        assert_eq!(notice.identity(), SYSTEM_IDENTITY);
        assert!(notice.text().contains("dave"));
    }

    #[tokio::test]
    async fn test_private_chat_without_message() {
        let registry = Arc::new(Registry::new());
        let (mut alice, _a) = login(&registry, "alice").await;

        send(&mut alice, Frame::new(FrameKind::PrivateChat, "alice", "bob")).await;

        let notice = next_frame(&mut alice).await;
        assert_eq!(notice.identity(), SYSTEM_IDENTITY);
        assert!(notice.text().starts_with("Usage"));
    }

    #[tokio::test]
    async fn test_disconnect_deregisters_and_notifies_once() {
        let registry = Arc::new(Registry::new());
        let (alice, alice_task) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;
        let (mut carol, _c) = login(&registry, "carol").await;
        next_frame(&mut bob).await;

        drop(alice);
        assert_eq!(finish(alice_task).await, SessionEnd::PeerClosed);

        for peer in [&mut bob, &mut carol] {
            let notice = next_frame(peer).await;
            assert_eq!(notice.identity(), SYSTEM_IDENTITY);
            assert_eq!(notice.text(), "alice left the chat");
            assert_eq!(who(peer).await, vec!["bob", "carol"]);
        }
    }

    #[tokio::test]
    async fn test_quit_ends_session() {
        let registry = Arc::new(Registry::new());
        let (mut alice, alice_task) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;
        next_frame(&mut alice).await;

        send(&mut alice, Frame::quit("alice")).await;
        assert_eq!(finish(alice_task).await, SessionEnd::Quit);

        assert_eq!(next_frame(&mut bob).await.text(), "alice left the chat");
        assert!(read_frame(&mut alice).await.unwrap_err().is_peer_closed());
        assert!(registry.find_by_identity("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_quit_with_unread_backlog_still_closes() {
        let registry = Arc::new(Registry::new());
        let (mut alice, task) = connect_buffered(&registry, FRAME_SIZE * 2);
        send(&mut alice, Frame::login("alice")).await;
        wait_for_len(&registry, 1).await;

        // More than the connection can buffer, and alice never reads any of it
        for n in 0..10 {
            let notice = Frame::system(&format!("notice {}", n));
            broadcast_except(&registry, &notice, None).await;
        }

        send(&mut alice, Frame::quit("alice")).await;

        assert_eq!(finish(task).await, SessionEnd::Quit);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_login_first_frame_is_rejected() {
        let registry = Arc::new(Registry::new());
        let (mut bob, _b) = login(&registry, "bob").await;

        let (mut intruder, task) = connect(&registry);
        send(&mut intruder, Frame::chat("eve", "let me in")).await;

        assert_eq!(finish(task).await, SessionEnd::LoginRejected);
        assert!(read_frame(&mut intruder).await.unwrap_err().is_peer_closed());
        assert_eq!(who(&mut bob).await, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_scripted_login_and_quit() {
        let registry = Arc::new(Registry::new());
        let login = Frame::login("solo").encode();
        let quit = Frame::quit("solo").encode();

        let reader = tokio_test::io::Builder::new()
            .read(&login[..100])
            .read(&login[100..])
            .read(&quit)
            .build();

        let session = Session::new(registry.allocate_handle(), "scripted", Arc::clone(&registry));
        let end = session.run(reader, tokio::io::sink()).await;

        assert_eq!(end, SessionEnd::Quit);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_during_login() {
        let registry = Arc::new(Registry::new());
        let (client, task) = connect(&registry);
        drop(client);

        assert_eq!(finish(task).await, SessionEnd::LoginRejected);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_login_is_protocol_violation() {
        let registry = Arc::new(Registry::new());
        let (mut alice, task) = login(&registry, "alice").await;

        send(&mut alice, Frame::login("alice-again")).await;

        assert_eq!(finish(task).await, SessionEnd::ProtocolViolation);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_session() {
        let registry = Arc::new(Registry::new());
        let (mut alice, task) = login(&registry, "alice").await;
        let (mut bob, _b) = login(&registry, "bob").await;
        next_frame(&mut alice).await;

        let mut garbage = Frame::chat("alice", "hi").encode();
        garbage[0] = b'#';
        alice.write_all(&garbage).await.unwrap();

        assert_eq!(finish(task).await, SessionEnd::ProtocolViolation);
        assert_eq!(next_frame(&mut bob).await.text(), "alice left the chat");
    }

    #[tokio::test]
    async fn test_login_refused_when_full() {
        let registry = Arc::new(Registry::with_max_clients(1));
        let (_alice, _a) = login(&registry, "alice").await;

        let (mut bob, task) = connect(&registry);
        send(&mut bob, Frame::login("bob")).await;

        let notice = next_frame(&mut bob).await;
        assert_eq!(notice.text(), SERVER_FULL);
        assert_eq!(finish(task).await, SessionEnd::LoginRejected);
        assert_eq!(registry.identities().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_duplicate_identities_both_join() {
        let registry = Arc::new(Registry::new());
        let (mut first, _f) = login(&registry, "sam").await;
        let (_second, _s) = login(&registry, "sam").await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(next_frame(&mut first).await.text(), "sam joined the chat");
        assert_eq!(who(&mut first).await, vec!["sam", "sam"]);
    }
}
