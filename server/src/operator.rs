//! Operator console: lines typed on the server's input become system broadcasts

use crate::delivery::broadcast_except;
use crate::registry::Registry;
use log::{info, warn};
use shared::Frame;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub struct OperatorChannel {
    registry: Arc<Registry>,
}

impl OperatorChannel {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Broadcasts each non-blank input line to every connected client
    ///
    /// Runs until the input reaches end-of-file or fails to read. Client
    /// sessions are unaffected either way. Returns the number of lines
    /// broadcast.
    pub async fn run<R>(self, input: R) -> usize
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut sent = 0;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Operator input failed: {}", e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let reached = broadcast_except(&self.registry, &Frame::system(&line), None).await;
            info!("Operator broadcast to {} client(s): {}", reached, line);
            sent += 1;
        }

        info!("Operator input closed after {} broadcast(s)", sent);
        sent
    }
}
