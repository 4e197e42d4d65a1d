//! Server network layer: TCP listener and per-connection session spawning

use crate::operator::OperatorChannel;
use crate::registry::Registry;
use crate::session::Session;
use log::{debug, error, info};
use shared::DEFAULT_PORT;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Listener settings collected from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Registered-client limit; `None` accepts everyone
    pub max_clients: Option<usize>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: None,
        }
    }
}

/// Accepts connections and runs one session task per client
pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl ChatServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let registry = match config.max_clients {
            Some(max) => {
                info!("Accepting at most {} client(s)", max);
                Registry::with_max_clients(max)
            }
            None => Registry::new(),
        };

        Ok(ChatServer {
            listener,
            registry: Arc::new(registry),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Operator console broadcasting into this server's registry
    pub fn operator(&self) -> OperatorChannel {
        OperatorChannel::new(self.registry())
    }

    /// Runs the accept loop forever
    ///
    /// A failed accept is logged and retried; it never stops the loop or
    /// touches existing sessions.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => self.spawn_session(stream, addr),
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        let handle = self.registry.allocate_handle();
        debug!("Accepted {} as {}", addr, handle);

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        let session = Session::new(handle, addr.to_string(), self.registry());
        let (reader, writer) = stream.into_split();

        tokio::spawn(async move {
            let end = session.run(reader, writer).await;
            debug!("Connection {} ({}) closed: {:?}", handle, addr, end);
        });
    }
}
