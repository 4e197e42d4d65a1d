use crate::input::{format_frame, parse_line, Command};
use log::{debug, info, warn};
use shared::{bounded, read_frame, write_frame, Frame, FrameError, MAX_IDENTITY_LEN};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("receive task failed: {0}")]
    Task(#[from] JoinError),
}

/// Why `ChatClient::run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The user typed `quit`
    Quit,
    /// Input reached end-of-file
    InputClosed,
    /// The server closed the connection
    ServerClosed,
}

pub struct ChatClient {
    identity: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ChatClient {
    /// Connects to `server` and logs in as `identity`
    pub async fn connect(server: &str, identity: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();

        let identity = bounded(identity, MAX_IDENTITY_LEN);
        write_frame(&mut writer, &Frame::login(&identity)).await?;
        info!("Logged in to {} as '{}'", server, identity);

        Ok(ChatClient {
            identity,
            reader,
            writer,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Relays `input` lines to the server and server frames to `output`
    ///
    /// Frames are printed one per line as `<identity>: <text>`. Returns when
    /// the user quits, input ends, or the server goes away. In the first two
    /// cases a quit frame is sent before the connection is closed.
    pub async fn run<I, O>(self, input: I, output: O) -> Result<ClientExit, ClientError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let ChatClient {
            identity,
            reader,
            mut writer,
        } = self;

        let mut receiver = tokio::spawn(receive_loop(reader, output));
        let mut lines = input.lines();

        let exit = loop {
            tokio::select! {
                result = &mut receiver => {
                    result??;
                    info!("Server closed the connection");
                    return Ok(ClientExit::ServerClosed);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break ClientExit::InputClosed;
                    };

                    match parse_line(&line) {
                        Command::Quit => break ClientExit::Quit,
                        Command::Nothing => {}
                        Command::Invalid(usage) => eprintln!("{}", usage),
                        command => {
                            if let Some(frame) = command.into_frame(&identity) {
                                write_frame(&mut writer, &frame).await?;
                            }
                        }
                    }
                }
            }
        };

        debug!("Leaving chat: {:?}", exit);
        write_frame(&mut writer, &Frame::quit(&identity)).await?;
        receiver.abort();
        let _ = writer.shutdown().await;

        Ok(exit)
    }
}

/// Prints every frame from the server until it closes the connection
async fn receive_loop<O>(mut reader: OwnedReadHalf, mut output: O) -> Result<(), ClientError>
where
    O: AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(FrameError::PeerClosed) => return Ok(()),
            Err(e) => {
                warn!("Receive failed: {}", e);
                return Err(e.into());
            }
        };

        let line = format!("{}\n", format_frame(&frame));
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
}
