use clap::Parser;
use log::{error, info};
use server::network::{ChatServer, ServerConfig};
use shared::DEFAULT_PORT;
use tokio::io::BufReader;

/// Starts the chat relay.
/// Parses command-line arguments, binds the listener and runs the accept loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Maximum number of logged-in clients (unlimited if omitted)
        #[clap(short, long)]
        max_clients: Option<usize>,
        /// Do not read operator broadcasts from standard input
        #[clap(long)]
        no_operator: bool,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
    };

    let server = ChatServer::bind(&config).await?;

    if !args.no_operator {
        let operator = server.operator();
        tokio::spawn(async move {
            operator.run(BufReader::new(tokio::io::stdin())).await;
        });
        info!("Type a line and press Enter to broadcast it to all clients");
    }

    // Handle shutdown gracefully
    tokio::select! {
        _ = server.run() => {
            error!("Accept loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}
