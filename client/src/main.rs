use clap::Parser;
use client::network::{ChatClient, ClientExit};
use log::info;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8888")]
    server: String,

    /// Name to log in with (asked for if omitted)
    #[arg(short = 'n', long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut input = BufReader::new(tokio::io::stdin());

    let name = match args.name {
        Some(name) => name,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(b"Enter your name: ").await?;
            stdout.flush().await?;

            let mut name = String::new();
            input.read_line(&mut name).await?;
            name
        }
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("a name is required to join the chat".into());
    }

    info!("Connecting to: {}", args.server);
    let client = ChatClient::connect(&args.server, name).await?;
    println!("Connected as '{}'. Commands: \\who, \\msg <user> <message>, quit", client.identity());

    match client.run(input, tokio::io::stdout()).await? {
        ClientExit::ServerClosed => println!("Server closed the connection"),
        ClientExit::Quit | ClientExit::InputClosed => println!("Bye"),
    }

    Ok(())
}
