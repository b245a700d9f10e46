//! # Parley Client
//!
//! ```bash
//! parley-client localhost:8080 --username alice
//! ```
//!
//! Type `bob:hello` to message bob. A line without a colon is echoed back
//! to you.

mod input;
mod session;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parley_protocol::validate_username;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the server, e.g. `localhost:8080`.
    server: String,

    /// Username to join as. Prompted for when absent.
    #[arg(long)]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut stdin = BufReader::new(tokio::io::stdin());

    let username = match cli.username {
        Some(name) => {
            validate_username(&name).with_context(|| format!("Invalid username {name:?}"))?;
            name
        }
        None => prompt_username(&mut stdin).await?,
    };

    let (source, sink) = session::join(&cli.server, &username).await?;
    println!("Joined {} as {}", cli.server, username);

    session::chat(&username, source, sink, stdin).await
}

/// Ask until a valid username is entered.
async fn prompt_username<R>(input: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        print!("Username: ");
        std::io::stdout().flush()?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            bail!("Input closed before a username was entered");
        }

        let name = line.trim();
        match validate_username(name) {
            Ok(()) => return Ok(name.to_string()),
            Err(e) => println!("{e}"),
        }
    }
}
