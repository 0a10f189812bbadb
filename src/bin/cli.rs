//! kvplug CLI Client
//!
//! Sends one batch request to a kvplug server and prints the reply.

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use kvplug::client::KvClient;
use kvplug::item::{format_timestamp, parse_timestamp, Item};

/// kvplug CLI
#[derive(Parser, Debug)]
#[command(name = "kvplug-cli")]
#[command(about = "CLI for the kvplug batch RPC")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6001")]
    server: String,

    /// Storage instance to address
    #[arg(long, default_value = "memory")]
    storage: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value
    Set {
        key: String,
        value: String,

        /// Expire after this many seconds
        #[arg(long, conflicts_with = "at")]
        ttl: Option<u64>,

        /// Expire at this RFC 3339 instant
        #[arg(long)]
        at: Option<String>,
    },

    /// Print the keys that exist
    Has { keys: Vec<String> },

    /// Print values
    Mget { keys: Vec<String> },

    /// Give keys an expiry
    Expire {
        keys: Vec<String>,

        #[arg(long)]
        ttl: u64,
    },

    /// Print remaining time to live
    Ttl { keys: Vec<String> },

    /// Remove keys
    Delete { keys: Vec<String> },

    /// Remove every key of the storage
    Clear,
}

fn expiry_in(secs: u64) -> anyhow::Result<chrono::DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(secs as i64).context("ttl out of range")?;
    Ok(Utc::now() + delta)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let storage = args.storage.as_str();

    let mut client = KvClient::connect(&args.server)
        .await
        .with_context(|| format!("Failed to connect to {}", args.server))?;

    match args.command {
        Commands::Set { key, value, ttl, at } => {
            let expires_at = match (ttl, at) {
                (Some(secs), _) => Some(expiry_in(secs)?),
                (None, Some(at)) => Some(parse_timestamp(&key, &at)?),
                (None, None) => None,
            };
            let mut item = Item::new(key, value);
            if let Some(at) = expires_at {
                item = item.expires_at(at);
            }
            client.set(storage, vec![item]).await?;
            println!("OK");
        }
        Commands::Has { keys } => {
            for key in client.has(storage, keys).await? {
                println!("{}", key);
            }
        }
        Commands::Mget { keys } => {
            for (key, value) in client.mget(storage, keys).await? {
                println!("{} = {}", key, String::from_utf8_lossy(&value));
            }
        }
        Commands::Expire { keys, ttl } => {
            let at = expiry_in(ttl)?;
            client.mexpire(storage, keys, at).await?;
            println!("OK (expires {})", format_timestamp(at));
        }
        Commands::Ttl { keys } => {
            for (key, remaining) in client.ttl(storage, keys).await? {
                println!("{} {}s", key, remaining.as_secs());
            }
        }
        Commands::Delete { keys } => {
            client.delete(storage, keys).await?;
            println!("OK");
        }
        Commands::Clear => {
            client.clear(storage).await?;
            println!("OK");
        }
    }

    Ok(())
}
