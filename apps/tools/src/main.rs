use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    engine::DEFAULT_MAX_IDENTITY_LEN, merge_histories, session::validate_identity, ChatServerApi,
    HttpChatServer,
};
use shared::domain::BucketKey;
use storage::{prepare_database_url, HistoryStore, SqliteSnapshotStore, StoredEntry};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

/// Inspect and maintain the locally persisted chat history.
#[derive(Parser, Debug)]
#[command(name = "chat-history")]
struct Cli {
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    history_capacity: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    /// Peer whose private conversation to use.
    peer: Option<String>,
    /// Use the group conversation instead of a peer.
    #[arg(long)]
    broadcast: bool,
}

impl Target {
    fn bucket(&self) -> BucketKey {
        if self.broadcast {
            BucketKey::Broadcast
        } else {
            BucketKey::from_wire(self.peer.as_deref())
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored conversations with their entry counts.
    Buckets,
    Show {
        #[command(flatten)]
        target: Target,
    },
    /// Clear a conversation locally, and on the server when `--user` is given.
    Clear {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        user: Option<String>,
    },
    /// Fetch server history and merge it into the local copy.
    Sync {
        #[arg(long)]
        user: String,
        #[command(flatten)]
        target: Target,
    },
    /// Print who the server reports as online.
    Roster,
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = load_settings();
        if let Some(v) = &self.database_url {
            settings.database_url = v.clone();
        }
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = self.history_capacity {
            settings.history_capacity = v;
        }
        settings
    }
}

async fn open_store(settings: &Settings) -> Result<HistoryStore> {
    let database_url = prepare_database_url(&settings.database_url)?;
    let persistence = SqliteSnapshotStore::new(&database_url).await?;
    info!(database_url = %database_url, "storage: opened history database");
    Ok(HistoryStore::open_with_capacity(Arc::new(persistence), settings.history_capacity).await)
}

fn print_entry(entry: &StoredEntry) {
    let message = &entry.message;
    let marker = if entry.is_from_me { "*" } else { " " };
    let body = match (&message.file_name, message.is_attachment()) {
        (Some(name), true) => format!("[{:?}] {name} ({})", message.kind, message.content),
        _ => message.content.clone(),
    };
    println!("{marker} {} {}: {body}", message.timestamp, message.sender);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    match cli.command {
        Command::Buckets => {
            let store = open_store(&settings).await?;
            for (bucket, count) in store.buckets() {
                println!("{bucket}\t{count}");
            }
        }
        Command::Show { target } => {
            let store = open_store(&settings).await?;
            let entries = store.get(&target.bucket());
            if entries.is_empty() {
                println!("no stored messages for {}", target.bucket());
            }
            entries.iter().for_each(print_entry);
        }
        Command::Clear { target, user } => {
            let bucket = target.bucket();
            let mut store = open_store(&settings).await?;
            let existed = store.clear(&bucket).await;
            println!(
                "{bucket}: {}",
                if existed { "cleared locally" } else { "nothing stored locally" }
            );

            if let Some(user) = user {
                let user = validate_identity(&user, DEFAULT_MAX_IDENTITY_LEN)?;
                let server = HttpChatServer::new(&settings.server_url)?;
                server
                    .clear_history(&user, &bucket)
                    .await
                    .with_context(|| format!("failed to clear {bucket} on the server"))?;
                println!("{bucket}: cleared on server");
            }
        }
        Command::Sync { user, target } => {
            let bucket = target.bucket();
            let user = validate_identity(&user, DEFAULT_MAX_IDENTITY_LEN)?;
            let server = HttpChatServer::new(&settings.server_url)?;
            let fetched = server
                .fetch_history(&user, &bucket)
                .await
                .with_context(|| format!("failed to fetch history for {bucket}"))?;

            let mut store = open_store(&settings).await?;
            let merged = merge_histories(store.get(&bucket), fetched, &user);
            let added = merged.added_from_server;
            store.replace(&bucket, merged.entries).await;
            println!(
                "{bucket}: {} entries ({added} new from server)",
                store.len(&bucket)
            );
        }
        Command::Roster => {
            let server = HttpChatServer::new(&settings.server_url)?;
            let roster = server.fetch_roster().await.context("failed to fetch roster")?;
            for user in roster {
                println!("{user}");
            }
        }
    }

    Ok(())
}
