//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use eddy_core::client::{ClientContext, SearchQuery, spawn_client};
use eddy_core::config::EddyConfig;
use eddy_core::events::Event;
use eddy_core::scheduler::DownloadRequest;
use eddy_core::share::{LocalFileIndex, MemoryIndex};
use futures::StreamExt;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Join a hub and stay connected until interrupted
    Connect {
        /// Hub host name or address
        #[arg(long)]
        hub: Option<String>,
        /// Hub port
        #[arg(short, long)]
        port: Option<u16>,
        /// Nick to log in with
        #[arg(short, long)]
        nick: Option<String>,
        /// Password sent if the hub asks for one
        #[arg(long)]
        password: Option<String>,
        /// Directory to share
        #[arg(short, long)]
        share: Option<PathBuf>,
        /// Where finished downloads are written
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Accept incoming connections, advertising this address
        #[arg(long)]
        active: Option<String>,
        /// Download a file, given as NICK:PATH
        #[arg(long = "get")]
        downloads: Vec<String>,
        /// Fetch the file list of a user
        #[arg(long = "list")]
        file_lists: Vec<String>,
        /// Run a search once logged in
        #[arg(long)]
        search: Option<String>,
    },
    /// Index a directory and report what would be shared
    Share {
        /// Directory to index
        root: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first setup failure of the chosen command.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Connect {
            hub,
            port,
            nick,
            password,
            share,
            output,
            active,
            downloads,
            file_lists,
            search,
        } => {
            let mut config = EddyConfig::from_env();
            if let Some(hub) = hub {
                config.hub.address = hub;
            }
            if let Some(port) = port {
                config.hub.port = port;
            }
            if let Some(nick) = nick {
                config.identity.nick = nick;
            }
            if password.is_some() {
                config.identity.password = password;
            }
            if let Some(output) = output {
                config.transfer.download_dir = output;
            }
            if let Some(address) = active {
                config.identity.passive = false;
                config.identity.address = address;
            }

            let session = Session {
                share,
                downloads: downloads
                    .iter()
                    .map(|arg| parse_download(arg))
                    .collect::<anyhow::Result<_>>()?,
                file_lists,
                search,
            };
            connect(config, session).await
        }
        Commands::Share { root } => show_share(root).await,
    }
}

struct Session {
    share: Option<PathBuf>,
    downloads: Vec<DownloadRequest>,
    file_lists: Vec<String>,
    search: Option<String>,
}

fn parse_download(arg: &str) -> anyhow::Result<DownloadRequest> {
    let (nick, file) = arg
        .split_once(':')
        .filter(|(nick, file)| !nick.is_empty() && !file.is_empty())
        .with_context(|| format!("Expected NICK:PATH, got '{arg}'"))?;
    Ok(DownloadRequest::new(nick, file))
}

async fn connect(config: EddyConfig, session: Session) -> anyhow::Result<()> {
    let index = match &session.share {
        Some(root) => MemoryIndex::scan(root)
            .await
            .with_context(|| format!("Cannot index {}", root.display()))?,
        None => MemoryIndex::new(),
    };

    let hub = format!("{}:{}", config.hub.address, config.hub.port);
    let context = ClientContext::new(config, Arc::new(index));
    let mut events = std::pin::pin!(context.events.subscribe_stream());
    let client = spawn_client(context);

    println!("Connecting to {hub}...");
    client.connect_hub().await?;

    let mut search = session.search;
    for request in session.downloads {
        let download = client.download(request).await?;
        println!("Queued {} {} from {}", download.id, download.file, download.nick);
    }
    for nick in &session.file_lists {
        match client.file_list(nick).await? {
            Some(download) => println!("Queued file list of {nick} as {}", download.id),
            None => println!("Using cached file list of {nick}"),
        }
    }

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if matches!(event, Event::HubValidated { .. }) {
                    if let Some(query) = search.take() {
                        client.search(SearchQuery::Text(query)).await?;
                    }
                }
                if !print_event(&event) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, shutting down");
                break;
            }
        }
    }

    client.shutdown().await.ok();
    Ok(())
}

/// Prints one event. Returns false once the hub connection is gone.
fn print_event(event: &Event) -> bool {
    match event {
        Event::HubConnected { address } => println!("Connected to {address}"),
        Event::HubValidated { hub_name } => {
            println!("Logged in to {}", hub_name.as_deref().unwrap_or("hub"));
        }
        Event::HubDisconnected { reason } => {
            println!("Hub connection closed: {reason}");
            return false;
        }
        Event::DownloadStarted { id, file, size, .. } => {
            println!("{id} started: {file} ({size} bytes)");
        }
        Event::DownloadProgress { id, percent, .. } => println!("{id} {percent:.1}%"),
        Event::DownloadFinished { id, path, .. } => {
            println!("{id} finished: {}", path.display());
        }
        Event::DownloadFailed { id, file, reason, .. } => {
            println!("{id} failed: {file}: {reason}");
        }
        Event::FileListReady { nick, path } => {
            println!("File list of {nick}: {}", path.display());
        }
        Event::UploadStarted { nick, file, size } => {
            println!("Uploading {file} to {nick} ({size} bytes)");
        }
        Event::UploadFinished {
            nick,
            file,
            sent,
            completed,
        } => {
            let outcome = if *completed { "sent" } else { "aborted" };
            println!("Upload of {file} to {nick} {outcome} after {sent} bytes");
        }
        Event::SearchResult(result) => match result.size {
            Some(size) => println!("[{}] {} ({size} bytes)", result.nick, result.path),
            None => println!("[{}] {}\\", result.nick, result.path),
        },
        Event::Chat { from, text } => println!("<{from}> {text}"),
        Event::PrivateMessage { from, text } => println!("*{from}* {text}"),
        Event::PeerConnected { .. }
        | Event::PeerDisconnected { .. }
        | Event::Hub(_)
        | Event::PeerMessage { .. } => {
            tracing::debug!("{event:?}");
        }
    }
    true
}

/// Index a directory and print a summary
///
/// # Errors
/// - `std::io::Error` - The directory could not be read
pub async fn show_share(root: PathBuf) -> anyhow::Result<()> {
    let index = MemoryIndex::scan(&root)
        .await
        .with_context(|| format!("Cannot index {}", root.display()))?;

    println!("Share root: {}", root.display());
    println!("  Files: {}", index.len());
    println!("  Total size: {} bytes", index.share_size().await);
    Ok(())
}
