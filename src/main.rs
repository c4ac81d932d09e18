//! Command-line front end: loads a torrent, announces to its tracker, opens
//! a session per discovered peer, and drives acquisition to completion (C9).
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::task::JoinSet;
use torrentcore::bencode::decoder::decode;
use torrentcore::peer::session::Session;
use torrentcore::peer::generate_peer_id;
use torrentcore::swarm::{Coordinator, LoggingPieceWriter};
use torrentcore::torrent::file::TorrentFile;
use torrentcore::tracker::{AnnounceState, TrackerManager};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A minimal BitTorrent client core")]
struct Cli {
    /// The .torrent file to load.
    #[arg(long = "torrent-file")]
    torrent_file: PathBuf,

    /// Local port advertised to the tracker.
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Output directory handed to the (out-of-scope) piece writer.
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Log level passed to the tracing env-filter when `RUST_LOG` is unset.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if let Err(error) = run(cli).await {
        tracing::error!(%error, "fatal error");
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }

    Ok(())
}

#[tracing::instrument(skip(cli))]
async fn run(cli: Cli) -> Result<()> {
    let _ = &cli.output_dir;

    let bytes = tokio::fs::read(&cli.torrent_file)
        .await
        .with_context(|| format!("reading {}", cli.torrent_file.display()))?;
    let value = decode(bytes.as_slice()).context("decoding torrent file")?;
    let torrent = TorrentFile::parse(value).context("parsing torrent file")?;

    tracing::info!(
        announce = %torrent.announce,
        info_hash = %hex::encode(torrent.info_hash),
        pieces = torrent.num_pieces(),
        total_bytes = torrent.total_length(),
        "loaded torrent"
    );

    let peer_id = generate_peer_id();

    let mut announce_urls = vec![torrent.announce.clone()];
    announce_urls.extend(torrent.announce_list.iter().cloned());
    let mut trackers = TrackerManager::new(announce_urls, peer_id, cli.port);

    let state = AnnounceState {
        uploaded: 0,
        downloaded: 0,
        left: torrent.total_length(),
        event: Some("started"),
        tracker_id: None,
    };
    let peers = trackers.announce_all(&torrent, &state).await;

    if peers.is_empty() {
        anyhow::bail!("no trackers returned any peers");
    }
    tracing::info!(count = peers.len(), "discovered peers");

    let (coordinator, swarm, mut completion) = Coordinator::new(&torrent, LoggingPieceWriter);
    let coordinator_task = tokio::spawn(coordinator.run());

    let mut sessions = JoinSet::new();
    for peer in peers {
        let addr = SocketAddr::new(peer.ip, peer.port);
        let swarm = swarm.clone();
        let info_hash = torrent.info_hash;
        let completion = completion.clone();
        sessions.spawn(async move {
            match Session::connect(addr, info_hash, peer_id, swarm, completion).await {
                Ok(session) => session.run().await,
                Err(error) => tracing::warn!(%addr, %error, "handshake failed"),
            }
        });
    }

    tokio::select! {
        _ = completion.changed() => {
            tracing::info!("download complete");
        }
        _ = async {
            while sessions.join_next().await.is_some() {}
        } => {
            tracing::warn!("every peer session ended before completion");
        }
    }

    coordinator_task.abort();

    if !*completion.borrow() {
        anyhow::bail!("every peer session ended before the download completed");
    }

    Ok(())
}
