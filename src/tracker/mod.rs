//! Tracker client (C3): HTTP announce request/response, and rotation across
//! several trackers.
use crate::torrent::file::TorrentFile;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("bencode deserialization error: {0}")]
    BencodeDe(#[from] serde_bencode::Error),

    #[error("tracker reported failure: {0}")]
    FailureReason(String),

    #[error("malformed peers field (length not a multiple of 6)")]
    MalformedPeers,
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A peer endpoint as returned by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
    pub tracker_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrackerResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: RawPeers,
    #[serde(rename = "tracker id", default)]
    tracker_id: Option<String>,
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(Vec<u8>),
    NonCompact(Vec<RawPeerDict>),
}

impl Default for RawPeers {
    fn default() -> Self {
        RawPeers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawPeerDict {
    ip: String,
    port: u16,
}

fn parse_peers(raw: RawPeers) -> TrackerResult<Vec<Peer>> {
    match raw {
        RawPeers::Compact(bytes) => {
            if bytes.len() % 6 != 0 {
                return Err(TrackerError::MalformedPeers);
            }
            Ok(bytes
                .chunks_exact(6)
                .map(|chunk| Peer {
                    ip: IpAddr::V4(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3])),
                    port: u16::from_be_bytes([chunk[4], chunk[5]]),
                })
                .collect())
        }
        RawPeers::NonCompact(dicts) => Ok(dicts
            .into_iter()
            .filter_map(|dict| dict.ip.parse::<IpAddr>().ok().map(|ip| Peer { ip, port: dict.port }))
            .collect()),
    }
}

/// Announce parameters that vary across the lifetime of a download (§4.3).
#[derive(Debug, Clone)]
pub struct AnnounceState {
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub event: Option<&'static str>,
    pub tracker_id: Option<String>,
}

/// A single tracker's HTTP client.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

impl Client {
    pub fn new(peer_id: [u8; 20], port: u16) -> Self {
        Self { peer_id, port }
    }

    /// Issues one announce GET request and parses the bencoded response.
    #[tracing::instrument(skip(self, torrent, state), fields(announce = %torrent.announce))]
    pub async fn announce(
        &self,
        torrent: &TorrentFile,
        state: &AnnounceState,
    ) -> TrackerResult<AnnounceResponse> {
        let mut url = url::Url::parse(&torrent.announce)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("info_hash", &url_encode(&torrent.info_hash));
            query.append_pair("peer_id", &url_encode(&self.peer_id));
            query.append_pair("port", &self.port.to_string());
            query.append_pair("uploaded", &state.uploaded.to_string());
            query.append_pair("downloaded", &state.downloaded.to_string());
            query.append_pair("left", &state.left.to_string());
            query.append_pair("compact", "1");
            if let Some(event) = state.event {
                query.append_pair("event", event);
            }
            if let Some(tracker_id) = &state.tracker_id {
                query.append_pair("trackerid", tracker_id);
            }
        }

        tracing::debug!(%url, "announcing to tracker");
        let response = reqwest::get(url).await?;
        let body = response.bytes().await?;
        Self::parse_announce_response(&body)
    }

    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let raw: RawTrackerResponse = serde_bencode::from_bytes(bytes)?;

        if let Some(reason) = raw.failure_reason {
            return Err(TrackerError::FailureReason(reason));
        }

        Ok(AnnounceResponse {
            interval: raw.interval,
            peers: parse_peers(raw.peers)?,
            tracker_id: raw.tracker_id,
        })
    }
}

/// Percent-encodes `bytes` per RFC 3986's unreserved set (needed because
/// `info_hash`/`peer_id` are raw 20-byte values, not necessarily valid URL
/// text).
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

struct TrackerEntry {
    client: Client,
    announce_url: String,
    last_visited: Option<Instant>,
    interval: Duration,
}

/// Rotates announces across several trackers, unioning the peers each
/// eligible one returns.
///
/// The implementation this was modeled on had a bug here: it called
/// `list.extend(itself)` (a self-extend that duplicates nothing useful and
/// is discarded) instead of appending each tracker's peers into the result,
/// and then returned an accumulator that was never written to — so
/// `get_remote_peers` always returned an empty list. This collects each
/// eligible tracker's peers into the result exactly once, in tracker order.
pub struct TrackerManager {
    entries: Vec<TrackerEntry>,
}

impl TrackerManager {
    pub fn new(announce_urls: Vec<String>, peer_id: [u8; 20], port: u16) -> Self {
        let entries = announce_urls
            .into_iter()
            .map(|announce_url| TrackerEntry {
                client: Client::new(peer_id, port),
                announce_url,
                last_visited: None,
                interval: Duration::ZERO,
            })
            .collect();
        TrackerManager { entries }
    }

    fn eligible(entry: &TrackerEntry, now: Instant) -> bool {
        match entry.last_visited {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= entry.interval,
        }
    }

    /// Announces to every eligible tracker and returns the union of peers
    /// from the successful responses, in tracker order. Trackers that fail
    /// (HTTP error, malformed response, failure reason) are skipped; the
    /// rest still contribute.
    #[tracing::instrument(skip(self, torrent, state))]
    pub async fn announce_all(&mut self, torrent: &TorrentFile, state: &AnnounceState) -> Vec<Peer> {
        let now = Instant::now();
        let mut results = Vec::new();

        for entry in &mut self.entries {
            if !Self::eligible(entry, now) {
                continue;
            }

            let mut single_tracker_torrent = torrent.clone();
            single_tracker_torrent.announce = entry.announce_url.clone();

            let result = entry.client.announce(&single_tracker_torrent, state).await;
            if let Ok(response) = &result {
                entry.interval = Duration::from_secs(response.interval.max(0) as u64);
                entry.last_visited = Some(now);
            }
            results.push((entry.announce_url.clone(), result));
        }

        union_peers(results)
    }
}

/// Unions the peers of every successful announce, in tracker order, logging
/// a warning for each tracker whose announce failed instead of letting it
/// poison the rest.
///
/// This is the pure core of the rotation fix described on [`TrackerManager`]:
/// given the per-tracker results in order, every `Ok` response contributes
/// its peers exactly once and every `Err` is skipped — never the
/// self-extend/never-populated-accumulator bug this replaces.
fn union_peers(results: Vec<(String, TrackerResult<AnnounceResponse>)>) -> Vec<Peer> {
    let mut peers = Vec::new();
    for (announce_url, result) in results {
        match result {
            Ok(response) => peers.extend(response.peers),
            Err(error) => {
                tracing::warn!(tracker = %announce_url, %error, "tracker announce failed");
            }
        }
    }
    peers
}
