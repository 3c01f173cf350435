//! `loopswarm` is a small peer-to-peer file sharing node. Every node in a
//! swarm serves the files in its own directory and downloads files other
//! nodes hold, over a line-based ASCII protocol on loopback TCP.
//!
//! This crate implements the swarm transfer core: the wire protocol
//! (`protocol`), framed stream I/O (`net`), the seeding server (`server`),
//! the discovery client (`discovery`), the concurrent chunk downloader
//! (`download`), and the progress/job registry (`progress`). The four
//! external collaborators from the node's point of view — port
//! allocation, local file scanning, logging bootstrap, and the
//! interactive menu — live in their own modules too, so `loopswarm-node`
//! can assemble a complete, runnable node, but none of them are part of
//! the transfer core's correctness surface.

pub mod conf;
pub mod discovery;
pub mod download;
pub mod error;
pub mod logging;
pub mod menu;
pub mod net;
pub mod port_alloc;
pub mod progress;
pub mod protocol;
pub mod scanner;
pub mod server;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub use error::{Error, Result};

/// The size, in bytes, of a chunk. Fixed for the lifetime of a swarm; see
/// [`conf::NodeConf::chunk_size`].
pub type ChunkSize = u32;

/// The zero-based index of a chunk within a file.
pub type ChunkIndex = u64;

/// A file's size in bytes, as reported by `META`.
pub type FileSize = u64;

/// A peer's address on the shared loopback range: host is always a
/// loopback address (no NAT traversal needed), so only the port varies
/// from node to node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl PeerEndpoint {
    /// Returns a loopback endpoint (`127.0.0.1:port`).
    pub fn loopback(port: u16) -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port,
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<PeerEndpoint> for SocketAddr {
    fn from(ep: PeerEndpoint) -> Self {
        SocketAddr::V4(SocketAddrV4::new(ep.host, ep.port))
    }
}

/// A filename together with the peers known to hold it, in discovery
/// order. Ephemeral per-scan: produced fresh by [`discovery::DiscoveryClient`]
/// or [`scanner::FileScanner`] and not retained across scans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub seeders: Vec<PeerEndpoint>,
}

impl FileEntry {
    /// Appends `seeder` to this entry's seeder list if it isn't already
    /// present, preserving discovery order. `seeders` is always
    /// deduplicated and never contains the scanning node itself.
    pub(crate) fn add_seeder(&mut self, seeder: PeerEndpoint) {
        if !self.seeders.contains(&seeder) {
            self.seeders.push(seeder);
        }
    }
}

/// Returns the number of chunks a file of `file_size` bytes is divided
/// into under chunk size `cs`, i.e. `ceil(file_size / cs)`. A zero-length
/// file has zero chunks.
pub fn chunk_count(file_size: FileSize, cs: ChunkSize) -> u64 {
    let cs = cs as u64;
    (file_size + cs - 1) / cs
}

/// Returns the length in bytes of the chunk at `index` in a file of
/// `file_size` bytes under chunk size `cs`. All chunks but the last are
/// exactly `cs` bytes; the last is in `[1, cs]`.
///
/// # Panics
///
/// Panics if `index` is not a valid chunk index for `file_size`.
pub fn chunk_len(file_size: FileSize, index: ChunkIndex, cs: ChunkSize) -> ChunkSize {
    let count = chunk_count(file_size, cs);
    assert!(index < count, "chunk index {} out of bounds ({})", index, count);
    let offset = index * cs as u64;
    let remaining = file_size - offset;
    remaining.min(cs as u64) as ChunkSize
}
