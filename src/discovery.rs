//! Discovery client.
//!
//! Queries a range of candidate peers for their file lists and merges the
//! results into a swarm view. Connection failures and protocol
//! violations are skipped silently — a single unreachable or misbehaving
//! peer must never hang or fail a scan.

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use crate::conf::NetConf;
use crate::protocol::{self, Request};
use crate::{FileEntry, FileSize, PeerEndpoint};

/// Queries peers for file listings and metadata.
#[derive(Clone, Debug)]
pub struct DiscoveryClient {
    net_conf: NetConf,
}

impl DiscoveryClient {
    pub fn new(net_conf: NetConf) -> Self {
        Self { net_conf }
    }

    /// Issues `LIST` to every endpoint in `candidates` except `self_endpoint`,
    /// merging the results into a deduplicated set of [`FileEntry`] values.
    /// Each filename's `seeders` preserves discovery order (the order
    /// `candidates` was given in) and contains each endpoint at most once.
    pub fn scan(
        &self,
        self_endpoint: PeerEndpoint,
        candidates: &[PeerEndpoint],
    ) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = Vec::new();

        for &peer in candidates {
            if peer == self_endpoint {
                continue;
            }
            match self.list_peer(peer) {
                Ok(filenames) => {
                    for filename in filenames {
                        match entries.iter_mut().find(|e| e.filename == filename) {
                            Some(entry) => entry.add_seeder(peer),
                            None => entries.push(FileEntry {
                                filename,
                                seeders: vec![peer],
                            }),
                        }
                    }
                }
                Err(e) => {
                    log::debug!("skipping peer {} during scan: {}", peer, e);
                }
            }
        }

        entries
    }

    fn list_peer(&self, peer: PeerEndpoint) -> crate::Result<Vec<String>> {
        let mut stream = connect(peer, &self.net_conf)?;
        stream.write_all(&Request::List.encode())?;
        protocol::read_list_response(&mut stream, self.net_conf.max_header_len)
    }

    /// Issues `META <filename>` to each seeder in order until one responds
    /// with a size, returning the first success. Returns `None` if every
    /// seeder fails (connection error, `<FILE_NOT_FOUND>`, or a protocol
    /// violation).
    pub fn probe_size(&self, filename: &str, seeders: &[PeerEndpoint]) -> Option<FileSize> {
        for &peer in seeders {
            match self.probe_one(filename, peer) {
                Ok(size) => return Some(size),
                Err(e) => log::debug!("META probe to {} failed: {}", peer, e),
            }
        }
        None
    }

    fn probe_one(&self, filename: &str, peer: PeerEndpoint) -> crate::Result<FileSize> {
        let mut stream = connect(peer, &self.net_conf)?;
        stream.write_all(&Request::Meta { filename: filename.to_string() }.encode())?;
        protocol::read_meta_response(&mut stream, self.net_conf.max_header_len)
    }
}

fn connect(peer: PeerEndpoint, net_conf: &NetConf) -> crate::Result<TcpStream> {
    let addr: std::net::SocketAddr = peer.into();
    let stream = TcpStream::connect_timeout(&addr, net_conf.io_timeout)?;
    stream.set_read_timeout(Some(net_conf.io_timeout))?;
    stream.set_write_timeout(Some(net_conf.io_timeout))?;
    Ok(stream)
}

/// Generates the candidate endpoints for a port-range scan, i.e.
/// `[start, end]` on loopback. This is the default discovery strategy: a
/// node with no coordinator scans every port in the range and asks each
/// one what it has.
pub fn port_range_candidates(start: u16, end: u16) -> Vec<PeerEndpoint> {
    (start..=end).map(PeerEndpoint::loopback).collect()
}

/// A connect timeout short enough that scanning a wide, mostly-empty port
/// range doesn't take unreasonably long. Used by [`port_range_candidates`]
/// callers that build their own `NetConf` for scanning versus transfer.
pub const SCAN_CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
