//! This module defines types used to configure a node and its parts.

use std::path::PathBuf;
use std::time::Duration;

use crate::ChunkSize;

/// The default chunk size: 256 KiB. All peers in a swarm must agree on
/// this value out of band; it is not negotiated on the wire.
pub const DEFAULT_CHUNK_SIZE: ChunkSize = 256 * 1024;

/// The global configuration for a node and all its parts.
#[derive(Clone, Debug)]
pub struct NodeConf {
    pub net: NetConf,
    pub download: DownloadConf,
}

impl NodeConf {
    /// Returns a node configuration with reasonable defaults, except for
    /// the serving root, which is not sensible to guess for the user.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            net: NetConf::default(),
            download: DownloadConf::new(root),
        }
    }
}

/// Configuration related to the framed I/O and seeding server.
#[derive(Clone, Debug)]
pub struct NetConf {
    /// Per-connection read/write timeout. Expiry is treated as a `Temp`
    /// failure by the downloader.
    pub io_timeout: Duration,
    /// The seeding server's listen backlog. Must be at least 16.
    pub backlog: u32,
    /// The maximum size, in bytes, of a single response header line
    /// (`<LIST>`, `<META>`, `<CHUNK>` header, or error token). Capped
    /// at 256.
    pub max_header_len: usize,
}

impl Default for NetConf {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(5),
            backlog: 16,
            max_header_len: 256,
        }
    }
}

/// Configuration for the chunk downloader.
#[derive(Clone, Debug)]
pub struct DownloadConf {
    /// The directory under which each node's per-port serving directory
    /// lives; a node at port `p` serves and downloads into `root/p/`.
    pub root: PathBuf,

    /// The fixed chunk size for this swarm.
    pub chunk_size: ChunkSize,

    /// The initial backoff, in milliseconds, after an all-`Temp` round for
    /// a chunk.
    pub initial_backoff_ms: u64,

    /// The backoff cap, in milliseconds. The backoff doubles after each
    /// all-`Temp` round up to this value.
    pub max_backoff_ms: u64,

    /// How long an individual chunk may stay in the `pending` (all-`Temp`)
    /// retry loop before the download gives up. `None` means indefinite,
    /// which is the default: a swarm with no bound on outage length
    /// should keep retrying rather than give up.
    pub max_pending_duration: Option<Duration>,
}

impl DownloadConf {
    /// Returns the download configuration with reasonable defaults, except
    /// for the serving root, which is not sensible to guess for the user.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
            // indefinite wait by default; operators that want a bound can
            // set this explicitly
            max_pending_duration: None,
        }
    }

    /// Returns the serving/download directory for the node listening on
    /// `port`, i.e. `root/port/`.
    pub fn port_dir(&self, port: u16) -> PathBuf {
        self.root.join(port.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn port_dir_joins_root_and_port() {
        let conf = DownloadConf::new("/tmp/loopswarm");
        assert_eq!(conf.port_dir(9001), PathBuf::from("/tmp/loopswarm/9001"));
    }

    #[test]
    fn defaults_match_spec_mandated_values() {
        let conf = DownloadConf::new("/tmp/x");
        assert_eq!(conf.initial_backoff_ms, 200);
        assert_eq!(conf.max_backoff_ms, 2000);
        assert_eq!(conf.max_pending_duration, None);

        let net = NetConf::default();
        assert_eq!(net.backlog, 16);
        assert_eq!(net.max_header_len, 256);
    }
}
