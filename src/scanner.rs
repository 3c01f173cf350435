//! Local + swarm file visibility.
//!
//! The original tool this node is modeled on scans every other node's
//! directory directly, because all nodes share one filesystem. This node
//! has no such shortcut: peers are separate processes, so "what does the
//! swarm have" can only be answered over the wire, via [`DiscoveryClient`].
//! `FileScanner` is the thin layer that combines that remote view with
//! the node's own local directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveryClient;
use crate::{FileEntry, FileSize, PeerEndpoint};

/// Answers "what files exist" questions for one node: its own serving
/// directory, and (via [`DiscoveryClient`]) the rest of the swarm.
pub struct FileScanner {
    serve_dir: PathBuf,
    discovery: DiscoveryClient,
}

impl FileScanner {
    pub fn new(serve_dir: impl Into<PathBuf>, discovery: DiscoveryClient) -> Self {
        Self {
            serve_dir: serve_dir.into(),
            discovery,
        }
    }

    /// True if `filename` is a regular file directly in this node's
    /// serving directory.
    pub fn exists_local(&self, filename: &str) -> bool {
        fs::metadata(self.serve_dir.join(filename))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// The size of `filename` in this node's serving directory, if present.
    pub fn local_size(&self, filename: &str) -> Option<FileSize> {
        fs::metadata(self.serve_dir.join(filename))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Lists the regular files directly in this node's serving directory.
    pub fn local_files(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.serve_dir) {
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    }

    /// Scans `candidates` (minus `self_endpoint`) for file listings,
    /// returning the swarm's merged, deduplicated view. See
    /// [`DiscoveryClient::scan`].
    pub fn scan_peers(
        &self,
        self_endpoint: PeerEndpoint,
        candidates: &[PeerEndpoint],
    ) -> Vec<FileEntry> {
        self.discovery.scan(self_endpoint, candidates)
    }

    pub fn serve_dir(&self) -> &Path {
        &self.serve_dir
    }
}
