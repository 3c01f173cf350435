//! The interactive command menu a `loopswarm-node` process presents on
//! its controlling terminal: `list`, `get <filename>`, `jobs`, `quit`.
//!
//! This is purely a user-facing loop over the library's real surface
//! ([`FileScanner`], [`Downloader`], [`JobRegistry`]); none of the
//! transfer core depends on it.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;

use crate::conf::NodeConf;
use crate::discovery::{port_range_candidates, DiscoveryClient};
use crate::download::Downloader;
use crate::progress::{DownloadJob, JobRegistry};
use crate::scanner::FileScanner;
use crate::PeerEndpoint;

/// Drives the node's interactive menu.
pub struct Menu {
    my_port: u16,
    scan_range: (u16, u16),
    conf: NodeConf,
    scanner: FileScanner,
    registry: Arc<JobRegistry>,
}

impl Menu {
    pub fn new(my_port: u16, scan_range: (u16, u16), conf: NodeConf) -> Self {
        let scanner = FileScanner::new(
            conf.download.port_dir(my_port),
            DiscoveryClient::new(conf.net.clone()),
        );
        Self {
            my_port,
            scan_range,
            conf,
            scanner,
            registry: Arc::new(JobRegistry::new()),
        }
    }

    /// Runs the menu loop until `quit`/`exit` or EOF on `input`. Blocks
    /// the calling thread; downloads it starts run on their own threads
    /// and are tracked in the registry so `jobs` can report on them while
    /// a later `get` is still being typed.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> crate::Result<()> {
        loop {
            write!(output, "> ")?;
            output.flush()?;

            let mut line = String::new();
            let n = input.read_line(&mut line).map_err(crate::Error::LocalIo)?;
            if n == 0 {
                return Ok(()); // EOF
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut tokens = line.split_whitespace();
            match tokens.next().unwrap_or("") {
                "list" => self.cmd_list(&mut output),
                "get" => {
                    let filename = line.splitn(2, char::is_whitespace).nth(1).map(str::trim);
                    match filename {
                        Some(f) if !f.is_empty() => self.cmd_get(f, &mut output),
                        _ => writeln!(output, "usage: get <filename>")?,
                    }
                }
                "jobs" => self.cmd_jobs(&mut output),
                "quit" | "exit" => return Ok(()),
                other => writeln!(output, "unknown command: {}", other)?,
            }
        }
    }

    fn candidates(&self) -> Vec<PeerEndpoint> {
        port_range_candidates(self.scan_range.0, self.scan_range.1)
    }

    fn cmd_list<W: Write>(&self, output: &mut W) {
        let self_endpoint = PeerEndpoint::loopback(self.my_port);
        let mut entries = self.scanner.scan_peers(self_endpoint, &self.candidates());
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));

        for name in self.scanner.local_files() {
            let _ = writeln!(output, "{} (local)", name);
        }
        for entry in entries {
            let seeders: Vec<String> = entry.seeders.iter().map(|s| s.to_string()).collect();
            let _ = writeln!(output, "{} [{}]", entry.filename, seeders.join(", "));
        }
    }

    fn cmd_get<W: Write>(&self, filename: &str, output: &mut W) {
        let self_endpoint = PeerEndpoint::loopback(self.my_port);
        let entries = self.scanner.scan_peers(self_endpoint, &self.candidates());
        let seeders = match entries.into_iter().find(|e| e.filename == filename) {
            Some(entry) => entry.seeders,
            None => {
                let _ = writeln!(output, "no seeder found for {}", filename);
                return;
            }
        };

        let job = DownloadJob::new(filename.to_string(), seeders.clone());
        self.registry.register(job.clone());
        let _ = writeln!(
            output,
            "starting download of {} from {} seeder(s)",
            filename,
            seeders.len()
        );

        let downloader = Downloader::new(self.conf.net.clone(), self.conf.download.clone());
        let my_port = self.my_port;
        thread::spawn(move || {
            let result =
                downloader.download(&job.filename, &job.seeders, my_port, Some(job.progress.as_ref()));
            if let Err(e) = result {
                log::warn!("download of {} failed: {}", job.filename, e);
            }
            job.finish();
        });
    }

    fn cmd_jobs<W: Write>(&self, output: &mut W) {
        for job in self.registry.jobs() {
            let snap = job.progress.snapshot();
            let status = if snap.success {
                "done"
            } else if snap.failed {
                "failed"
            } else if snap.pending {
                "pending"
            } else if snap.active {
                "active"
            } else {
                "queued"
            };
            let _ = writeln!(
                output,
                "{}: {} ({}/{} chunks, {}/{} bytes)",
                job.filename, status, snap.done_chunks, snap.total_chunks, snap.done_bytes, snap.total_bytes
            );
        }
    }
}
