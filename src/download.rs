//! Chunk downloader — the hard part.
//!
//! Multi-worker, multi-seeder fetch with seeder failover, progress
//! reporting, and atomic file finalization. Workers are plain OS threads:
//! there is no async runtime anywhere in this module, and the only
//! suspension points are `connect`/`read`/`write` and the explicit
//! backoff `sleep`.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::conf::{DownloadConf, NetConf};
use crate::discovery::DiscoveryClient;
use crate::error::{Error, FailKind, Result};
use crate::progress::DownloadProgress;
use crate::protocol::{self, Request};
use crate::{chunk_count, chunk_len, ChunkIndex, ChunkSize, FileSize, PeerEndpoint};

/// Drives downloads for one node.
pub struct Downloader {
    net_conf: NetConf,
    download_conf: DownloadConf,
}

impl Downloader {
    pub fn new(net_conf: NetConf, download_conf: DownloadConf) -> Self {
        Self {
            net_conf,
            download_conf,
        }
    }

    /// Downloads `filename` from `seeders` into this node's serving
    /// directory at `my_port`. On success the final file is present at
    /// `root/my_port/filename`; on failure that path is unchanged from
    /// before the call (a `.part` file may remain, preserved rather than
    /// cleaned up, for an operator or future retry to inspect).
    pub fn download(
        &self,
        filename: &str,
        seeders: &[PeerEndpoint],
        my_port: u16,
        progress: Option<&DownloadProgress>,
    ) -> Result<()> {
        if let Some(p) = progress {
            p.set_active(true);
        }

        if seeders.is_empty() {
            if let Some(p) = progress {
                p.set_failed();
            }
            return Err(Error::NoSeeders);
        }

        // Phase A — metadata probe.
        let discovery = DiscoveryClient::new(self.net_conf.clone());
        let size = match discovery.probe_size(filename, seeders) {
            Some(size) => size,
            None => {
                if let Some(p) = progress {
                    p.set_failed();
                }
                return Err(Error::MetaFail);
            }
        };
        let total_chunks = chunk_count(size, self.download_conf.chunk_size);
        if let Some(p) = progress {
            p.set_totals(size, total_chunks);
        }
        log::info!(
            "downloading {} ({} bytes, {} chunks) from {} seeders",
            filename,
            size,
            total_chunks,
            seeders.len()
        );

        // Phase B — parallel fetch.
        let port_dir = self.download_conf.port_dir(my_port);
        fs::create_dir_all(&port_dir).map_err(Error::LocalIo)?;
        let final_path = port_dir.join(filename);
        let tmp_path = append_extension(&final_path, "part");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(Error::LocalIo)?;

        let ctx = WorkerCtx {
            filename,
            seeders,
            chunk_size: self.download_conf.chunk_size,
            total_chunks,
            next_chunk: AtomicU64::new(0),
            file: Mutex::new(file),
            failed: AtomicBool::new(false),
            failure_reason: Mutex::new(None),
            progress,
            net_conf: &self.net_conf,
            initial_backoff_ms: self.download_conf.initial_backoff_ms,
            max_backoff_ms: self.download_conf.max_backoff_ms,
            max_pending_duration: self.download_conf.max_pending_duration,
        };

        thread::scope(|scope| {
            for worker_id in 0..seeders.len() {
                let ctx = &ctx;
                scope.spawn(move || run_worker(worker_id, ctx));
            }
        });

        // Phase C — finalization.
        let done_chunks = progress.map(|p| p.done_chunks()).unwrap_or_else(|| {
            // no progress sink: fall back to the shared failure flag only
            if ctx.failed.load(Ordering::SeqCst) {
                0
            } else {
                total_chunks
            }
        });

        if ctx.failed.load(Ordering::SeqCst) || done_chunks < total_chunks {
            if let Some(p) = progress {
                p.set_failed();
            }
            log::warn!("download of {} failed; leaving {:?} in place", filename, tmp_path);
            let reason = ctx.failure_reason.lock().unwrap().take().unwrap_or_else(|| {
                Error::TempFail("download did not complete".into())
            });
            return Err(reason);
        }

        if final_path.exists() {
            fs::remove_file(&final_path).map_err(Error::LocalIo)?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| {
            if let Some(p) = progress {
                p.set_failed();
            }
            Error::LocalIo(e)
        })?;

        if let Some(p) = progress {
            p.set_success();
        }
        log::info!("download of {} succeeded", filename);
        Ok(())
    }
}

struct WorkerCtx<'a> {
    filename: &'a str,
    seeders: &'a [PeerEndpoint],
    chunk_size: ChunkSize,
    total_chunks: u64,
    next_chunk: AtomicU64,
    file: Mutex<File>,
    failed: AtomicBool,
    /// The first terminal error any worker observed, surfaced to the
    /// caller of `Downloader::download` in place of a generic failure.
    failure_reason: Mutex<Option<Error>>,
    progress: Option<&'a DownloadProgress>,
    net_conf: &'a NetConf,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    max_pending_duration: Option<Duration>,
}

/// Marks the download as permanently failed, recording `reason` if no
/// worker has already recorded one. Idempotent past the first call.
fn fail_with(ctx: &WorkerCtx<'_>, reason: Error) {
    ctx.failed.store(true, Ordering::SeqCst);
    let mut slot = ctx.failure_reason.lock().unwrap();
    if slot.is_none() {
        *slot = Some(reason);
    }
    if let Some(p) = ctx.progress {
        p.set_failed();
    }
}

fn run_worker(worker_id: usize, ctx: &WorkerCtx<'_>) {
    loop {
        if ctx.failed.load(Ordering::SeqCst) {
            return;
        }

        let chunk = ctx.next_chunk.fetch_add(1, Ordering::SeqCst);
        if chunk >= ctx.total_chunks {
            return;
        }

        match fetch_chunk_with_retry(worker_id, ctx, chunk) {
            Ok(data) => {
                if let Err(e) = write_chunk(ctx, chunk, &data) {
                    log::warn!("worker {} failed to write chunk {}: {}", worker_id, chunk, e);
                    fail_with(ctx, e);
                    return;
                }
                if let Some(p) = ctx.progress {
                    p.add_done(data.len() as u64, 1);
                }
            }
            Err(()) => {
                // permanently failed; run_worker's caller already marked
                // ctx.failed and progress as failed.
                return;
            }
        }
    }
}

/// Attempts to fetch `chunk` from the seeders, rotating through all of
/// them starting at `worker_id`'s offset, retrying indefinitely (subject
/// to `max_pending_duration`) while every seeder in a round is `Temp`.
/// Returns `Err(())` once the chunk has been classified as permanently
/// unfetchable (having already marked `ctx.failed`/`progress` as failed).
fn fetch_chunk_with_retry(
    worker_id: usize,
    ctx: &WorkerCtx<'_>,
    chunk: ChunkIndex,
) -> std::result::Result<Vec<u8>, ()> {
    let n = ctx.seeders.len();
    let mut backoff_ms = ctx.initial_backoff_ms;
    let mut pending_since: Option<Instant> = None;

    loop {
        if ctx.failed.load(Ordering::SeqCst) {
            return Err(());
        }

        let mut saw_temp = false;
        let mut last_perm_err = None;

        for k in 0..n {
            let seeder = ctx.seeders[(worker_id + k) % n];
            match fetch_chunk(seeder, ctx.filename, chunk, ctx.chunk_size, ctx.net_conf) {
                Ok(data) => {
                    if let Some(p) = ctx.progress {
                        p.set_pending(false);
                    }
                    return Ok(data);
                }
                Err(e) => match e.fail_kind() {
                    FailKind::Temp => {
                        saw_temp = true;
                        log::debug!(
                            "chunk {} from {} temp-failed: {}",
                            chunk,
                            seeder,
                            e
                        );
                    }
                    FailKind::Permanent => {
                        log::debug!(
                            "chunk {} from {} permanently failed: {}",
                            chunk,
                            seeder,
                            e
                        );
                        last_perm_err = Some(e);
                    }
                },
            }
        }

        if saw_temp && last_perm_err.is_none() {
            if let Some(p) = ctx.progress {
                p.set_pending(true);
            }
            let since = *pending_since.get_or_insert_with(Instant::now);
            if let Some(max) = ctx.max_pending_duration {
                if since.elapsed() > max {
                    log::warn!(
                        "chunk {} exceeded max pending duration; failing download",
                        chunk
                    );
                    fail_with(ctx, Error::TempFail("pending duration exceeded".into()));
                    return Err(());
                }
            }
            thread::sleep(Duration::from_millis(backoff_ms));
            backoff_ms = (backoff_ms * 2).min(ctx.max_backoff_ms);
            continue;
        }

        // at least one seeder gave a permanent failure and no seeder was
        // temp-failing: this chunk (and thus the download) cannot succeed.
        log::warn!("chunk {} permanently unavailable from all seeders", chunk);
        fail_with(ctx, last_perm_err.unwrap_or(Error::RangeOrBad));
        return Err(());
    }
}

fn fetch_chunk(
    seeder: PeerEndpoint,
    filename: &str,
    index: ChunkIndex,
    chunk_size: ChunkSize,
    net_conf: &NetConf,
) -> Result<Vec<u8>> {
    let addr: std::net::SocketAddr = seeder.into();
    let mut stream = TcpStream::connect_timeout(&addr, net_conf.io_timeout)?;
    stream.set_read_timeout(Some(net_conf.io_timeout))?;
    stream.set_write_timeout(Some(net_conf.io_timeout))?;

    let request = Request::Get {
        filename: filename.to_string(),
        index,
    };
    crate::net::write_all(&mut stream, &request.encode())?;

    let reply = protocol::read_get_response(&mut stream, chunk_size, net_conf.max_header_len)?;
    if reply.index != index {
        return Err(Error::Protocol(format!(
            "expected chunk {}, got {}",
            index, reply.index
        )));
    }
    Ok(reply.data)
}

fn write_chunk(ctx: &WorkerCtx<'_>, chunk: ChunkIndex, data: &[u8]) -> Result<()> {
    let offset = chunk * ctx.chunk_size as u64;
    let mut file = ctx.file.lock().unwrap();
    file.seek(SeekFrom::Start(offset)).map_err(Error::LocalIo)?;
    file.write_all(data).map_err(Error::LocalIo)?;
    Ok(())
}

fn append_extension(path: &std::path::Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Returns the length the final chunk of a file of `size` bytes should
/// have under `cs`: the last chunk is whatever bytes remain after the
/// full ones. Exposed for test assertions; the downloader itself uses
/// [`crate::chunk_len`] directly.
pub fn expected_last_chunk_len(size: FileSize, cs: ChunkSize) -> ChunkSize {
    let count = chunk_count(size, cs);
    if count == 0 {
        0
    } else {
        chunk_len(size, count - 1, cs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::Arc;

    fn temp_root(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "loopswarm-download-test-{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn start_seeder(dir: PathBuf, chunk_size: ChunkSize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // `start` spawns its own detached accept/worker threads keyed off
        // cloned `Arc`s, so the server value itself can be dropped here.
        let server = crate::server::SeedServer::new();
        server.start(listener, dir, NetConf::default(), chunk_size);
        port
    }

    fn fast_net_conf() -> NetConf {
        NetConf {
            io_timeout: Duration::from_millis(300),
            ..NetConf::default()
        }
    }

    fn fast_download_conf(root: PathBuf, cs: ChunkSize) -> DownloadConf {
        DownloadConf {
            chunk_size: cs,
            initial_backoff_ms: 20,
            max_backoff_ms: 80,
            ..DownloadConf::new(root)
        }
    }

    #[test]
    fn e1_single_seeder_exact_chunk_boundary() {
        let serve_root = temp_root("e1-serve");
        let serve_dir = serve_root.join("9001");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("a.bin"), vec![42u8; 96]).unwrap();
        let port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("e1-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        let progress = DownloadProgress::new();
        downloader
            .download("a.bin", &[PeerEndpoint::loopback(port)], 9999, Some(&progress))
            .unwrap();

        let final_path = dl_root.join("9999").join("a.bin");
        let data = fs::read(&final_path).unwrap();
        assert_eq!(data.len(), 96);
        assert!(data.iter().all(|&b| b == 42));
        let snap = progress.snapshot();
        assert_eq!(snap.done_chunks, 3);
        assert_eq!(snap.total_chunks, 3);
        assert!(snap.success);
    }

    #[test]
    fn e2_short_final_chunk() {
        let serve_root = temp_root("e2-serve");
        let serve_dir = serve_root.join("9002");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("b.bin"), vec![7u8; 70]).unwrap();
        let port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("e2-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        downloader
            .download("b.bin", &[PeerEndpoint::loopback(port)], 1, None)
            .unwrap();

        let final_path = dl_root.join("1").join("b.bin");
        let data = fs::read(&final_path).unwrap();
        assert_eq!(data.len(), 70);
    }

    #[test]
    fn e3_empty_file() {
        let serve_root = temp_root("e3-serve");
        let serve_dir = serve_root.join("9003");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("c.empty"), b"").unwrap();
        let port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("e3-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        let progress = DownloadProgress::new();
        downloader
            .download("c.empty", &[PeerEndpoint::loopback(port)], 1, Some(&progress))
            .unwrap();

        let final_path = dl_root.join("1").join("c.empty");
        assert_eq!(fs::read(&final_path).unwrap().len(), 0);
        let snap = progress.snapshot();
        assert_eq!(snap.total_chunks, 0);
        assert!(snap.success);
    }

    #[test]
    fn e4_failover_to_second_seeder() {
        // 9001-equivalent: nothing listens here at all (connection refused).
        let dead_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = dead_listener.local_addr().unwrap().port();
        drop(dead_listener);

        let serve_root = temp_root("e4-serve");
        let serve_dir = serve_root.join("9002");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("a.bin"), vec![1u8; 96]).unwrap();
        let good_port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("e4-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        let seeders = vec![PeerEndpoint::loopback(dead_port), PeerEndpoint::loopback(good_port)];
        downloader.download("a.bin", &seeders, 1, None).unwrap();

        let final_path = dl_root.join("1").join("a.bin");
        assert_eq!(fs::read(&final_path).unwrap().len(), 96);
    }

    /// A hand-rolled seeder that answers `META` honestly but `GET` with
    /// `<FILE_NOT_FOUND>` for every chunk, simulating a seeder that knows
    /// about a file but can no longer serve its bytes.
    fn spawn_meta_only_seeder(size: FileSize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let line = crate::net::read_line(&mut stream, 256).unwrap_or_default();
                let text = String::from_utf8_lossy(&line);
                if text.starts_with("META") {
                    let _ = protocol::write_meta_ok(&mut stream, size, 256);
                } else if text.starts_with("GET") {
                    let _ = protocol::write_not_found(&mut stream);
                } else {
                    let _ = protocol::write_bad_request(&mut stream);
                }
            }
        });
        port
    }

    #[test]
    fn e5_all_permanent_failure_leaves_final_path_untouched() {
        let port = spawn_meta_only_seeder(64);

        let dl_root = temp_root("e5-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        let result = downloader.download("d.bin", &[PeerEndpoint::loopback(port)], 1, None);
        assert!(result.is_err());

        let final_path = dl_root.join("1").join("d.bin");
        assert!(!final_path.exists());
        let tmp_path = append_extension(&final_path, "part");
        assert!(tmp_path.exists(), "partial file should be preserved on failure");
    }

    #[test]
    fn progress_never_exceeds_totals_and_is_exclusive_on_success() {
        let serve_root = temp_root("e-progress-serve");
        let serve_dir = serve_root.join("9006");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("a.bin"), vec![3u8; 96]).unwrap();
        let port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("e-progress-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root, 32));
        let progress = Arc::new(DownloadProgress::new());
        downloader
            .download("a.bin", &[PeerEndpoint::loopback(port)], 1, Some(&progress))
            .unwrap();

        let snap = progress.snapshot();
        assert_eq!(snap.done_bytes, snap.total_bytes);
        assert_eq!(snap.done_chunks, snap.total_chunks);
        assert!(snap.success);
        assert!(!snap.failed);
        assert!(!snap.active);
    }

    #[test]
    fn meta_fail_when_no_seeder_reachable() {
        let dead_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = dead_listener.local_addr().unwrap().port();
        drop(dead_listener);

        let dl_root = temp_root("meta-fail-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root, 32));
        let progress = DownloadProgress::new();
        let result = downloader.download(
            "nope.bin",
            &[PeerEndpoint::loopback(dead_port)],
            1,
            Some(&progress),
        );
        assert!(matches!(result, Err(Error::MetaFail)));
        assert!(progress.is_failed());
    }

    #[test]
    fn get_request_for_filename_with_spaces_downloads_correctly() {
        let serve_root = temp_root("spaces-serve");
        let serve_dir = serve_root.join("9007");
        fs::create_dir_all(&serve_dir).unwrap();
        fs::write(serve_dir.join("my cool file.bin"), vec![9u8; 40]).unwrap();
        let port = start_seeder(serve_dir, 32);

        let dl_root = temp_root("spaces-dl");
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(dl_root.clone(), 32));
        downloader
            .download("my cool file.bin", &[PeerEndpoint::loopback(port)], 1, None)
            .unwrap();

        let mut f = File::open(dl_root.join("1").join("my cool file.bin")).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf.len(), 40);
    }
}
