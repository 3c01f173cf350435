//! Seeding server.
//!
//! Accepts connections on a pre-bound listening endpoint (handed over by
//! [`crate::port_alloc`]) and answers exactly one request per connection
//! before closing it. One accept thread polls for new connections; each
//! accepted connection is handed to a fresh, detached worker thread.

use std::fs;
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::conf::NetConf;
use crate::protocol::{self, Request};
use crate::ChunkSize;

/// How often the accept loop wakes up to check whether it has been asked
/// to stop. Not a correctness-relevant value, only an upper bound on
/// `stop()`'s latency.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `stop()` waits for in-flight per-connection workers to drain
/// before giving up and returning anyway.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves `LIST`/`META`/`GET` requests for the files in `serve_dir`.
pub struct SeedServer {
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    accept_thread: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for SeedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedServer {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            accept_thread: std::sync::Mutex::new(None),
        }
    }

    /// Begins accepting connections on `listener`, serving files out of
    /// `serve_dir`. Non-blocking to the caller: returns once the accept
    /// thread has been spawned.
    pub fn start(&self, listener: TcpListener, serve_dir: PathBuf, net_conf: NetConf, chunk_size: ChunkSize) {
        listener
            .set_nonblocking(true)
            .expect("failed to set listener non-blocking");

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let in_flight = self.in_flight.clone();

        let handle = thread::spawn(move || {
            log::info!("seeding server listening on {:?}", listener.local_addr());
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        log::debug!("accepted connection from {}", addr);
                        let serve_dir = serve_dir.clone();
                        let net_conf = net_conf.clone();
                        let in_flight = in_flight.clone();
                        in_flight.fetch_add(1, Ordering::SeqCst);
                        thread::spawn(move || {
                            if let Err(e) =
                                handle_connection(stream, &serve_dir, &net_conf, chunk_size)
                            {
                                log::warn!("connection from {} failed: {}", addr, e);
                            }
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                }
            }
            log::info!("seeding server accept loop stopped");
        });

        *self.accept_thread.lock().unwrap() = Some(handle);
    }

    /// Halts accepting new connections and waits (bounded) for in-flight
    /// handlers to drain. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Serves exactly one request on `stream`, then returns (the caller
/// closes the connection by dropping `stream`).
fn handle_connection(
    mut stream: TcpStream,
    serve_dir: &Path,
    net_conf: &NetConf,
    chunk_size: ChunkSize,
) -> crate::Result<()> {
    stream.set_read_timeout(Some(net_conf.io_timeout))?;
    stream.set_write_timeout(Some(net_conf.io_timeout))?;

    let line = crate::net::read_line(&mut stream, net_conf.max_header_len)?;
    let request = match Request::parse(&line) {
        Ok(r) => r,
        Err(_) => return protocol::write_bad_request(&mut stream),
    };

    match request {
        Request::List => handle_list(&mut stream, serve_dir, net_conf.max_header_len),
        Request::Meta { filename } => {
            handle_meta(&mut stream, serve_dir, &filename, net_conf.max_header_len)
        }
        Request::Get { filename, index } => handle_get(
            &mut stream,
            serve_dir,
            &filename,
            index,
            chunk_size,
            net_conf.max_header_len,
        ),
    }
}

/// Lists the regular files directly in `serve_dir`. Partial writes (the
/// peer disconnects mid-stream) are silently dropped: the write helpers
/// already surface that as an error, which this function's caller logs
/// and discards.
fn handle_list(stream: &mut TcpStream, serve_dir: &Path, max_header_len: usize) -> crate::Result<()> {
    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir(serve_dir) {
        for entry in entries.flatten() {
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    protocol::write_list_response(stream, &names, max_header_len)
}

fn handle_meta(
    stream: &mut TcpStream,
    serve_dir: &Path,
    filename: &str,
    max_header_len: usize,
) -> crate::Result<()> {
    let path = serve_dir.join(filename);
    match fs::metadata(&path) {
        Ok(meta) if meta.is_file() => protocol::write_meta_ok(stream, meta.len(), max_header_len),
        _ => protocol::write_not_found(stream),
    }
}

fn handle_get(
    stream: &mut TcpStream,
    serve_dir: &Path,
    filename: &str,
    index: crate::ChunkIndex,
    chunk_size: ChunkSize,
    max_header_len: usize,
) -> crate::Result<()> {
    use std::io::{Read, Seek, SeekFrom};

    let path = serve_dir.join(filename);
    let mut file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return protocol::write_not_found(stream),
    };
    let size = file.metadata()?.len();

    let offset = index * chunk_size as u64;
    if offset >= size {
        return protocol::write_range_error(stream);
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; chunk_size as usize];
    let mut read = 0usize;
    loop {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    protocol::write_chunk_response(stream, index, &buf[..read], max_header_len)
}
