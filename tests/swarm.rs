//! End-to-end tests: real `SeedServer`s on real loopback sockets, driven
//! through `DiscoveryClient` and `Downloader` exactly as `loopswarm-node`
//! uses them. Each test is one of the scenarios a two-or-more-node swarm
//! must get right.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use loopswarm::conf::{DownloadConf, NetConf};
use loopswarm::discovery::DiscoveryClient;
use loopswarm::download::Downloader;
use loopswarm::progress::DownloadProgress;
use loopswarm::server::SeedServer;
use loopswarm::PeerEndpoint;

const CHUNK_SIZE: u32 = 64;

fn temp_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "loopswarm-it-{}-{}-{}",
        name,
        std::process::id(),
        rand::random::<u32>()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn start_node(serve_dir: PathBuf) -> (SeedServer, u16) {
    fs::create_dir_all(&serve_dir).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = SeedServer::new();
    server.start(listener, serve_dir, NetConf::default(), CHUNK_SIZE);
    (server, port)
}

fn fast_net_conf() -> NetConf {
    NetConf {
        io_timeout: Duration::from_millis(300),
        ..NetConf::default()
    }
}

fn fast_download_conf(root: PathBuf) -> DownloadConf {
    DownloadConf {
        chunk_size: CHUNK_SIZE,
        initial_backoff_ms: 20,
        max_backoff_ms: 80,
        ..DownloadConf::new(root)
    }
}

#[test]
fn three_node_swarm_discovers_and_downloads_across_peers() {
    let seeder_a_dir = temp_dir("swarm-a");
    fs::write(seeder_a_dir.join("movie.bin"), vec![9u8; CHUNK_SIZE as usize * 3]).unwrap();
    let (_server_a, port_a) = start_node(seeder_a_dir);

    let seeder_b_dir = temp_dir("swarm-b");
    fs::write(seeder_b_dir.join("movie.bin"), vec![9u8; CHUNK_SIZE as usize * 3]).unwrap();
    fs::write(seeder_b_dir.join("notes.txt"), b"hello swarm").unwrap();
    let (_server_b, port_b) = start_node(seeder_b_dir);

    let leecher_root = temp_dir("swarm-leecher");

    let discovery = DiscoveryClient::new(fast_net_conf());
    let candidates = vec![PeerEndpoint::loopback(port_a), PeerEndpoint::loopback(port_b)];
    let leecher_self = PeerEndpoint::loopback(0); // not one of the candidates, so nothing is excluded
    let mut entries = discovery.scan(leecher_self, &candidates);
    entries.sort_by(|a, b| a.filename.cmp(&b.filename));

    assert_eq!(entries.len(), 2);
    let movie = entries.iter().find(|e| e.filename == "movie.bin").unwrap();
    assert_eq!(
        movie.seeders,
        vec![PeerEndpoint::loopback(port_a), PeerEndpoint::loopback(port_b)]
    );

    let downloader = Downloader::new(fast_net_conf(), fast_download_conf(leecher_root.clone()));
    let progress = DownloadProgress::new();
    downloader
        .download("movie.bin", &movie.seeders, 9999, Some(&progress))
        .unwrap();

    let downloaded = fs::read(leecher_root.join("9999").join("movie.bin")).unwrap();
    assert_eq!(downloaded, vec![9u8; CHUNK_SIZE as usize * 3]);
    assert!(progress.is_success());
}

#[test]
fn download_survives_a_seeder_going_down_mid_swarm() {
    // one seeder that will be dropped before the download starts, one
    // that stays up: the downloader must complete using only the
    // survivor once the first seeder refuses every connection.
    let flaky_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let flaky_port = flaky_listener.local_addr().unwrap().port();
    drop(flaky_listener); // now nothing is listening there

    let stable_dir = temp_dir("stable-seeder");
    fs::write(stable_dir.join("a.bin"), vec![5u8; CHUNK_SIZE as usize * 2 + 10]).unwrap();
    let (_server, stable_port) = start_node(stable_dir);

    let leecher_root = temp_dir("stable-leecher");
    let downloader = Downloader::new(fast_net_conf(), fast_download_conf(leecher_root.clone()));
    let seeders = vec![
        PeerEndpoint::loopback(flaky_port),
        PeerEndpoint::loopback(stable_port),
    ];
    downloader.download("a.bin", &seeders, 1, None).unwrap();

    let data = fs::read(leecher_root.join("1").join("a.bin")).unwrap();
    assert_eq!(data.len(), CHUNK_SIZE as usize * 2 + 10);
    assert!(data.iter().all(|&b| b == 5));
}

#[test]
fn scan_excludes_the_scanning_node_itself() {
    let dir = temp_dir("self-exclude");
    fs::write(dir.join("a.bin"), b"x").unwrap();
    let (_server, port) = start_node(dir);

    let discovery = DiscoveryClient::new(fast_net_conf());
    let candidates = vec![PeerEndpoint::loopback(port)];
    let entries = discovery.scan(PeerEndpoint::loopback(port), &candidates);
    assert!(entries.is_empty());
}

#[test]
fn download_recovers_from_a_transient_outage() {
    // the port is bound (so connects succeed at the TCP level) well
    // before the seeding server starts actually answering requests,
    // simulating a seeder that's briefly unresponsive: the downloader's
    // first round of GETs times out (`Temp`) and retries until the
    // server comes up and starts answering.
    let seeder_dir = temp_dir("recovering-seeder");
    fs::write(seeder_dir.join("a.bin"), vec![3u8; CHUNK_SIZE as usize * 2]).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        let server = SeedServer::new();
        server.start(listener, seeder_dir, NetConf::default(), CHUNK_SIZE);
        // keep the server alive for the rest of the test process
        std::mem::forget(server);
    });

    let leecher_root = temp_dir("recovering-leecher");
    let downloader = Downloader::new(fast_net_conf(), fast_download_conf(leecher_root.clone()));
    let progress = DownloadProgress::new();
    downloader
        .download("a.bin", &[PeerEndpoint::loopback(port)], 1, Some(&progress))
        .unwrap();

    let data = fs::read(leecher_root.join("1").join("a.bin")).unwrap();
    assert_eq!(data.len(), CHUNK_SIZE as usize * 2);
    assert!(progress.is_success());
}

#[test]
fn two_concurrent_downloads_of_different_files_both_complete() {
    let dir = temp_dir("concurrent-seeder");
    fs::write(dir.join("a.bin"), vec![1u8; CHUNK_SIZE as usize * 4]).unwrap();
    fs::write(dir.join("b.bin"), vec![2u8; CHUNK_SIZE as usize * 4]).unwrap();
    let (_server, port) = start_node(dir);

    let leecher_root = temp_dir("concurrent-leecher");
    let seeders = vec![PeerEndpoint::loopback(port)];

    let root_a = leecher_root.clone();
    let seeders_a = seeders.clone();
    let handle_a = std::thread::spawn(move || {
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(root_a));
        downloader.download("a.bin", &seeders_a, 1, None)
    });

    let root_b = leecher_root.clone();
    let seeders_b = seeders.clone();
    let handle_b = std::thread::spawn(move || {
        let downloader = Downloader::new(fast_net_conf(), fast_download_conf(root_b));
        downloader.download("b.bin", &seeders_b, 2, None)
    });

    handle_a.join().unwrap().unwrap();
    handle_b.join().unwrap().unwrap();

    assert_eq!(
        fs::read(leecher_root.join("1").join("a.bin")).unwrap(),
        vec![1u8; CHUNK_SIZE as usize * 4]
    );
    assert_eq!(
        fs::read(leecher_root.join("2").join("b.bin")).unwrap(),
        vec![2u8; CHUNK_SIZE as usize * 4]
    );
}
