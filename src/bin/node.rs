//! `loopswarm-node`: a single node in a loopback file-sharing swarm.
//!
//! Claims a port in the given range, starts seeding the files already in
//! its serving directory, then hands control to the interactive menu.

use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use loopswarm::conf::NodeConf;
use loopswarm::menu::Menu;
use loopswarm::port_alloc;
use loopswarm::server::SeedServer;

/// Starts a node that serves the files in its directory and can fetch
/// files from other nodes in the same port range.
#[derive(Parser, Debug)]
#[command(name = "loopswarm-node", version, about)]
struct Args {
    /// Inclusive port range to claim a listening port from, and to scan
    /// for peers in, formatted `start:end`.
    #[arg(long, default_value = "9000:9100", value_parser = parse_port_range)]
    port_range: (u16, u16),

    /// The root directory under which this node's serving directory
    /// (`root/<port>/`) lives.
    #[arg(long, default_value = "./loopswarm-data")]
    root: std::path::PathBuf,

    /// Fixed chunk size, in bytes, for the whole swarm.
    #[arg(long, default_value_t = loopswarm::conf::DEFAULT_CHUNK_SIZE)]
    chunk_size: u32,

    /// Log verbosity.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_port_range(s: &str) -> Result<(u16, u16), String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {:?}", s))?;
    let start: u16 = start.parse().map_err(|_| format!("bad start port {:?}", start))?;
    let end: u16 = end.parse().map_err(|_| format!("bad end port {:?}", end))?;
    if start > end {
        return Err(format!("start port {} is after end port {}", start, end));
    }
    Ok((start, end))
}

fn main() -> ExitCode {
    let args = Args::parse();
    loopswarm::logging::init(args.log_level);

    let mut conf = NodeConf::new(&args.root);
    conf.download.chunk_size = args.chunk_size;

    let (port, listener) = match port_alloc::claim(args.port_range.0, args.port_range.1, conf.net.backlog) {
        Ok(claimed) => claimed,
        Err(e) => {
            log::error!("failed to claim a port in {:?}: {}", args.port_range, e);
            return ExitCode::FAILURE;
        }
    };

    let serve_dir = conf.download.port_dir(port);
    if let Err(e) = std::fs::create_dir_all(&serve_dir) {
        log::error!("failed to create serving directory {:?}: {}", serve_dir, e);
        return ExitCode::FAILURE;
    }

    log::info!("loopswarm node listening on 127.0.0.1:{}, serving {:?}", port, serve_dir);
    let server = SeedServer::new();
    server.start(listener, serve_dir, conf.net.clone(), conf.download.chunk_size);

    let menu = Menu::new(port, args.port_range, conf);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let result = menu.run(stdin.lock(), stdout.lock());

    server.stop();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("menu loop ended with an error: {}", e);
            ExitCode::FAILURE
        }
    }
}
