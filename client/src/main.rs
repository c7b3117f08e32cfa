use clap::Parser;
use client::autopilot::Autopilot;
use client::network::{resolve_server, spawn_network_thread, ClientConfig, ClientError};
use client::world::SharedWorld;
use env_logger::Env;
use log::{error, info};
use shared::{DEFAULT_PORT, DEFAULT_TICKRATE};
use std::thread;
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless entity sync client")]
struct Args {
    /// Server to connect to, as host:port
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    server: String,

    /// Position updates sent per second
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TICKRATE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    tickrate: u32,

    /// Milliseconds to wait for the server to accept the connection
    #[arg(long = "connect_timeout_ms", default_value_t = 15000)]
    connect_timeout_ms: u64,

    /// Milliseconds of server silence before giving up
    #[arg(long = "peer_timeout_ms", default_value_t = 5000)]
    peer_timeout_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?
        .block_on(resolve_server(&args.server))?;
    let config = ClientConfig {
        server_addr,
        tickrate: args.tickrate,
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        peer_timeout: Duration::from_millis(args.peer_timeout_ms),
    };

    info!("Starting client...");
    let world = SharedWorld::new();
    let network = spawn_network_thread(config, world.clone())?;
    let mut autopilot = Autopilot::new(rand::thread_rng());

    let mut last_frame = Instant::now();
    while !network.is_finished() {
        thread::sleep(FRAME_INTERVAL);
        let now = Instant::now();
        autopilot.frame(&world, now - last_frame);
        last_frame = now;
    }

    match network.join() {
        Ok(Ok(end)) => {
            info!("Session ended: {:?}", end);
            Ok(())
        }
        Ok(Err(e @ ClientError::ConnectTimeout { .. })) => {
            error!("Could not connect: {}", e);
            Err(e.into())
        }
        Ok(Err(e)) => {
            error!("Network error: {}", e);
            Err(e.into())
        }
        Err(_) => Err("network thread panicked".into()),
    }
}
