use clap::Parser;
use env_logger::Env;
use server::config::{ServerArgs, ServerConfig};
use server::network::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = ServerArgs::parse();
    let config = ServerConfig::from(args);

    let mut server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
