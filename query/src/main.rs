use clap::Parser;
use log::info;
use query::Session;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe a single game server", long_about = None)]
struct Args {
    /// Server address as host:port
    address: String,

    /// Deadline for the whole probe in milliseconds
    #[arg(short = 't', long, default_value = "5000")]
    timeout_ms: u64,

    /// Also fetch the player list
    #[arg(short = 'p', long)]
    players: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let deadline = Instant::now() + Duration::from_millis(args.timeout_ms);

    info!("Querying {}", args.address);
    let session = Session::connect(&args.address).await?;
    let server = session.probe(deadline).await?;
    let core = &server.core;

    println!("address:   {} ({})", core.address, server.ip);
    println!("hostname:  {}", core.hostname);
    println!("players:   {}/{}", core.players, core.max_players);
    println!("gamemode:  {}", core.gamemode);
    println!("language:  {}", core.language);
    println!("password:  {}", core.password);
    println!("version:   {}", core.version);

    let mut rules: Vec<_> = server.rules.iter().collect();
    rules.sort();
    for (key, value) in rules {
        println!("  {} = {}", key, value);
    }

    if args.players {
        let players = session.players(deadline).await?;
        println!("players online ({}):", players.len());
        for name in players {
            println!("  {}", name);
        }
    }

    if let Err(e) = server.core.check_plausible() {
        println!("warning: {}", e);
    }

    Ok(())
}
