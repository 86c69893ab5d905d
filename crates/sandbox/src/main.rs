mod avatar;
mod config;
mod sandbox;
mod simulation;

use anyhow::Result;
use clap::Parser;

use config::SandboxConfig;
use sandbox::Sandbox;
use tether::LatencyConfig;

#[derive(Parser)]
#[command(name = "tether-sandbox")]
#[command(about = "Runs an arbiter and clients in-process and reports whether they converge")]
struct Args {
    #[arg(short, long, default_value_t = tether::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    #[arg(long, default_value_t = 300, help = "Ticks of movement before settling")]
    ticks: u32,

    #[arg(short, long, default_value_t = tether::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = 2, help = "Arbiter-owned avatars")]
    beacons: usize,

    #[arg(long, help = "Also attach a listen peer sharing the arbiter's registry")]
    listen_peer: bool,

    #[arg(long, help = "Enable latency simulation")]
    simulate_latency: bool,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Seed for the latency simulators")]
    seed: Option<u64>,

    #[arg(long, help = "Exit with an error unless every client converged")]
    require_convergence: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SandboxConfig {
        port: args.port,
        clients: args.clients,
        ticks: args.ticks,
        tick_rate: args.tick_rate,
        beacons: args.beacons,
        listen_peer: args.listen_peer,
        latency: LatencyConfig {
            simulate_latency: args.simulate_latency,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            simulate_packet_loss: args.simulate_packet_loss,
            packet_loss_chance: args.loss_percent,
            seed: args.seed,
        },
    };

    let mut sandbox = Sandbox::new(config)?;
    let report = sandbox.run();

    log::info!(
        "Ran {} frames, arbiter holds {} entities",
        report.frames,
        report.arbiter_entities
    );
    for client in &report.clients {
        log::info!(
            "{} (peer {:?}): {}/{} entities match, {} sent, {} received, {} delayed, {} dropped",
            client.label,
            client.peer_id,
            client.matching,
            report.arbiter_entities,
            client.stats.packets_sent,
            client.stats.packets_received,
            client.stats.packets_delayed,
            client.stats.packets_dropped,
        );
    }

    if report.converged() {
        log::info!("All clients converged");
    } else if args.require_convergence {
        anyhow::bail!("Clients did not converge after {} frames", report.frames);
    } else {
        log::warn!("Some clients did not converge");
    }
    Ok(())
}
