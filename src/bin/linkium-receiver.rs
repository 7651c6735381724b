use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use linkium::{
    agent::{
        AgentDeps, ConsoleObserver, FileCodeStore, JsonProgramCatalog, RandomCodeGenerator,
        ReceiverAgent, ShellExecutor,
    },
    config::Config,
    constants::ICON_PLACEHOLDER,
    events::dispatcher::EventDispatcher,
};

/// linkium-receiver: keeps this device registered with the relay under its
/// pairing code and runs the commands paired senders send.
#[derive(Parser, Debug)]
#[command(name = "linkium-receiver", version, about = "Linkium receiver agent")]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Relay address (host:port); overrides [receiver].server
    #[arg(short, long)]
    server: Option<String>,

    /// Seconds to wait before redialing after the session drops
    #[arg(long)]
    retry_delay: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, loaded) = Config::load(&cli.config)?;
    if loaded {
        println!("{}Loaded config from: {}", ICON_PLACEHOLDER, cli.config);
    }
    linkium::events::init_events_from_config(config.logging.as_ref()).await;

    let receiver = config.receiver();
    let server = cli.server.unwrap_or_else(|| receiver.server());
    let retry_delay = cli
        .retry_delay
        .map(Duration::from_secs)
        .unwrap_or_else(|| receiver.retry_delay());

    let catalog = JsonProgramCatalog::new(receiver.apps_path());
    if let Err(e) = catalog.ensure_exists() {
        eprintln!(
            "⚠️ Could not create program list at {}: {}",
            receiver.apps_path().display(),
            e
        );
    }

    let deps = AgentDeps {
        codes: Arc::new(FileCodeStore::new(receiver.code_path())),
        generator: Arc::new(RandomCodeGenerator),
        catalog: Arc::new(catalog),
        executor: Arc::new(ShellExecutor),
        observer: Arc::new(ConsoleObserver),
    };
    let agent = ReceiverAgent::new(server.clone(), retry_delay, deps)?;
    let handle = agent.handle();
    println!("{}Connecting to relay at {}", ICON_PLACEHOLDER, server);

    let task = tokio::spawn(agent.run());
    tokio::signal::ctrl_c().await?;
    println!("🛑 Stopping receiver (code {})", handle.code());
    handle.stop();
    let _ = task.await;

    if let Some(d) = EventDispatcher::global() {
        d.flush().await;
    }
    Ok(())
}
