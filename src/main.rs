use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use linkium::{
    audit::{file::FileAuditSink, AuditRecorder},
    config::Config,
    constants::*,
    emit_system_event,
    events::{dispatcher::EventDispatcher, model::LogLevel},
    network::{start_listener, SessionContext},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Linkium pairing-code relay")]
struct Args {
    /// Optional path to config file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the listen port (also read from the PORT environment variable)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, loaded) = Config::load(&args.config)?;
    if loaded {
        println!("{}Loaded config from: {}", ICON_PLACEHOLDER, args.config);
    } else {
        println!(
            "⚠️ No config file found at '{}', falling back to default config.",
            args.config
        );
    }
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
        config.port = port;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    // Events come up after config so a custom log path applies.
    linkium::events::init_events_from_config(config.logging.as_ref()).await;
    emit_system_event!(
        "relay",
        LogLevel::Info,
        "startup",
        Some(format!("{} {}", config.app_name(), full_version()))
    );

    let audit_cfg = config.audit();
    let audit = if audit_cfg.enabled() {
        match FileAuditSink::open(audit_cfg.dir()).await {
            Ok(sink) => AuditRecorder::spawn(Arc::new(sink), audit_cfg.queue_capacity()),
            Err(e) => {
                eprintln!("⚠️ Audit store unavailable, continuing without it: {}", e);
                AuditRecorder::disabled()
            }
        }
    } else {
        AuditRecorder::disabled()
    };

    let ctx = Arc::new(SessionContext::new(&config, audit));
    println!(
        "{}Starting {} relay on {}",
        ICON_PLACEHOLDER,
        config.app_name(),
        config.listen_addr()
    );

    let listener_ctx = ctx.clone();
    let listener_config = config.clone();
    let listener = tokio::spawn(async move {
        if let Err(e) = start_listener(&listener_config, listener_ctx).await {
            eprintln!("❌ Listener error: {}", e);
        }
    });

    tokio::select! {
        _ = listener => {}
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                eprintln!("❌ Failed to wait for shutdown signal: {}", e);
            }
        }
    }

    let snapshot = ctx.registry.snapshot().await;
    let (forwarded, dropped) = ctx.router.relay_stats();
    println!(
        "🛑 Shutting down: receivers={} senders={} forwarded={} dropped={}",
        snapshot.receivers, snapshot.senders, forwarded, dropped
    );
    emit_system_event!(
        "relay",
        LogLevel::Info,
        "shutdown",
        Some(format!(
            "codes={:?} receivers={} senders={} forwarded={} dropped={}",
            snapshot.codes, snapshot.receivers, snapshot.senders, forwarded, dropped
        ))
    );
    if let Some(d) = EventDispatcher::global() {
        d.flush().await;
    }
    Ok(())
}
