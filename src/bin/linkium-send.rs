use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::time::Duration;

use linkium::{
    config::Config,
    network::{ClientError, Command, PairingCode, RelayConnection},
};

/// linkium-send: link to a receiver by pairing code and send it one payload.
#[derive(Parser, Debug)]
#[command(name = "linkium-send", version, about = "Send a payload to a paired receiver")]
struct Cli {
    /// Path to config file (TOML), used for the default relay address
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Relay address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Receiver pairing code
    #[arg(long)]
    code: String,

    /// Receiver command to send
    #[arg(long, value_enum, conflicts_with = "payload")]
    command: Option<CommandArg>,

    /// Program name for `--command open`
    #[arg(long)]
    program: Option<String>,

    /// Arbitrary JSON object to relay
    payload: Option<String>,

    /// How long to keep printing replies, in milliseconds
    #[arg(long, default_value_t = 2000)]
    wait_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CommandArg {
    #[value(name = "get_programs")]
    GetPrograms,
    Open,
    #[value(name = "regenerate_code")]
    RegenerateCode,
}

fn build_payload(cli: &Cli) -> anyhow::Result<Option<Value>> {
    if let Some(raw) = &cli.payload {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            anyhow::bail!("payload must be a JSON object");
        }
        return Ok(Some(value));
    }
    let command = match cli.command {
        None => return Ok(None),
        Some(CommandArg::GetPrograms) => Command::GetPrograms,
        Some(CommandArg::RegenerateCode) => Command::RegenerateCode,
        Some(CommandArg::Open) => Command::Open {
            program: cli
                .program
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--command open needs --program"))?,
        },
    };
    Ok(Some(command.to_value()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, _) = Config::load(&cli.config)?;
    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| config.receiver().server());
    let payload = build_payload(&cli)?;
    let wait = Duration::from_millis(cli.wait_ms);

    let mut conn = RelayConnection::connect(&server).await?;
    let code = PairingCode::new(cli.code.trim());
    match conn.link(&code, wait).await {
        Ok(()) => println!("🔗 Linked to {}", code),
        Err(ClientError::InvalidCode) => {
            eprintln!("❌ Invalid code: {}", code);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(payload) = payload {
        conn.send(&payload).await?;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, conn.next_line()).await {
                Ok(Ok(Some(line))) => println!("{}", line),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
    }
    conn.shutdown().await;
    Ok(())
}
