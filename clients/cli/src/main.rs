//! Hushwire CLI
//!
//! Identity key generation, a loopback chat demo over the in-memory relay,
//! and configuration inspection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hushwire_crypto::entropy::{EntropyPool, EntropySource};
use hushwire_crypto::identity::IdentityKeyService;
use hushwire_protocol::{ChannelConfig, ChannelSession, Content, Incoming, MemoryRelay};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::CliConfig;

/// Hushwire - authenticated, per-message re-keyed channel
#[derive(Parser)]
#[command(name = "hushwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity key and print it
    Keygen,

    /// Run two local sessions through an in-memory relay
    Demo {
        /// Messages to exchange, alternating sender starting with alice
        #[arg(value_name = "MESSAGE")]
        messages: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => CliConfig::load_or_default(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CliConfig::default(),
    };

    match cli.command {
        Commands::Keygen => keygen(&config.channel).await?,
        Commands::Demo { messages } => demo(config.channel, messages).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

async fn seeded_pool(config: &ChannelConfig) -> anyhow::Result<Arc<EntropyPool>> {
    let entropy = config.entropy.clone();
    let pool = tokio::task::spawn_blocking(move || EntropyPool::seeded(entropy)).await??;
    Ok(Arc::new(pool))
}

async fn keygen(config: &ChannelConfig) -> anyhow::Result<()> {
    println!("finding entropy...");
    let pool = seeded_pool(config).await?;

    println!("generating key...");
    let service = IdentityKeyService::new(pool, config.identity.clone());
    let identity = tokio::task::spawn_blocking(move || service.generate()).await??;
    let public = identity.public_key();

    println!();
    println!("Algorithm:   {}", identity.algorithm().name());
    println!("Public key:  {}", public.to_hex());
    println!("Fingerprint: {}", public.fingerprint_hex());
    Ok(())
}

async fn demo(config: ChannelConfig, messages: Vec<String>) -> anyhow::Result<()> {
    let messages = if messages.is_empty() {
        vec!["hello".to_string(), "hi".to_string(), "hello".to_string()]
    } else {
        messages
    };

    let pool = seeded_pool(&config).await?;
    let reseeder = pool.spawn_reseeder();
    let entropy: Arc<dyn EntropySource> = pool.clone();

    let relay = MemoryRelay::new();
    let (transport, events) = relay.connect();
    let mut alice = ChannelSession::new(config.clone(), entropy.clone(), transport, events)?;
    let (transport, events) = relay.connect();
    let mut bob = ChannelSession::new(config, entropy, transport, events)?;

    let mut status = alice.subscribe();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("[alice] {}", current);
        }
    });

    let room_alice = alice.start().await?;
    let room_bob = bob.start().await?;
    println!("alice opened room {}, bob opened room {}", room_alice, room_bob);

    alice.connect_to(room_bob).await?;
    let bob_id = alice.await_peer().await?;
    let alice_id = bob.await_peer().await?;
    println!("alice sees bob as {}", bob_id.fingerprint_hex());
    println!("bob sees alice as {}", alice_id.fingerprint_hex());

    for (i, text) in messages.iter().enumerate() {
        let (sender, receiver, from, to) = if i % 2 == 0 {
            (&mut alice, &mut bob, "alice", "bob")
        } else {
            (&mut bob, &mut alice, "bob", "alice")
        };

        sender.send(&Content::text(text.as_str())).await?;
        match receiver.receive().await? {
            Incoming::Message(Content::Text(received)) => {
                println!("{} -> {}: {}", from, to, received)
            }
            Incoming::Message(other) => println!("{} -> {}: <{}>", from, to, other.kind()),
            Incoming::Undeliverable => println!("{} -> {}: [damaged]", from, to),
            Incoming::RecheckRequested => println!("{} asked {} to recheck", from, to),
        }
    }

    alice.disconnect().await?;
    match bob.receive().await {
        Err(e) => println!("bob: session ended ({})", e),
        Ok(other) => println!("bob: unexpected {:?}", other),
    }

    info!(reseeds = pool.reseed_count(), "Demo finished");
    reseeder.abort();
    drop(alice);
    let _ = watcher.await;
    Ok(())
}
