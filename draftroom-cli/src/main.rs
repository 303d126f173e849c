//! draftroom - two collaborators editing one email draft.
//!
//! Runs the session manager end to end over the in-process hub and store:
//! both users join a shared draft, see each other's presence, and one of
//! them types a subject that reaches the other after a single debounced
//! write.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use uuid::Uuid;

use draftroom_collab::{
    AuthState, CollabConfig, CurrentUser, LocalHub, MemoryStore, SessionEvent, SessionManager,
};
use draftroom_core::DocumentPatch;

type Client = SessionManager<MemoryStore, LocalHub>;

#[derive(Parser)]
#[command(name = "draftroom", version)]
struct Cli {
    /// TOML file with session settings
    #[arg(short, long, value_name = "FILE", env = "DRAFTROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the content flush debounce window
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Subject the first collaborator types, one keystroke at a time
    #[arg(long, default_value = "Hi there")]
    subject: String,
}

fn load_config(cli: &Cli) -> anyhow::Result<CollabConfig> {
    let mut config = match &cli.config {
        Some(path) => CollabConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CollabConfig::default(),
    };
    if let Some(ms) = cli.debounce_ms {
        config.debounce_ms = ms;
    }
    Ok(config)
}

fn client(
    config: &CollabConfig,
    hub: &LocalHub,
    store: &Arc<MemoryStore>,
    user: &CurrentUser,
) -> Client {
    SessionManager::new(
        config.clone(),
        AuthState::signed_in(user.clone()),
        store.clone(),
        Arc::new(hub.clone()),
    )
}

fn print_presence(label: &str, client: &Client) {
    for peer in client.presence() {
        println!(
            "  {label} sees {} [{}] {} at {}",
            peer.user_name,
            peer.initials(),
            peer.color,
            peer.cursor_position
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = load_config(&cli)?;
    info!(
        "draftroom demo: debounce {}ms, topic prefix '{}'",
        config.debounce_ms, config.topic_prefix
    );

    let hub = LocalHub::new(&config);
    let store = MemoryStore::with_feed(hub.clone()).shared();

    let alice =
        CurrentUser::new(Uuid::new_v4(), "alice@example.com").with_display_name("Alice Moreau");
    let bob = CurrentUser::new(Uuid::new_v4(), "bob@example.com");

    let mut alice_client = client(&config, &hub, &store, &alice);
    let mut bob_client = client(&config, &hub, &store, &bob);
    let mut alice_events = alice_client
        .take_event_rx()
        .context("event receiver already taken")?;

    // Alice drafts, shares with Bob, both join.
    let doc = alice_client.create_document().await?;
    store.share(doc, alice.id, bob.id).await?;
    alice_client.open(doc).await?;
    bob_client.open(doc).await?;
    alice_client.pump_pending().await?;
    bob_client.pump_pending().await?;

    println!("draft {doc}");
    print_presence("Alice", &alice_client);
    print_presence("Bob", &bob_client);

    // Alice types the subject; only the final value is written.
    let mut typed = String::new();
    for ch in cli.subject.chars() {
        typed.push(ch);
        alice_client.update_content(DocumentPatch::subject(typed.clone()))?;
        alice_client.update_presence(typed.chars().count()).await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(config.debounce() + Duration::from_millis(100)).await;

    bob_client.pump_pending().await?;
    let seen = bob_client
        .current_document()
        .map(|d| d.subject.clone())
        .unwrap_or_default();
    println!(
        "Bob reads subject {seen:?} after {} write(s)",
        store.write_count().await
    );
    print_presence("Bob", &bob_client);

    while let Ok(event) = alice_events.try_recv() {
        if let SessionEvent::FlushFailed { error, .. } = event {
            println!("  flush failed: {error}");
        }
    }

    for change in alice_client.recent_changes().await? {
        println!(
            "  {} {} ({})",
            change.created_at.format("%H:%M:%S"),
            change.kind,
            change.user_id
        );
    }

    bob_client.close().await?;
    alice_client.close().await?;
    info!("hub stats: {:?}", hub.stats().await);
    Ok(())
}
