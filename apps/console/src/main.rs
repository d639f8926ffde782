use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::load_settings_from, connector_from_settings, HttpMetadataStore, MetadataStore,
    MintRevealOrchestrator, MissingWallet, OrchestratorContext, RevealState, StageSequencer,
};
use shared::{domain::TokenHash, protocol::GenerativeTokenMetadata};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = client_core::config::DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the signing pipeline of a minted iteration until it is revealed.
    Reveal {
        #[arg(long)]
        hash: String,
    },
    /// Pin a metadata document (JSON) on the file API and print its cid.
    UploadMetadata {
        #[arg(long)]
        file: PathBuf,
    },
}

/// Waits for the progress printer; returns false when it panicked or was cancelled.
async fn finish_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(err) => {
            warn!("console: progress printer stopped: {err}");
            false
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let settings = load_settings_from(&cli.config);
    info!(
        indexer = %settings.api_indexer_url,
        transport = ?settings.push_transport,
        "console: settings loaded"
    );

    match cli.command {
        Command::Reveal { hash } => {
            let orchestrator = MintRevealOrchestrator::new(OrchestratorContext {
                wallet: Arc::new(MissingWallet),
                metadata: Arc::new(HttpMetadataStore::new(settings.file_api_root.clone())),
                push: connector_from_settings(&settings)?,
                reconnect: settings.reconnect_policy(),
                user: None,
            });
            let reveal = orchestrator.reveal_workflow();

            let mut states = reveal.subscribe();
            let sequencer = StageSequencer::default();
            let printer = tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    let state = states.borrow_and_update().clone();
                    if let RevealState::Tracking {
                        position, latest, ..
                    } = state
                    {
                        let entries = sequencer.entries(latest.as_ref());
                        let index = (position as usize).min(entries.len().saturating_sub(1));
                        println!("[{position}/{}] {}", entries.len(), entries[index]);
                    }
                }
            });

            let outcome = reveal.track(TokenHash::new(hash)).await;
            drop(reveal);
            finish_printer(printer).await;

            match outcome {
                Ok(token) => {
                    println!("revealed: {}", token.view_uri());
                    println!("preview: {}", token.preview_uri());
                    for feature in &token.features {
                        println!("feature {} = {}", feature.name, feature.value);
                    }
                }
                Err(failure) => {
                    if failure.recommend_refresh() {
                        eprintln!("the signing server may have moved on; run the command again");
                    }
                    return Err(failure.into());
                }
            }
        }
        Command::UploadMetadata { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let document: GenerativeTokenMetadata = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a metadata document", file.display()))?;
            settings.file_api_url()?;
            let store = HttpMetadataStore::new(settings.file_api_root.clone());
            let cid = store.upload(&document).await?;
            println!("pinned {} at {}", document.name, cid.ipfs_uri());
        }
    }

    Ok(())
}
