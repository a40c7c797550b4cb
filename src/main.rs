mod cli;
mod console;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use colored::*;
use console::{ConsoleEvent, ConsoleObserver};
use stargazers::config::{Configuration, JsonFileStore, MemoryStore, SettingsStore};
use stargazers::github::GitHubClient;
use stargazers::http::{FetcherSettings, HttpFetcher, ReqwestFetcher};
use stargazers::models::DisplaySize;
use stargazers::StargazerController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn apply_overrides(cli: &Cli, config: &mut Configuration) {
    if let Some(url) = &cli.url {
        config.github_url = url.clone();
    }
    if let Some(owner) = &cli.owner {
        config.owner = owner.clone();
    }
    if let Some(repo) = &cli.repo {
        config.repo = repo.clone();
    }
    if let Some(token) = &cli.token {
        config.auth_token = token.clone();
    }
    if let Some(load_all) = cli.load_all {
        config.load_all = load_all;
    }
    if let Some(delay) = cli.load_delay {
        config.delays.load = delay;
    }
    if let Some(delay) = cli.avatar_delay {
        config.delays.load_avatar = delay;
    }
    if let Some(delay) = cli.spinner_delay {
        config.delays.spinner = delay;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stargazers=info")),
        )
        .init();

    let cli = Cli::parse();

    let store = Arc::new(
        JsonFileStore::open(&cli.settings)
            .with_context(|| format!("Failed to read settings from {}", cli.settings.display()))?,
    );

    let saved = Configuration::load(store.as_ref());
    let mut config = saved.clone();
    apply_overrides(&cli, &mut config);
    config.validate().context("Invalid settings")?;

    println!(
        "{} {}",
        "Stargazers of".bold().green(),
        format!("{}/{}", config.owner, config.repo).bold()
    );
    println!("{}\n", "=".repeat(50).dimmed());

    let list_fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(FetcherSettings::stargazers())?);
    let avatar_fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(FetcherSettings::avatars())?);

    if cli.verify || config.requires_probe(&saved) {
        match GitHubClient::new(list_fetcher.clone()).probe(&config).await {
            Ok(url) => println!("✅ {} {}", "Source OK:".green(), url),
            Err(e) if cli.force => eprintln!("⚠️  {} {}", "Source check failed:".yellow(), e),
            Err(e) => {
                return Err(e).context("Source check failed, use --force to continue anyway")
            }
        }
    }

    // The controller reads its settings from a store; only touch the file
    // when asked to.
    let runtime_store: Arc<dyn SettingsStore> = if !cli.save {
        Arc::new(MemoryStore::with_configuration(&config))
    } else if let Err(e) = config.save(store.as_ref()) {
        // Keep running on the overrides even though the file was not written
        eprintln!("⚠️  {}", e.to_string().yellow());
        Arc::new(MemoryStore::with_configuration(&config))
    } else {
        println!("💾 Settings saved to {}", store.path().display());
        store
    };

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let observer = Arc::new(ConsoleObserver::new(cli.rows, events_tx));
    let controller =
        StargazerController::spawn(runtime_store, list_fetcher, avatar_fetcher, observer).await?;

    println!("Press Ctrl+C to stop\n");
    controller.start();

    let display = DisplaySize::new(cli.avatar_size, cli.avatar_size);
    let mut pages_left = cli.pages;
    let mut stopping = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !stopping => {
                println!("\n🛑 Stopping...");
                stopping = true;
                if !controller.is_loading() {
                    break;
                }
                controller.stop();
            }
            event = events.recv() => match event {
                Some(ConsoleEvent::Inserted(stargazers)) => {
                    for stargazer in &stargazers {
                        controller.avatars().ensure(stargazer, display);
                    }
                }
                Some(ConsoleEvent::SessionEnded { success }) => {
                    if success && !stopping && pages_left > 0 {
                        pages_left -= 1;
                        controller.load_more();
                    } else {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    if !stopping {
        tokio::select! {
            _ = controller.avatars().wait_idle() => {}
            _ = tokio::signal::ctrl_c() => println!("\n🛑 Skipping remaining avatars"),
        }
    }

    let listed = controller.snapshot().await?;
    println!(
        "\n📊 {} stargazers listed, {} avatars requested",
        listed.len(),
        controller.avatars().fetches_started()
    );

    controller.shutdown();
    // Give the actor time to stop its session
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
