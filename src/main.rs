use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use inbox_scout::core::config::{self, ScoutConfig};
use inbox_scout::{server, AppState, InboxBot, ListingsClient};

#[derive(Parser)]
#[command(name = "inbox-scout", version, about = "Chat automation for the internship platform")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and verify the session; with a conversation, watch it live until ctrl-c.
    Start {
        /// Conversation to open and watch. Omit to stop after the login.
        #[arg(long)]
        conversation: Option<String>,
        /// Run with a visible browser window.
        #[arg(long)]
        headful: bool,
    },
    /// Log in, extract one conversation's history and print it as JSON.
    FetchHistory {
        #[arg(long)]
        conversation: String,
        /// Keep only this many of the newest messages.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        headful: bool,
    },
    /// Log in and send a single message.
    SendMessage {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        headful: bool,
    },
    /// Serve the HTTP tool surface.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        headful: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = config::load_scout_config();

    match cli.command {
        Command::Start {
            conversation,
            headful,
        } => start(config, conversation.as_deref(), headful).await,
        Command::FetchHistory {
            conversation,
            limit,
            headful,
        } => fetch_history(config, &conversation, limit, headful).await,
        Command::SendMessage {
            conversation,
            message,
            headful,
        } => send_message(config, &conversation, &message, headful).await,
        Command::Serve { port, headful } => serve(config, port, headful).await,
    }
}

async fn start(
    config: ScoutConfig,
    conversation: Option<&str>,
    headful: bool,
) -> anyhow::Result<()> {
    let bot = Arc::new(InboxBot::new(config, !headful)?);

    let method = bot.login().await?;
    info!("session ready ({:?})", method);

    let Some(conversation) = conversation else {
        info!("no conversation given — session verified, nothing to watch");
        bot.shutdown().await;
        return Ok(());
    };

    let history = bot.fetch_history(conversation, None).await?;
    info!(
        "{} messages on record for {}",
        history.len(),
        conversation
    );

    let watcher = bot.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("🛑 ctrl-c — winding down the watch");
        watcher.stop_watch();
    });

    let fresh = bot.listen_live(conversation, None).await?;
    info!("watch ended with {} new messages", fresh.len());

    bot.shutdown().await;
    Ok(())
}

async fn fetch_history(
    config: ScoutConfig,
    conversation: &str,
    limit: Option<usize>,
    headful: bool,
) -> anyhow::Result<()> {
    let bot = InboxBot::new(config, !headful)?;
    let messages = bot.fetch_history(conversation, limit).await?;
    println!("{}", serde_json::to_string_pretty(&messages)?);
    bot.shutdown().await;
    Ok(())
}

async fn send_message(
    config: ScoutConfig,
    conversation: &str,
    message: &str,
    headful: bool,
) -> anyhow::Result<()> {
    let bot = InboxBot::new(config, !headful)?;
    let echo = bot.send_message(conversation, message).await?;
    println!("{}", serde_json::to_string_pretty(&echo)?);
    bot.shutdown().await;
    Ok(())
}

async fn serve(config: ScoutConfig, port: Option<u16>, headful: bool) -> anyhow::Result<()> {
    let listings = Arc::new(ListingsClient::new(&config.listings));
    let bot = Arc::new(InboxBot::new(config, !headful)?);
    let state = Arc::new(AppState::new(bot, listings));

    let port = server::resolve_port(port);
    server::run(state, port).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_parses_without_a_conversation() {
        let cli = Cli::try_parse_from(["inbox-scout", "start"]).unwrap();
        match cli.command {
            Command::Start {
                conversation,
                headful,
            } => {
                assert!(conversation.is_none());
                assert!(!headful);
            }
            _ => panic!("expected the start command"),
        }
    }

    #[test]
    fn start_accepts_a_watch_target() {
        let cli =
            Cli::try_parse_from(["inbox-scout", "start", "--conversation", "c-77", "--headful"])
                .unwrap();
        match cli.command {
            Command::Start {
                conversation,
                headful,
            } => {
                assert_eq!(conversation.as_deref(), Some("c-77"));
                assert!(headful);
            }
            _ => panic!("expected the start command"),
        }
    }
}
