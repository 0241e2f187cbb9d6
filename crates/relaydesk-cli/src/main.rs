use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaydesk_core::Coordinator;
use relaydesk_core::args::CommonArgs;
use relaydesk_core::config::Config;
use relaydesk_core::gateway::run_gateway;
use relaydesk_core::logging;
use relaydesk_core::threads::{
    EventKind, SpawnOptions, ThreadKind, ThreadStatus, TranscriptSummarizer,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "relaydesk",
    version,
    about = "relaydesk: conversation locks, ask-user bridge and thread tree for agent assistants"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP bridge, observer socket and watchdog in the foreground
    Gateway(GatewayArgs),
    /// Inspect and maintain the thread tree
    #[command(subcommand)]
    Threads(ThreadCommands),
}

#[derive(Debug, clap::Args)]
struct GatewayArgs {
    /// HTTP bridge address (overrides gateway.http_listen)
    #[arg(long, value_name = "ADDR")]
    http_listen: Option<String>,
    /// Observer WebSocket address (overrides gateway.ws_listen)
    #[arg(long, value_name = "ADDR")]
    ws_listen: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ThreadCommands {
    /// Print the thread forest as JSON
    Tree,
    /// Create a root thread
    Create {
        /// chat, system_log or task
        #[arg(long, default_value = "chat")]
        kind: String,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long = "name")]
        display_name: Option<String>,
    },
    /// Print a thread's history
    Events { thread_id: String },
    /// Record one history entry
    Append {
        thread_id: String,
        /// user_message, assistant_message, tool_use, tool_result or system
        #[arg(long, default_value = "user_message")]
        kind: String,
        content: String,
    },
    /// Fork a thread into a sub-thread
    Fork {
        parent_id: String,
        #[arg(long = "name")]
        display_name: String,
        /// Inherit history up to and including this event (default: all)
        #[arg(long = "at", value_name = "EVENT_ID")]
        fork_point: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        /// Extra system note prepended to the child's own history
        #[arg(long)]
        context: Option<String>,
    },
    /// Summarize old history if the thread is past the threshold
    Compact { thread_id: String },
    /// Change a thread's status
    Status { thread_id: String, status: String },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env();

    let cli = Cli::parse();
    let mut config = cli.common.load_config()?;

    match cli.command {
        Commands::Gateway(args) => {
            if let Some(listen) = args.http_listen {
                config.gateway.http_listen = listen;
            }
            if let Some(listen) = args.ws_listen {
                config.gateway.ws_listen = listen;
            }
            gateway(config).await
        }
        Commands::Threads(command) => threads(&config, command).await,
    }
}

async fn gateway(config: Config) -> Result<()> {
    let coordinator = Coordinator::from_config(&config).with_context(|| {
        format!(
            "Failed to open thread database {}",
            config.thread_db_path().display()
        )
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        ctrl_c_cancel.cancel();
    });

    run_gateway(config, coordinator, cancel).await
}

async fn threads(config: &Config, command: ThreadCommands) -> Result<()> {
    let coordinator = Coordinator::from_config(config)?;
    let service = coordinator.threads();

    match command {
        ThreadCommands::Tree => print_json(&service.tree()?),
        ThreadCommands::Create {
            kind,
            topic,
            display_name,
        } => {
            let kind: ThreadKind = kind.parse()?;
            print_json(&service.create_thread(kind, topic, display_name)?)
        }
        ThreadCommands::Events { thread_id } => print_json(&service.events(&thread_id)?),
        ThreadCommands::Append {
            thread_id,
            kind,
            content,
        } => {
            let kind: EventKind = kind.parse()?;
            if kind == EventKind::Summary {
                anyhow::bail!("summary events are only created by compaction");
            }
            print_json(&service.append_event(&thread_id, kind, content)?)
        }
        ThreadCommands::Fork {
            parent_id,
            display_name,
            fork_point,
            topic,
            context,
        } => {
            let mut options = SpawnOptions::new(display_name);
            options.fork_point_event_id = fork_point;
            options.topic = topic;
            options.initial_context = context;
            print_json(&service.spawn_sub_thread(&parent_id, options)?)
        }
        ThreadCommands::Compact { thread_id } => {
            match service
                .compact(&thread_id, &TranscriptSummarizer::default())
                .await?
            {
                Some(summary) => print_json(&summary),
                None => {
                    eprintln!("Thread {} is below the compaction threshold", thread_id);
                    Ok(())
                }
            }
        }
        ThreadCommands::Status { thread_id, status } => {
            let status: ThreadStatus = status.parse()?;
            print_json(&service.set_status(&thread_id, status)?)
        }
    }
}
