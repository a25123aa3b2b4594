use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use inbox_pulse::config::Config;
use inbox_pulse::direct::{DirectClient, DirectEvent};

use super::common::format_timestamp;

#[derive(Args)]
pub struct ListenArgs {
    /// Poll interval in milliseconds (overrides config)
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Approve pending message requests as they arrive
    #[arg(long)]
    pub auto_approve: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Also print messages sent by this account
    #[arg(long)]
    pub include_own: bool,
}

pub async fn run(args: ListenArgs, config: Config) -> Result<()> {
    let client = Arc::new(DirectClient::from_config(&config)?);
    let mut events = client.subscribe();

    let poller = client.spawn_polling(args.interval_ms.map(Duration::from_millis));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping poll loop");
                client.stop_polling();
                break;
            }
            received = events.recv() => match received {
                Ok(event) => handle_event(&client, &args, event).await,
                Err(RecvError::Lagged(n)) => warn!("Output fell behind, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    poller.await?;
    Ok(())
}

async fn handle_event(client: &DirectClient, args: &ListenArgs, event: DirectEvent) {
    match event {
        DirectEvent::Message(msg) => {
            if msg.is_from_me && !args.include_own {
                return;
            }
            if args.json {
                println!(
                    "{}",
                    json!({
                        "type": "message",
                        "thread_id": msg.thread_id,
                        "item_id": msg.item_id,
                        "user_id": msg.user_id,
                        "text": msg.text,
                        "timestamp": msg.timestamp,
                        "item_type": msg.item.item_type.to_string(),
                        "is_from_me": msg.is_from_me,
                        "replied_to": msg.replied_to_item_id(),
                    })
                );
            } else {
                println!(
                    "[{}] {} @ {}: {}",
                    format_timestamp(msg.timestamp),
                    msg.user_id,
                    msg.thread_id,
                    msg.text
                );
            }
        }
        DirectEvent::Typing(typing) => {
            if args.json {
                println!(
                    "{}",
                    json!({
                        "type": "typing",
                        "thread_id": typing.thread_id,
                        "user_id": typing.user_id,
                        "is_typing": typing.is_typing,
                    })
                );
            }
        }
        DirectEvent::PendingRequest(pending) => {
            if args.json {
                let ids: Vec<&str> = pending.threads.iter().map(|t| t.thread_id.as_str()).collect();
                println!(
                    "{}",
                    json!({"type": "pending_request", "count": pending.count, "threads": ids})
                );
            } else {
                println!("{} pending message request(s)", pending.count);
            }

            if args.auto_approve {
                for thread in &pending.threads {
                    match client.approve_thread(&thread.thread_id).await {
                        Ok(()) => info!("Approved thread {}", thread.thread_id),
                        Err(e) => warn!("Failed to approve thread {}: {}", thread.thread_id, e),
                    }
                }
            }
        }
        DirectEvent::Error(err) => {
            if args.json {
                println!(
                    "{}",
                    json!({"type": "error", "message": err.message, "fatal": err.fatal})
                );
            } else {
                eprintln!("Error: {}", err.message);
            }
            if err.fatal {
                warn!("Session rejected; re-export cookies and restart");
            }
        }
        DirectEvent::PollingStarted => info!("Listening for messages"),
        DirectEvent::PollingStopped => info!("Stopped listening"),
    }
}
