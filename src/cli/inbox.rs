use anyhow::Result;
use clap::Args;

use inbox_pulse::config::Config;
use inbox_pulse::direct::DirectClient;

use super::common::format_timestamp;

#[derive(Args)]
pub struct InboxArgs {
    /// Number of recent messages to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// List pending message requests instead
    #[arg(long)]
    pub pending: bool,
}

pub async fn run(args: InboxArgs, config: Config) -> Result<()> {
    let client = DirectClient::from_config(&config)?;

    if args.pending {
        let pending = client.get_pending_inbox().await?;
        if pending.threads.is_empty() {
            println!("No pending requests");
        }
        for thread in &pending.threads {
            let from: Vec<&str> = thread.users.iter().map(|u| u.username.as_str()).collect();
            println!("{}  {}", thread.thread_id, from.join(", "));
        }
        return Ok(());
    }

    let inbox = client.get_inbox().await?;
    println!(
        "{} thread(s), {} with unread messages from others",
        inbox.threads.len(),
        inbox.unseen_from_others(client.self_user_id())
    );

    let messages = client.get_recent_messages(args.limit).await?;
    for msg in messages {
        let title = msg.thread_title.as_deref().unwrap_or(&msg.thread_id);
        println!(
            "[{}] {} <{}>: {}",
            format_timestamp(msg.timestamp),
            title,
            msg.user_id,
            msg.text
        );
    }

    Ok(())
}
