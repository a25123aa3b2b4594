use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;

use inbox_pulse::config::Config;
use inbox_pulse::direct::{DirectClient, SendOptions};

#[derive(Args)]
pub struct SendArgs {
    /// Thread to send to
    pub thread: String,

    /// Message text
    pub text: String,

    /// Wait up to this many seconds for a reply to the message
    #[arg(long)]
    pub wait_reply: Option<u64>,

    /// Send a photo (JPEG) before the text
    #[arg(long)]
    pub photo: Option<PathBuf>,

    /// Send a video (MP4) before the text
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// Send an audio clip as a voice note before the text
    #[arg(long)]
    pub voice: Option<PathBuf>,
}

async fn read_media(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

pub async fn run(args: SendArgs, config: Config) -> Result<()> {
    let client = DirectClient::from_config(&config)?;

    if let Some(ref path) = args.photo {
        let sent = client.send_photo(&args.thread, &read_media(path).await?).await?;
        println!("Sent photo {}", sent.item_id);
    }
    if let Some(ref path) = args.video {
        let sent = client.send_video(&args.thread, &read_media(path).await?).await?;
        println!("Sent video {}", sent.item_id);
    }
    if let Some(ref path) = args.voice {
        let sent = client
            .send_voice_note(&args.thread, &read_media(path).await?)
            .await?;
        println!("Sent voice note {}", sent.item_id);
    }

    let Some(wait) = args.wait_reply else {
        let sent = client.send_message(&args.thread, &args.text).await?;
        println!("Sent {}", sent.item_id);
        return Ok(());
    };

    let wait = Duration::from_secs(wait);
    let (tx, rx) = oneshot::channel();
    let sent = client
        .send_message_with_reply(
            &args.thread,
            &args.text,
            move |reply| {
                let _ = tx.send(reply);
            },
            SendOptions {
                timeout: Some(wait),
                retry: true,
            },
        )
        .await?;
    println!("Sent {}, waiting up to {}s for a reply", sent.item_id, wait.as_secs());

    let poller = client.spawn_polling(None);
    // The handler is dropped at its deadline, which closes the channel.
    let outcome = rx.await;
    client.stop_polling();
    poller.await?;

    match outcome {
        Ok(reply) => println!("{}: {}", reply.user_id, reply.text),
        Err(_) => println!("No reply within {}s", wait.as_secs()),
    }
    Ok(())
}
