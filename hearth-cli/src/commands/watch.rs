use anyhow::{Context, Result};
use hearth_client::models::{Message, MessageContent};
use hearth_client::stream::StreamMode;

use super::session;

/// Streams a room to stdout until Ctrl+C.
pub async fn watch(room_name: &str, poll: bool) -> Result<()> {
    let campfire = session::connect().await?;
    let room = session::room(&campfire, room_name).await?;

    let mode = if poll {
        StreamMode::Polling
    } else {
        StreamMode::Live
    };
    let mut stream = room
        .stream(mode)
        .on_error(|err| eprintln!("[stream] {err}"));
    stream.attach(|message: &Message| print_message(message));

    stream.start().await.context("could not start the stream")?;
    eprintln!("Watching {}... (press Ctrl+C to stop)", room.name());

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for Ctrl+C")?;
    stream.stop();
    stream.join().await?;
    Ok(())
}

fn print_message(message: &Message) {
    let stamp = message.posted_at.map_or_else(
        || "--:--:--".to_owned(),
        |at| at.format("%H:%M:%S").to_string(),
    );
    let who = message
        .user
        .as_ref()
        .and_then(|user| user.name.clone())
        .unwrap_or_else(|| "someone".to_owned());

    match &message.content {
        MessageContent::Text { body } => println!("[{stamp}] {who}: {body}"),
        MessageContent::Paste { body } => {
            println!("[{stamp}] {who} pasted:");
            for line in body.lines() {
                println!("    {line}");
            }
        }
        MessageContent::Enter => println!("[{stamp}] {who} entered the room"),
        MessageContent::Leave => println!("[{stamp}] {who} left the room"),
        MessageContent::Sound { name } => println!("[{stamp}] {who} played {name}"),
        MessageContent::TopicChange { topic } => println!("[{stamp}] topic is now: {topic}"),
        MessageContent::Tweet(tweet) => println!(
            "[{stamp}] {who} shared a tweet by @{}: {} ({})",
            tweet.author, tweet.text, tweet.source_url
        ),
        MessageContent::Upload(upload) => println!("[{stamp}] {who} uploaded {}", upload.file_name),
        MessageContent::Timestamp | MessageContent::Other(_) => {}
    }
}
