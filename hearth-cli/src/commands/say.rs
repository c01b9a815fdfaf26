use anyhow::{Context, Result};

use super::session;

/// Posts one message and reports the stored id.
pub async fn say(room_name: &str, body: &str) -> Result<()> {
    let campfire = session::connect().await?;
    let room = session::room(&campfire, room_name).await?;

    let message = room.say(body).await.context("message rejected")?;
    println!("Posted message {} to {}.", message.id, room.name());
    Ok(())
}
