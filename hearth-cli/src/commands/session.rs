use anyhow::{Context, Result};
use hearth_client::campfire::Campfire;
use hearth_client::config::ClientConfig;
use hearth_client::room::Room;

/// Connects using `HEARTH_*` environment variables (or a `.env` file).
pub async fn connect() -> Result<Campfire> {
    let config = ClientConfig::from_env().context(
        "set HEARTH_ACCOUNT and HEARTH_TOKEN (or HEARTH_USERNAME and HEARTH_PASSWORD)",
    )?;
    Campfire::connect(config)
        .await
        .context("could not connect to the chat service")
}

/// Resolves a room by name, with a friendlier failure message.
pub async fn room(campfire: &Campfire, name: &str) -> Result<Room> {
    campfire
        .room_by_name(name)
        .await
        .with_context(|| format!("could not open room {name:?}"))
}
