use anyhow::Result;

use super::session;

/// Prints the room directory, one room per line.
pub async fn list(joined: bool) -> Result<()> {
    let campfire = session::connect().await?;
    let rooms = if joined {
        campfire.joined_rooms().await?
    } else {
        campfire.rooms().await?
    };

    if rooms.is_empty() {
        println!("No rooms found.");
        return Ok(());
    }

    for room in rooms {
        let locked = if room.locked == Some(true) {
            " [locked]"
        } else {
            ""
        };
        println!("- {} (id {}){locked}", room.name, room.id);
        if let Some(topic) = room.topic.filter(|topic| !topic.is_empty()) {
            println!("  topic: {topic}");
        }
    }

    Ok(())
}
