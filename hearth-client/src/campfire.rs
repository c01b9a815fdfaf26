//! Account entry point: authenticate once, then look up rooms and users.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use tracing::instrument;

use crate::config::{ClientConfig, Credentials};
use crate::directory::UserCache;
use crate::error::{ClientError, ClientResult};
use crate::models::{RoomInfo, User};
use crate::room::Room;
use crate::transport::{HttpTransport, Transport};

/// A connected account.
///
/// Created with [`Campfire::connect`]; every [`Room`] handed out by this
/// handle shares its transport, user cache, and engine defaults.
pub struct Campfire {
    transport: Arc<dyn Transport>,
    users: Arc<UserCache>,
    config: ClientConfig,
    me: User,
}

impl Debug for Campfire {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Campfire")
            .field("account", &self.config.account)
            .field("user", &self.me.name)
            .finish_non_exhaustive()
    }
}

impl Campfire {
    /// Authenticates against the service and returns a connected handle.
    ///
    /// Password credentials are exchanged for the account's API token
    /// during connection, so the password crosses the wire exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the configuration fails
    /// validation and [`ClientError::Transport`] when authentication is
    /// rejected or the service is unreachable.
    #[instrument(name = "campfire.connect", skip(config), err)]
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        validate(&config)?;
        let transport = HttpTransport::new(&config)?;
        let me = transport.me().await?;
        let transport: Arc<dyn Transport> = match (&config.credentials, &me.api_auth_token) {
            (Credentials::Login { .. }, Some(token)) => {
                Arc::new(transport.with_credentials(Credentials::token(token.clone())))
            }
            _ => Arc::new(transport),
        };
        Ok(Self::assemble(transport, config, me))
    }

    /// Connects over a prebuilt transport, for custom stacks and tests.
    ///
    /// # Errors
    ///
    /// Same surface as [`Campfire::connect`], minus the HTTP client
    /// construction.
    pub async fn over(transport: Arc<dyn Transport>, config: ClientConfig) -> ClientResult<Self> {
        validate(&config)?;
        let me = transport.me().await?;
        Ok(Self::assemble(transport, config, me))
    }

    fn assemble(transport: Arc<dyn Transport>, config: ClientConfig, me: User) -> Self {
        let users = Arc::new(UserCache::new(Arc::clone(&transport)));
        users.insert(me.clone());
        Self {
            transport,
            users,
            config,
            me,
        }
    }

    /// The authenticated user.
    #[must_use]
    pub fn me(&self) -> &User {
        &self.me
    }

    /// Fetches a user by id, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, including not-found statuses.
    pub async fn user(&self, user_id: u64) -> ClientResult<User> {
        Ok(self.transport.user(user_id).await?)
    }

    /// Rooms visible to the account, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "campfire.rooms", skip(self), err)]
    pub async fn rooms(&self) -> ClientResult<Vec<RoomInfo>> {
        let mut rooms = self.transport.rooms().await?;
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    /// Rooms the account is currently present in.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "campfire.joined_rooms", skip(self), err)]
    pub async fn joined_rooms(&self) -> ClientResult<Vec<RoomInfo>> {
        Ok(self.transport.presence().await?)
    }

    /// A handle to the room with the given id.
    ///
    /// Fetches fresh room info; present occupants are folded into the
    /// user cache so message attribution skips the directory.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, including not-found statuses.
    #[instrument(name = "campfire.room", skip(self), err)]
    pub async fn room(&self, room_id: u64) -> ClientResult<Room> {
        let info = self.transport.room(room_id).await?;
        Ok(self.room_from(info))
    }

    /// A handle to the room with the given name, compared
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RoomNotFound`] when no visible room
    /// matches.
    #[instrument(name = "campfire.room_by_name", skip(self), err)]
    pub async fn room_by_name(&self, name: &str) -> ClientResult<Room> {
        let rooms = self.transport.rooms().await?;
        let found = rooms
            .into_iter()
            .find(|room| room.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ClientError::RoomNotFound(name.to_owned()))?;
        self.room(found.id).await
    }

    fn room_from(&self, info: RoomInfo) -> Room {
        if let Some(occupants) = &info.users {
            for user in occupants {
                self.users.insert(user.clone());
            }
        }
        Room::new(
            info,
            Arc::clone(&self.transport),
            Arc::clone(&self.users),
            self.config.stream,
            self.config.upload.clone(),
        )
    }
}

fn validate(config: &ClientConfig) -> ClientResult<()> {
    config
        .validate()
        .map_err(|errors| ClientError::Config(errors.join(" ")))
}
