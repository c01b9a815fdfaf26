pub mod message;
pub mod room;
pub mod upload;
pub mod user;

pub use message::{
    Message, MessageContent, MessageKind, OutboundMessage, RawMessage, TweetPayload, UploadPayload,
};
pub use room::RoomInfo;
pub use upload::UploadRecord;
pub use user::{User, UserRef};
