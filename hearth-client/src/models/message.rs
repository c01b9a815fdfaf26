use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::user::UserRef;

/// Inline tweet rendering: `{text} -- @{author}, {url}`.
static INLINE_TWEET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.+)\s+--\s+@([^,]+),\s*(.+)$").expect("inline tweet pattern is valid")
});

/// Bare tweet permalinks posted as an entire message body.
static TWEET_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?twitter\.com/[^/]+/status/\d+/?$")
        .expect("tweet permalink pattern is valid")
});

/// A message exactly as it appears on the wire, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    /// Unique identifier.
    pub id: u64,

    /// Wire discriminator, e.g. `TextMessage` or `EnterMessage`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Room the message was posted to.
    #[serde(default)]
    pub room_id: Option<u64>,

    /// Author; absent on server-generated entries.
    #[serde(default)]
    pub user_id: Option<u64>,

    /// Raw body; its meaning depends on the discriminator.
    #[serde(default)]
    pub body: Option<String>,

    /// Creation timestamp as reported by the server.
    #[serde(default)]
    pub created_at: Option<String>,

    /// Whether the requesting user starred the message.
    #[serde(default)]
    pub starred: Option<bool>,
}

/// Broad category of a classified message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A user entered the room.
    Enter,
    /// A user left the room, voluntarily or not.
    Leave,
    /// A plain chat line.
    Text,
    /// A multi-line paste.
    Paste,
    /// A named sound effect.
    Sound,
    /// The room topic changed.
    TopicChange,
    /// A periodic server clock marker.
    Timestamp,
    /// A shared tweet.
    Tweet,
    /// A file upload announcement.
    Upload,
    /// Anything the classifier does not recognize.
    Other,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Enter => "enter",
            Self::Leave => "leave",
            Self::Text => "text",
            Self::Paste => "paste",
            Self::Sound => "sound",
            Self::TopicChange => "topic-change",
            Self::Timestamp => "timestamp",
            Self::Tweet => "tweet",
            Self::Upload => "upload",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

/// Details extracted from a shared tweet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TweetPayload {
    /// Twitter handle of the tweet author, without the leading `@`.
    pub author: String,

    /// Tweet text.
    pub text: String,

    /// Permalink to the tweet.
    pub source_url: Url,
}

/// Details carried by an upload announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    /// Name of the uploaded file.
    pub file_name: String,

    /// Direct download URL, when the server includes one.
    pub download_url: Option<Url>,
}

/// Classified message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// A user entered the room.
    Enter,
    /// A user left the room.
    Leave,
    /// A plain chat line.
    Text {
        /// Message body.
        body: String,
    },
    /// A multi-line paste.
    Paste {
        /// Pasted body.
        body: String,
    },
    /// A named sound effect.
    Sound {
        /// Sound name, e.g. `crickets`.
        name: String,
    },
    /// The room topic changed.
    TopicChange {
        /// The new topic.
        topic: String,
    },
    /// A periodic server clock marker.
    Timestamp,
    /// A shared tweet.
    Tweet(TweetPayload),
    /// A file upload announcement.
    Upload(UploadPayload),
    /// Unrecognized payload, preserved verbatim.
    Other(RawMessage),
}

impl MessageContent {
    /// Category of this payload.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Enter => MessageKind::Enter,
            Self::Leave => MessageKind::Leave,
            Self::Text { .. } => MessageKind::Text,
            Self::Paste { .. } => MessageKind::Paste,
            Self::Sound { .. } => MessageKind::Sound,
            Self::TopicChange { .. } => MessageKind::TopicChange,
            Self::Timestamp => MessageKind::Timestamp,
            Self::Tweet(_) => MessageKind::Tweet,
            Self::Upload(_) => MessageKind::Upload,
            Self::Other(_) => MessageKind::Other,
        }
    }
}

/// A fully classified room message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique identifier.
    pub id: u64,

    /// Room the message belongs to.
    pub room_id: Option<u64>,

    /// Resolved author, when the message has one.
    pub user: Option<UserRef>,

    /// Parsed creation time.
    pub posted_at: Option<DateTime<Utc>>,

    /// Classified payload.
    pub content: MessageContent,
}

impl Message {
    /// Classifies a wire message into a typed one.
    ///
    /// Classification is total: payloads that do not match any known shape
    /// come back as [`MessageContent::Other`] rather than an error.
    #[must_use]
    pub fn classify(raw: RawMessage, user: Option<UserRef>) -> Self {
        let id = raw.id;
        let room_id = raw.room_id;
        let posted_at = raw.created_at.as_deref().and_then(parse_timestamp);
        Self {
            id,
            room_id,
            user,
            posted_at,
            content: content_of(raw),
        }
    }

    /// Category of the classified payload.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    /// Textual body for [`MessageContent::Text`] and [`MessageContent::Paste`].
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { body } | MessageContent::Paste { body } => Some(body),
            _ => None,
        }
    }
}

fn content_of(raw: RawMessage) -> MessageContent {
    match raw.kind.as_str() {
        "EnterMessage" => MessageContent::Enter,
        "LeaveMessage" | "KickMessage" => MessageContent::Leave,
        "TimestampMessage" => MessageContent::Timestamp,
        "TextMessage" => body_content(raw, |body| MessageContent::Text { body }),
        "PasteMessage" => body_content(raw, |body| MessageContent::Paste { body }),
        "SoundMessage" => body_content(raw, |name| MessageContent::Sound { name }),
        "TopicChangeMessage" => body_content(raw, |topic| MessageContent::TopicChange { topic }),
        "TweetMessage" => body_content(raw, tweet_content),
        "UploadMessage" => body_content(raw, |file_name| {
            MessageContent::Upload(UploadPayload {
                file_name,
                download_url: None,
            })
        }),
        _ => MessageContent::Other(raw),
    }
}

/// Applies `build` to the body, falling back to `Other` for body-less frames
/// of kinds that require one.
fn body_content<F>(mut raw: RawMessage, build: F) -> MessageContent
where
    F: FnOnce(String) -> MessageContent,
{
    if let Some(body) = raw.body.take() {
        build(body)
    } else {
        MessageContent::Other(raw)
    }
}

/// Tweets arrive in two renderings: a front matter block of `:key: value`
/// lines, or a single `{text} -- @{author}, {url}` line. Bodies matching
/// neither are kept as plain text.
fn tweet_content(body: String) -> MessageContent {
    if let Some(tweet) = parse_tweet(&body) {
        MessageContent::Tweet(tweet)
    } else {
        MessageContent::Text { body }
    }
}

fn parse_tweet(body: &str) -> Option<TweetPayload> {
    if body.trim_start().starts_with("---") {
        parse_front_matter(body)
    } else {
        parse_inline(body)
    }
}

fn parse_front_matter(body: &str) -> Option<TweetPayload> {
    let mut author = None;
    let mut text = None;
    let mut id = None;
    for line in body.lines() {
        let Some(entry) = line.trim().strip_prefix(':') else {
            continue;
        };
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "author_username" => author = Some(value.to_owned()),
            "message" => text = Some(value.to_owned()),
            "id" => id = Some(value.to_owned()),
            _ => {}
        }
    }
    let (author, text, id) = (author?, text?, id?);
    let source_url = Url::parse(&format!("http://twitter.com/{author}/status/{id}")).ok()?;
    Some(TweetPayload {
        author,
        text,
        source_url,
    })
}

fn parse_inline(body: &str) -> Option<TweetPayload> {
    let captures = INLINE_TWEET.captures(body.trim())?;
    let source_url = Url::parse(captures[3].trim()).ok()?;
    Some(TweetPayload {
        author: captures[2].trim().to_owned(),
        text: captures[1].trim().to_owned(),
        source_url,
    })
}

/// Server timestamps come as `2012/01/25 12:00:00 +0000`, with newer
/// deployments emitting RFC 3339.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y/%m/%d %H:%M:%S %z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// A message to be posted, with the wire discriminator chosen from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Single-line chat text.
    Text(String),
    /// Multi-line paste.
    Paste(String),
    /// Bare tweet permalink.
    Tweet(String),
}

impl OutboundMessage {
    /// Picks the discriminator the server expects for `body`.
    ///
    /// Multi-line bodies become pastes and bare tweet permalinks become
    /// tweets; everything else is plain text.
    #[must_use]
    pub fn from_body(body: impl Into<String>) -> Self {
        let body = body.into();
        if body.contains('\n') {
            Self::Paste(body)
        } else if TWEET_URL.is_match(body.trim()) {
            Self::Tweet(body)
        } else {
            Self::Text(body)
        }
    }

    /// Wire discriminator for the speak endpoint.
    #[must_use]
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "TextMessage",
            Self::Paste(_) => "PasteMessage",
            Self::Tweet(_) => "TweetMessage",
        }
    }

    /// Body to send.
    #[must_use]
    pub fn body(&self) -> &str {
        match self {
            Self::Text(body) | Self::Paste(body) | Self::Tweet(body) => body,
        }
    }
}
