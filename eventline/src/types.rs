//! Core value types for the `eventline` library.
//!
//! Identifiers and positions are newtypes so that a stream revision can never
//! be passed where a global log position is expected. String identifiers use
//! smart constructors and are valid once constructed.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stream identifier in the remote log.
///
/// `StreamId` values are guaranteed to be non-empty and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamId(String);

/// Identifier of a single event.
///
/// Any UUID read back from the log is accepted; ids generated locally are
/// UUIDv7 so they sort by creation time.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh time-ordered event id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Identifier of an aggregate instance.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    FromStr,
    Serialize,
    Deserialize
))]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Generates a fresh random aggregate id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Revision of an event inside one stream, assigned by the log.
///
/// Revisions are 0-based: the first event of a stream has revision 0.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct StreamRevision(u64);

impl StreamRevision {
    /// Revision of the first event in a stream.
    pub fn first() -> Self {
        Self::new(0)
    }

    /// Returns the revision following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// Position of an event in the global (`$all`) log.
///
/// Positions start at 1; position 0 means "before the first event" and is
/// what a subscription without a checkpoint resumes after.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Default,
    Serialize,
    Deserialize
), default = 0)]
pub struct Position(u64);

impl Position {
    /// The position before any event.
    pub fn start() -> Self {
        Self::new(0)
    }

    /// Returns true when no event has been processed yet.
    pub fn is_start(self) -> bool {
        self.into_inner() == 0
    }
}

/// Version of an aggregate: the revision of the last event applied to it.
///
/// A never-persisted aggregate starts at [`AggregateVersion::NEW`] (-1), so
/// after its first event it is at version 0, matching the stream revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateVersion(i64);

impl AggregateVersion {
    /// Version of an aggregate that has no events.
    pub const NEW: Self = Self(-1);

    /// Returns true if no event has been applied.
    pub const fn is_new(self) -> bool {
        self.0 < 0
    }

    /// Returns the version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw signed value.
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Converts into the stream revision of the last applied event.
    pub fn as_revision(self) -> Option<StreamRevision> {
        u64::try_from(self.0).ok().map(StreamRevision::new)
    }
}

impl Default for AggregateVersion {
    fn default() -> Self {
        Self::NEW
    }
}

impl From<StreamRevision> for AggregateVersion {
    fn from(revision: StreamRevision) -> Self {
        Self(i64::try_from(revision.into_inner()).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for AggregateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A timestamp for when an event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Encoding of an event payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContentType {
    /// `application/json`
    #[default]
    Json,
    /// `application/octet-stream`, encoded as MessagePack
    Binary,
}

impl ContentType {
    /// Returns the MIME type recorded with the event.
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Binary => "application/octet-stream",
        }
    }

    /// Parses a MIME type as recorded by the log. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Some(Self::Json)
        } else if essence.eq_ignore_ascii_case("application/octet-stream") {
            Some(Self::Binary)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Write precondition for an append (optimistic concurrency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpectedRevision {
    /// The stream must not exist yet.
    NoStream,
    /// No check is performed.
    Any,
    /// The stream must exist, at any revision.
    StreamExists,
    /// The last event of the stream must have exactly this revision.
    Exact(StreamRevision),
}

impl std::fmt::Display for ExpectedRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::Any => f.write_str("any"),
            Self::StreamExists => f.write_str("stream exists"),
            Self::Exact(revision) => write!(f, "revision {revision}"),
        }
    }
}

/// Direction of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadDirection {
    /// Oldest to newest.
    Forwards,
    /// Newest to oldest.
    Backwards,
}

/// Where a stream read starts (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadFrom {
    /// The first event of the stream.
    Start,
    /// The last event of the stream.
    End,
    /// A specific revision.
    Revision(StreamRevision),
}

/// Where a subscription to the global log starts (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscribeFrom {
    /// Deliver every event in the log.
    Start,
    /// Deliver events whose position is strictly greater.
    After(Position),
}

impl From<Position> for SubscribeFrom {
    fn from(position: Position) -> Self {
        if position.is_start() {
            Self::Start
        } else {
            Self::After(position)
        }
    }
}
