//! Binary message protocol shared by the name server and the storage
//! servers.
//!
//! Every message starts with a fixed-layout [`Header`]; the payload that
//! follows is message-type dependent and is decoded at the connection
//! boundary into a typed value. All multibyte integers travel in
//! big-endian (network) order.

pub mod header;
pub mod message;
pub mod payload;
pub mod wire;

use std::fmt;
use std::io;

use num_derive::{FromPrimitive, ToPrimitive};

pub use header::Header;
pub use message::Request;

/// Result alias used on all wire paths.
pub type Result<T> = std::result::Result<T, Error>;

/// Width of the header's NUL-terminated name field.
pub const NAME_LEN: usize = 256;

/// Width of a username or address field inside payloads.
pub const USER_LEN: usize = 64;

/// Upper bound on a single message payload (covers full file bodies).
pub const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Maximum number of entries in a file's access-control list.
pub const MAX_ACL_ENTRIES: usize = 10;

/// Identifies which component sent or should receive a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Component {
    Client = 1,
    NameServer = 2,
    StorageServer = 3,
}

/// Message types. The numeric values are part of the wire contract and
/// stay stable across versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum MsgType {
    // SS -> NS registration
    Register = 10,
    RegisterFile = 36,
    RegisterComplete = 37,

    // Either direction
    Ack = 11,
    Error = 18,

    // Client -> NS
    Create = 12,
    Read = 14,
    Delete = 16,
    RegisterClient = 23,
    AddAccess = 24,
    RemAccess = 25,
    Exec = 26,
    Write = 27,
    Stream = 28,
    Undo = 29,
    Info = 30,
    List = 32,
    View = 34,
    SsDeadReport = 38,
    CreateFolder = 40,
    MoveFile = 41,
    MoveFolder = 42,
    ViewFolder = 43,
    Checkpoint = 120,
    ViewCheckpoint = 121,
    Revert = 122,
    ListCheckpoints = 123,
    LocateFile = 130,

    // NS -> Client
    ReadRedirect = 21,
    InfoResponse = 31,
    ListResponse = 33,
    ViewResponse = 35,
    LocateResponse = 131,

    // NS <-> SS internal
    InternalRead = 100,
    InternalData = 101,
    InternalGetMetadata = 102,
    InternalMetadataResp = 103,
    InternalAddAccess = 104,
    InternalRemAccess = 105,
    InternalSetOwner = 106,
    InternalSetFolder = 107,
}

/// Permission level attached to an access-control entry.
///
/// Ordering matters: a check for [`Permission::Read`] is satisfied by any
/// entry with `perm >= Read`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive,
)]
pub enum Permission {
    None = 0,
    Read = 1,
    Write = 2,
}

/// Errors raised while reading or decoding protocol messages.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// The message type field carried an unassigned value.
    UnknownMsgType(u16),
    /// The source or destination component tag was not recognised.
    UnknownComponent(u16),
    /// The payload length field exceeded [`MAX_PAYLOAD`].
    PayloadTooLarge(u32),
    /// A payload did not match the layout its message type requires.
    BadPayload,
    /// A string field held bytes that are not valid UTF-8, or exceeded
    /// its field width.
    BadString,
    /// The peer sent a message that is out of place in the current
    /// exchange (wrong first message, unexpected response type).
    UnexpectedMessage(MsgType),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o failure: {err}"),
            Error::UnknownMsgType(v) => write!(f, "unknown message type {v}"),
            Error::UnknownComponent(v) => write!(f, "unknown component tag {v}"),
            Error::PayloadTooLarge(n) => write!(f, "payload of {n} bytes exceeds limit"),
            Error::BadPayload => write!(f, "payload does not match message type"),
            Error::BadString => write!(f, "malformed string field"),
            Error::UnexpectedMessage(t) => write!(f, "unexpected message {t:?}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Validates a client-supplied file or folder name before it is used as
/// a key or a path component.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() < NAME_LEN
        && !name.contains(['/', '\\', ',', '|', '\n'])
        && name != "."
        && name != ".."
}

/// Folder paths allow '/' as a separator but each segment must itself be
/// a valid name.
pub fn valid_folder(path: &str) -> bool {
    !path.is_empty() && path.len() < NAME_LEN && path.split('/').all(valid_name)
}
