//! Client requests decoded into tagged variants at the connection
//! boundary.

use super::payload::{AccessGrant, Redirect, ViewArgs, ViewFolderArgs};
use super::{payload, Error, Header, MsgType, Result};

/// One decoded client request. The variants mirror the client-facing
/// message types; each carries its typed payload.
#[derive(Debug, Clone)]
pub enum Request {
    RegisterClient { user: String },
    Create { name: String },
    Delete { name: String },
    Undo { name: String },
    Info { name: String },
    Read { name: String },
    Write { name: String },
    Stream { name: String },
    Checkpoint { name: String },
    ViewCheckpoint { name: String },
    Revert { name: String },
    ListCheckpoints { name: String },
    LocateFile { name: String },
    Exec { name: String },
    List,
    View(ViewArgs),
    ViewFolder(ViewFolderArgs),
    AddAccess { name: String, grant: AccessGrant },
    RemAccess { name: String, user: String },
    CreateFolder { name: String },
    MoveFile { name: String, folder: String },
    MoveFolder { src: String, dst: String },
    SsDeadReport(Redirect),
}

impl Request {
    /// Decodes the payload according to the header's message type.
    ///
    /// Returns [`Error::UnexpectedMessage`] for message types that are
    /// not client requests (responses, storage-server traffic).
    pub fn decode(header: &Header, payload: &[u8]) -> Result<Self> {
        let name = header.name.clone();
        match header.msg_type {
            MsgType::RegisterClient => Ok(Request::RegisterClient { user: name }),
            MsgType::Create => Ok(Request::Create { name }),
            MsgType::Delete => Ok(Request::Delete { name }),
            MsgType::Undo => Ok(Request::Undo { name }),
            MsgType::Info => Ok(Request::Info { name }),
            MsgType::Read => Ok(Request::Read { name }),
            MsgType::Write => Ok(Request::Write { name }),
            MsgType::Stream => Ok(Request::Stream { name }),
            MsgType::Checkpoint => Ok(Request::Checkpoint { name }),
            MsgType::ViewCheckpoint => Ok(Request::ViewCheckpoint { name }),
            MsgType::Revert => Ok(Request::Revert { name }),
            MsgType::ListCheckpoints => Ok(Request::ListCheckpoints { name }),
            MsgType::LocateFile => Ok(Request::LocateFile { name }),
            MsgType::Exec => Ok(Request::Exec { name }),
            MsgType::List => Ok(Request::List),
            MsgType::View => Ok(Request::View(ViewArgs::decode(payload)?)),
            MsgType::ViewFolder => Ok(Request::ViewFolder(ViewFolderArgs::decode(payload)?)),
            MsgType::AddAccess => {
                Ok(Request::AddAccess { name, grant: AccessGrant::decode(payload)? })
            }
            MsgType::RemAccess => {
                Ok(Request::RemAccess { name, user: payload::decode_string(payload)? })
            }
            MsgType::CreateFolder => Ok(Request::CreateFolder { name }),
            MsgType::MoveFile => {
                Ok(Request::MoveFile { name, folder: payload::decode_string(payload)? })
            }
            MsgType::MoveFolder => {
                Ok(Request::MoveFolder { src: name, dst: payload::decode_string(payload)? })
            }
            MsgType::SsDeadReport => Ok(Request::SsDeadReport(Redirect::decode(payload)?)),
            other => Err(Error::UnexpectedMessage(other)),
        }
    }
}
