//! Typed message payloads.
//!
//! Each payload owns an `encode`/`decode` pair built from the
//! [`wire`](super::wire) primitives. Usernames and addresses travel as
//! fixed 64-byte fields, file and folder names as fixed 256-byte fields,
//! free-form strings as counted strings.

use std::io::{Cursor, Write};

use super::{wire, Error, Permission, Result, MAX_ACL_ENTRIES, NAME_LEN, USER_LEN};

/// One access-control entry: a username and its permission level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub user: String,
    pub perm: Permission,
}

impl AclEntry {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        wire::put_fixed_str::<USER_LEN>(dest, &self.user)?;
        wire::put_permission(dest, self.perm)
    }

    fn decode(src: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self { user: wire::fixed_str::<USER_LEN>(src)?, perm: wire::permission(src)? })
    }
}

fn encode_acl(dest: &mut impl Write, acl: &[AclEntry]) -> std::io::Result<()> {
    wire::put_u32(dest, acl.len() as u32)?;
    for entry in acl {
        entry.encode(dest)?;
    }
    Ok(())
}

fn decode_acl(src: &mut impl std::io::Read) -> Result<Vec<AclEntry>> {
    let count = wire::u32(src)? as usize;
    if count > MAX_ACL_ENTRIES {
        return Err(Error::BadPayload);
    }
    let mut acl = Vec::with_capacity(count);
    for _ in 0..count {
        acl.push(AclEntry::decode(src)?);
    }
    Ok(acl)
}

/// A storage server's announcement of its public (client-facing)
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsRegistration {
    pub ip: String,
    pub port: u16,
}

impl SsRegistration {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(USER_LEN + 4);
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.ip)?;
        wire::put_u32(&mut buf, u32::from(self.port))?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        let ip = wire::fixed_str::<USER_LEN>(&mut src)?;
        let port = wire::u32(&mut src)?;
        let port = u16::try_from(port).map_err(|_| Error::BadPayload)?;
        Ok(Self { ip, port })
    }
}

/// A redirect answer: the public address of the storage server the
/// client should contact directly. Also used for dead-server reports.
pub type Redirect = SsRegistration;

/// One file record in the storage server's registration manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSync {
    pub filename: String,
    pub owner: String,
    pub acl: Vec<AclEntry>,
    pub word_count: u64,
    pub char_count: u64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
    pub folder: String,
}

impl FileSync {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        wire::put_fixed_str::<NAME_LEN>(&mut buf, &self.filename)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.owner)?;
        encode_acl(&mut buf, &self.acl)?;
        wire::put_u64(&mut buf, self.word_count)?;
        wire::put_u64(&mut buf, self.char_count)?;
        wire::put_i64(&mut buf, self.created)?;
        wire::put_i64(&mut buf, self.modified)?;
        wire::put_i64(&mut buf, self.last_accessed)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.last_accessed_by)?;
        wire::put_fixed_str::<NAME_LEN>(&mut buf, &self.folder)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        Ok(Self {
            filename: wire::fixed_str::<NAME_LEN>(&mut src)?,
            owner: wire::fixed_str::<USER_LEN>(&mut src)?,
            acl: decode_acl(&mut src)?,
            word_count: wire::u64(&mut src)?,
            char_count: wire::u64(&mut src)?,
            created: wire::i64(&mut src)?,
            modified: wire::i64(&mut src)?,
            last_accessed: wire::i64(&mut src)?,
            last_accessed_by: wire::fixed_str::<USER_LEN>(&mut src)?,
            folder: wire::fixed_str::<NAME_LEN>(&mut src)?,
        })
    }
}

/// Payload of an add-access request: target user and permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub user: String,
    pub perm: Permission,
}

impl AccessGrant {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(USER_LEN + 4);
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.user)?;
        wire::put_permission(&mut buf, self.perm)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        Ok(Self {
            user: wire::fixed_str::<USER_LEN>(&mut src)?,
            perm: wire::permission(&mut src)?,
        })
    }
}

/// Fresh statistics fetched from a storage server for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPatch {
    pub word_count: u64,
    pub char_count: u64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
}

impl MetadataPatch {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        wire::put_u64(&mut buf, self.word_count)?;
        wire::put_u64(&mut buf, self.char_count)?;
        wire::put_i64(&mut buf, self.created)?;
        wire::put_i64(&mut buf, self.modified)?;
        wire::put_i64(&mut buf, self.last_accessed)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.last_accessed_by)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        Ok(Self {
            word_count: wire::u64(&mut src)?,
            char_count: wire::u64(&mut src)?,
            created: wire::i64(&mut src)?,
            modified: wire::i64(&mut src)?,
            last_accessed: wire::i64(&mut src)?,
            last_accessed_by: wire::fixed_str::<USER_LEN>(&mut src)?,
        })
    }
}

/// The combined record answering an info request: naming-layer fields
/// plus fresh storage-side statistics and the server's public address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub owner: String,
    pub ss_ip: String,
    pub ss_port: u16,
    pub acl: Vec<AclEntry>,
    pub word_count: u64,
    pub char_count: u64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
}

impl FileInfo {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        wire::put_fixed_str::<NAME_LEN>(&mut buf, &self.filename)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.owner)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.ss_ip)?;
        wire::put_u32(&mut buf, u32::from(self.ss_port))?;
        encode_acl(&mut buf, &self.acl)?;
        wire::put_u64(&mut buf, self.word_count)?;
        wire::put_u64(&mut buf, self.char_count)?;
        wire::put_i64(&mut buf, self.created)?;
        wire::put_i64(&mut buf, self.modified)?;
        wire::put_i64(&mut buf, self.last_accessed)?;
        wire::put_fixed_str::<USER_LEN>(&mut buf, &self.last_accessed_by)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        Ok(Self {
            filename: wire::fixed_str::<NAME_LEN>(&mut src)?,
            owner: wire::fixed_str::<USER_LEN>(&mut src)?,
            ss_ip: wire::fixed_str::<USER_LEN>(&mut src)?,
            ss_port: u16::try_from(wire::u32(&mut src)?).map_err(|_| Error::BadPayload)?,
            acl: decode_acl(&mut src)?,
            word_count: wire::u64(&mut src)?,
            char_count: wire::u64(&mut src)?,
            created: wire::i64(&mut src)?,
            modified: wire::i64(&mut src)?,
            last_accessed: wire::i64(&mut src)?,
            last_accessed_by: wire::fixed_str::<USER_LEN>(&mut src)?,
        })
    }
}

/// Listing flags carried by view requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewArgs {
    /// Include entries the caller has no permission on.
    pub all: bool,
    /// Render the long (table) form with fresh statistics.
    pub long: bool,
}

const VIEW_FLAG_ALL: u32 = 1;
const VIEW_FLAG_LONG: u32 = 2;

impl ViewArgs {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut flags = 0u32;
        if self.all {
            flags |= VIEW_FLAG_ALL;
        }
        if self.long {
            flags |= VIEW_FLAG_LONG;
        }
        let mut buf = Vec::with_capacity(4);
        wire::put_u32(&mut buf, flags)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        let flags = wire::u32(&mut src)?;
        Ok(Self { all: flags & VIEW_FLAG_ALL != 0, long: flags & VIEW_FLAG_LONG != 0 })
    }
}

/// Arguments of a folder listing: flags plus the folder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFolderArgs {
    pub flags: ViewArgs,
    pub folder: String,
}

impl ViewFolderArgs {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = self.flags.encode()?;
        wire::put_fixed_str::<NAME_LEN>(&mut buf, &self.folder)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(payload);
        let flags = wire::u32(&mut src)?;
        let folder = wire::fixed_str::<NAME_LEN>(&mut src)?;
        Ok(Self {
            flags: ViewArgs { all: flags & VIEW_FLAG_ALL != 0, long: flags & VIEW_FLAG_LONG != 0 },
            folder,
        })
    }
}

/// Encodes a lone counted string (folder names, usernames on the wire).
pub fn encode_string(s: &str) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + s.len());
    wire::put_string(&mut buf, s)?;
    Ok(buf)
}

/// Decodes a lone counted string payload.
pub fn decode_string(payload: &[u8]) -> Result<String> {
    let mut src = Cursor::new(payload);
    wire::string(&mut src)
}
