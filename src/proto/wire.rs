//! Primitive codecs for the binary protocol.
//!
//! Readers take any `std::io::Read` source and writers any
//! `std::io::Write` sink, so the same functions serve in-memory buffers
//! and tests alike. Integers are big-endian; strings come in two shapes:
//! fixed-width NUL-padded fields and counted (length-prefixed) strings.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{Error, Permission, Result};
use num_traits::{FromPrimitive, ToPrimitive};

/// Longest counted string accepted from the wire.
pub const MAX_STRING: usize = 4096;

pub fn u16(src: &mut impl Read) -> Result<u16> {
    src.read_u16::<BigEndian>().map_err(Error::Io)
}

pub fn u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<BigEndian>().map_err(Error::Io)
}

pub fn u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<BigEndian>().map_err(Error::Io)
}

pub fn i64(src: &mut impl Read) -> Result<i64> {
    src.read_i64::<BigEndian>().map_err(Error::Io)
}

pub fn put_u16(dest: &mut impl Write, n: u16) -> std::io::Result<()> {
    dest.write_u16::<BigEndian>(n)
}

pub fn put_u32(dest: &mut impl Write, n: u32) -> std::io::Result<()> {
    dest.write_u32::<BigEndian>(n)
}

pub fn put_u64(dest: &mut impl Write, n: u64) -> std::io::Result<()> {
    dest.write_u64::<BigEndian>(n)
}

pub fn put_i64(dest: &mut impl Write, n: i64) -> std::io::Result<()> {
    dest.write_i64::<BigEndian>(n)
}

/// Reads a fixed `N`-byte field holding a NUL-terminated UTF-8 string.
pub fn fixed_str<const N: usize>(src: &mut impl Read) -> Result<String> {
    let mut buf = [0u8; N];
    src.read_exact(&mut buf).map_err(Error::Io)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(N);
    String::from_utf8(buf[..end].to_vec()).map_err(|_| Error::BadString)
}

/// Writes `s` into a fixed `N`-byte field, NUL-padded. The string must
/// leave room for at least one terminating NUL.
pub fn put_fixed_str<const N: usize>(dest: &mut impl Write, s: &str) -> std::io::Result<()> {
    if s.len() >= N {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "string exceeds field width",
        ));
    }
    let mut buf = [0u8; N];
    buf[..s.len()].copy_from_slice(s.as_bytes());
    dest.write_all(&buf)
}

/// Reads a counted string: u32 length followed by that many UTF-8 bytes.
pub fn string(src: &mut impl Read) -> Result<String> {
    let len = u32(src)? as usize;
    if len > MAX_STRING {
        return Err(Error::BadString);
    }
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(Error::Io)?;
    String::from_utf8(buf).map_err(|_| Error::BadString)
}

/// Writes a counted string.
pub fn put_string(dest: &mut impl Write, s: &str) -> std::io::Result<()> {
    put_u32(dest, s.len() as u32)?;
    dest.write_all(s.as_bytes())
}

/// Reads a permission level encoded as a u32 discriminant.
pub fn permission(src: &mut impl Read) -> Result<Permission> {
    Permission::from_u32(u32(src)?).ok_or(Error::BadPayload)
}

pub fn put_permission(dest: &mut impl Write, perm: Permission) -> std::io::Result<()> {
    // to_u32 cannot fail for a fieldless enum
    put_u32(dest, perm.to_u32().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fixed_str_roundtrip() {
        let mut buf = Vec::new();
        put_fixed_str::<16>(&mut buf, "hello").unwrap();
        assert_eq!(buf.len(), 16);
        let mut src = Cursor::new(buf);
        assert_eq!(fixed_str::<16>(&mut src).unwrap(), "hello");
    }

    #[test]
    fn fixed_str_rejects_overlong() {
        let mut buf = Vec::new();
        assert!(put_fixed_str::<4>(&mut buf, "hello").is_err());
        // exactly the field width leaves no room for the NUL
        assert!(put_fixed_str::<5>(&mut buf, "hello").is_err());
    }

    #[test]
    fn counted_string_bounds() {
        let mut buf = Vec::new();
        put_u32(&mut buf, (MAX_STRING + 1) as u32).unwrap();
        buf.extend_from_slice(&[b'a'; 8]);
        let mut src = Cursor::new(buf);
        assert!(matches!(string(&mut src), Err(Error::BadString)));
    }

    #[test]
    fn permission_codes() {
        let mut buf = Vec::new();
        put_permission(&mut buf, Permission::Write).unwrap();
        let mut src = Cursor::new(buf);
        assert_eq!(permission(&mut src).unwrap(), Permission::Write);

        let mut src = Cursor::new(vec![0, 0, 0, 9]);
        assert!(permission(&mut src).is_err());
    }
}
