//! docfs - a distributed collaborative document file service.
//!
//! The deployment is one central name server plus a pool of storage
//! servers. Clients speak a binary header protocol to the name server,
//! which either answers directly or redirects them to a storage server;
//! bulk bytes and sentence-level edits travel on a direct client to
//! storage-server connection using a line-oriented text protocol.

pub mod clock;
pub mod config;
pub mod ns;
pub mod proto;
pub mod ss;
