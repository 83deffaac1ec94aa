//! Per-file access-request workflow.
//!
//! Requests are appended to `access_requests/<file>.requests` as
//! `timestamp|user|perm|status` lines and never deleted; approval and
//! denial flip the status in place. Approval also persists a matching
//! ACL entry in the metadata store.

use std::io;

use num_traits::ToPrimitive;
use tracing::info;

use crate::clock;
use crate::proto::Permission;
use crate::ss::layout::Layout;
use crate::ss::StorageServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Denied => "DENIED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RequestStatus::Pending),
            "APPROVED" => Some(RequestStatus::Approved),
            "DENIED" => Some(RequestStatus::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub ts: i64,
    pub user: String,
    pub perm: Permission,
    pub status: RequestStatus,
}

#[derive(Debug)]
pub enum RequestError {
    /// The same user already has this permission pending.
    Duplicate,
    /// No matching pending request to approve or deny.
    NoPending,
    Io(io::Error),
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        RequestError::Io(err)
    }
}

fn perm_token(perm: Permission) -> &'static str {
    match perm {
        Permission::Write => "W",
        _ => "R",
    }
}

fn parse_perm(s: &str) -> Option<Permission> {
    match s {
        "R" => Some(Permission::Read),
        "W" => Some(Permission::Write),
        _ => None,
    }
}

fn render(requests: &[AccessRequest]) -> String {
    let mut out = String::new();
    for r in requests {
        out.push_str(&format!(
            "{}|{}|{}|{}\n",
            r.ts,
            r.user,
            perm_token(r.perm),
            r.status.as_str()
        ));
    }
    out
}

fn parse(text: &str) -> Vec<AccessRequest> {
    text.lines()
        .filter_map(|line| {
            let mut f = line.splitn(4, '|');
            Some(AccessRequest {
                ts: f.next()?.parse().ok()?,
                user: f.next()?.to_owned(),
                perm: parse_perm(f.next()?)?,
                status: RequestStatus::parse(f.next()?)?,
            })
        })
        .collect()
}

/// Reads the full request list for `file`.
pub async fn list(layout: &Layout, file: &str) -> io::Result<Vec<AccessRequest>> {
    match tokio::fs::read_to_string(layout.requests_log(file)).await {
        Ok(text) => Ok(parse(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

async fn write_all(layout: &Layout, file: &str, requests: &[AccessRequest]) -> io::Result<()> {
    tokio::fs::write(layout.requests_log(file), render(requests)).await
}

/// Appends a PENDING request. A duplicate pending request from the same
/// user for the same permission is rejected.
pub async fn submit(
    layout: &Layout,
    file: &str,
    user: &str,
    perm: Permission,
) -> Result<(), RequestError> {
    let requests = list(layout, file).await?;
    let duplicate = requests
        .iter()
        .any(|r| r.status == RequestStatus::Pending && r.user == user && r.perm == perm);
    if duplicate {
        return Err(RequestError::Duplicate);
    }

    let line = format!(
        "{}|{}|{}|{}\n",
        clock::now_secs(),
        user,
        perm_token(perm),
        RequestStatus::Pending.as_str()
    );
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.requests_log(file))
        .await?;
    tokio::io::AsyncWriteExt::write_all(&mut log, line.as_bytes()).await?;
    info!(%file, %user, perm = perm.to_u32().unwrap_or(0), "access request recorded");
    Ok(())
}

/// Flips the user's pending request to APPROVED and persists the
/// granted permission into the file's ACL.
pub async fn approve(
    ss: &StorageServer,
    file: &str,
    user: &str,
    perm: Permission,
) -> Result<(), RequestError> {
    let mut requests = list(&ss.layout, file).await?;
    let entry = requests
        .iter_mut()
        .find(|r| r.status == RequestStatus::Pending && r.user == user && r.perm == perm)
        .ok_or(RequestError::NoPending)?;
    entry.status = RequestStatus::Approved;
    write_all(&ss.layout, file, &requests).await?;
    ss.store.set_acl(file, user, perm)?;
    info!(%file, %user, "access request approved");
    Ok(())
}

/// Flips the user's pending request to DENIED.
pub async fn deny(ss: &StorageServer, file: &str, user: &str) -> Result<(), RequestError> {
    let mut requests = list(&ss.layout, file).await?;
    let entry = requests
        .iter_mut()
        .find(|r| r.status == RequestStatus::Pending && r.user == user)
        .ok_or(RequestError::NoPending)?;
    entry.status = RequestStatus::Denied;
    write_all(&ss.layout, file, &requests).await?;
    info!(%file, %user, "access request denied");
    Ok(())
}

/// Renders the list body shown to the file's owner.
pub fn render_list(requests: &[AccessRequest]) -> String {
    let mut out = String::new();
    for r in requests {
        out.push_str(&format!(
            "{} {} -{} {}\n",
            clock::fmt_minute(r.ts),
            r.user,
            perm_token(r.perm),
            r.status.as_str()
        ));
    }
    out
}
