// SFTP implementation of RemoteFileSource
// ssh2 is blocking, so every session runs on the blocking thread pool.

use super::{check_destination, RemoteFileSource, TransferError, TransferStage, TransferSummary};
use crate::config::SftpCredentials;
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Longest a blocking libssh2 call may wait
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest a TCP connect attempt may take per resolved address
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pulls directories over SFTP with password authentication
#[derive(Debug, Clone)]
pub struct SftpSource {
    credentials: SftpCredentials,
    session_timeout: Duration,
}

impl SftpSource {
    pub fn new(credentials: SftpCredentials) -> Self {
        Self {
            credentials,
            session_timeout: SESSION_TIMEOUT,
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

#[async_trait]
impl RemoteFileSource for SftpSource {
    #[instrument(skip(self), fields(host = %self.credentials.host, port = self.credentials.port))]
    async fn fetch_directory(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<TransferSummary, TransferError> {
        let credentials = self.credentials.clone();
        let session_timeout = self.session_timeout;
        let remote_root = PathBuf::from(remote_path);
        let local_root = destination.to_path_buf();

        let summary = tokio::task::spawn_blocking(move || {
            pull_tree(&credentials, session_timeout, &remote_root, &local_root)
        })
        .await
        .map_err(|e| TransferError::new(TransferStage::Read, format!("Transfer task failed: {}", e)))??;

        info!(
            files = summary.files,
            directories = summary.directories,
            bytes = summary.bytes,
            "World folder downloaded"
        );
        Ok(summary)
    }
}

/// Disconnects the session when dropped, so early returns still close it
struct SessionGuard {
    session: Session,
    closed: bool,
}

impl SessionGuard {
    fn close(mut self) -> Result<(), ssh2::Error> {
        self.closed = true;
        self.session.disconnect(None, "transfer finished", None)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.session.disconnect(None, "transfer aborted", None) {
                debug!(error = %e, "Disconnect after failed transfer also failed");
            }
        }
    }
}

// Tries every resolved address, each bounded by CONNECT_TIMEOUT
fn connect(credentials: &SftpCredentials) -> Result<TcpStream, TransferError> {
    let target = format!("{}:{}", credentials.host, credentials.port);
    let addresses = (credentials.host.as_str(), credentials.port)
        .to_socket_addrs()
        .map_err(|e| TransferError::new(TransferStage::Connect, format!("{}: {}", target, e)))?;

    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(address = %address, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    let reason = match last_error {
        Some(e) => e.to_string(),
        None => "no addresses resolved".to_string(),
    };
    Err(TransferError::new(
        TransferStage::Connect,
        format!("{}: {}", target, reason),
    ))
}

fn open_session(
    credentials: &SftpCredentials,
    session_timeout: Duration,
) -> Result<SessionGuard, TransferError> {
    debug!("Connecting to SFTP server");
    let tcp = connect(credentials)?;

    let mut session = Session::new()
        .map_err(|e| TransferError::new(TransferStage::Connect, e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(session_timeout.as_millis()).unwrap_or(u32::MAX));

    // Guard from here on so a failed handshake still disconnects
    let mut guard = SessionGuard {
        session,
        closed: false,
    };

    guard
        .session
        .handshake()
        .map_err(|e| TransferError::new(TransferStage::Connect, format!("SSH handshake failed: {}", e)))?;

    guard
        .session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|e| TransferError::new(TransferStage::Authenticate, e.to_string()))?;

    if !guard.session.authenticated() {
        return Err(TransferError::new(
            TransferStage::Authenticate,
            format!("Server rejected credentials for {}", credentials.username),
        ));
    }

    debug!("Connected to SFTP server");
    Ok(guard)
}

fn pull_tree(
    credentials: &SftpCredentials,
    session_timeout: Duration,
    remote_root: &Path,
    local_root: &Path,
) -> Result<TransferSummary, TransferError> {
    check_destination(local_root)?;

    let guard = open_session(credentials, session_timeout)?;
    let result = guard
        .session
        .sftp()
        .map_err(|e| TransferError::new(TransferStage::Connect, format!("SFTP subsystem unavailable: {}", e)))
        .and_then(|sftp| copy_tree(&sftp, remote_root, local_root));

    if let Err(e) = guard.close() {
        warn!(error = %e, "Failed to disconnect cleanly from SFTP server");
    }
    result
}

fn copy_tree(sftp: &Sftp, remote_root: &Path, local_root: &Path) -> Result<TransferSummary, TransferError> {
    let root_stat = sftp.stat(remote_root).map_err(|e| {
        TransferError::new(
            TransferStage::Read,
            format!("Remote path {} is not accessible: {}", remote_root.display(), e),
        )
    })?;
    if !root_stat.is_dir() {
        return Err(TransferError::new(
            TransferStage::Read,
            format!("Remote path {} is not a directory", remote_root.display()),
        ));
    }

    let mut summary = TransferSummary::default();
    let mut pending = vec![(remote_root.to_path_buf(), local_root.to_path_buf())];

    while let Some((remote_dir, local_dir)) = pending.pop() {
        let entries = sftp.readdir(remote_dir.as_path()).map_err(|e| {
            TransferError::new(
                TransferStage::Read,
                format!("Failed to list {}: {}", remote_dir.display(), e),
            )
        })?;

        for (remote_entry, stat) in entries {
            let Some(name) = safe_entry_name(&remote_entry) else {
                continue;
            };
            let local_entry = local_dir.join(name);

            if stat.is_dir() {
                fs::create_dir(&local_entry).map_err(|e| write_error(&local_entry, e))?;
                summary.directories += 1;
                pending.push((remote_entry, local_entry));
            } else if stat.is_file() {
                summary.bytes += copy_file(sftp, &remote_entry, &local_entry)?;
                summary.files += 1;
            } else {
                debug!(path = %remote_entry.display(), "Skipping non-regular entry");
            }
        }
    }

    Ok(summary)
}

fn copy_file(sftp: &Sftp, remote: &Path, local: &Path) -> Result<u64, TransferError> {
    let mut source = sftp.open(remote).map_err(|e| {
        TransferError::new(
            TransferStage::Read,
            format!("Failed to open {}: {}", remote.display(), e),
        )
    })?;
    let mut target = fs::File::create(local).map_err(|e| write_error(local, e))?;

    io::copy(&mut source, &mut target).map_err(|e| {
        TransferError::new(
            TransferStage::Read,
            format!("Failed to copy {}: {}", remote.display(), e),
        )
    })
}

fn write_error(path: &Path, e: io::Error) -> TransferError {
    TransferError::new(
        TransferStage::Write,
        format!("Failed to write {}: {}", path.display(), e),
    )
}

/// Final component of a remote entry, if it is safe to create locally.
///
/// Listings may contain `.`/`..` or names with separators; none of those may
/// escape the destination directory.
fn safe_entry_name(remote_entry: &Path) -> Option<&OsStr> {
    let name = remote_entry.file_name()?;
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(part),
        _ => None,
    }
}
