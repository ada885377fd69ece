//! FTP-family fetcher: `ftp`, `ftps`, and `sftp` behind one retrying
//! implementation.
//!
//! Every call acquires its own scoped connection: connect, authenticate, run
//! the operation, then tear the connection down on every exit path. Teardown
//! failures are swallowed so they never mask the operation's own error.
//!
//! Directory listings batch the modification time of every sibling in the
//! same pass; the batch lives in a process-wide cache keyed by connection
//! parameters with a short TTL, which amortizes per-file `mtime` round trips
//! when a pattern resolves to many files on the same server.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::warn;

use crate::error::FetchError;
use crate::fetcher::{FetchedFile, Fetcher, FetcherOptions, temp_with_extension};
use crate::uri::{RemoteParts, parse_remote, split_uri};

pub const FTP_SCHEMES: &[&str] = &["ftp", "ftps", "sftp"];

/// Retry ceiling for `open`.
const MAX_RETRIES: u32 = 7;

/// How long a batched directory-mtime snapshot stays usable.
const DIR_MTIMES_TTL: Duration = Duration::from_secs(60);

const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_FTPS_PORT: u16 = 990;
const DEFAULT_SFTP_PORT: u16 = 22;

/// Batched sibling mtimes, keyed by connection parameters and directory and
/// bounded by a TTL. One process-wide instance is shared by every fetcher
/// built with identical parameters.
pub(crate) struct DirMtimeCache {
    ttl: Duration,
    dirs: Mutex<HashMap<String, DirMtimes>>,
}

struct DirMtimes {
    fetched_at: Instant,
    mtimes: HashMap<String, Option<i64>>,
}

impl DirMtimeCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            dirs: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(
        &self,
        connection_key: &str,
        dirpath: &str,
    ) -> Option<HashMap<String, Option<i64>>> {
        let mut dirs = self.dirs.lock().unwrap();
        let slot = format!("{connection_key} {dirpath}");
        match dirs.get(&slot) {
            Some(batch) if batch.fetched_at.elapsed() < self.ttl => Some(batch.mtimes.clone()),
            Some(_) => {
                dirs.remove(&slot);
                None
            }
            None => None,
        }
    }

    fn store(&self, connection_key: &str, dirpath: &str, mtimes: HashMap<String, Option<i64>>) {
        let mut dirs = self.dirs.lock().unwrap();
        dirs.insert(
            format!("{connection_key} {dirpath}"),
            DirMtimes {
                fetched_at: Instant::now(),
                mtimes,
            },
        );
    }
}

static SHARED_DIR_MTIMES: LazyLock<DirMtimeCache> =
    LazyLock::new(|| DirMtimeCache::new(DIR_MTIMES_TTL));

enum FtpSession {
    Plain(FtpStream),
    Secure(NativeTlsFtpStream),
    Sftp {
        session: ssh2::Session,
        sftp: ssh2::Sftp,
    },
}

macro_rules! ftp_variants {
    ($session:expr, |$ftp:ident| $ftp_body:expr, |$sftp:ident| $sftp_body:expr) => {
        match $session {
            FtpSession::Plain($ftp) => $ftp_body,
            FtpSession::Secure($ftp) => $ftp_body,
            FtpSession::Sftp { sftp: $sftp, .. } => $sftp_body,
        }
    };
}

/// Some servers accept `PASV` but time out on the transfer that follows;
/// those get one retry in active mode.
macro_rules! with_active_fallback {
    ($ftp:ident, $call:expr) => {{
        let result = $call;
        match result {
            Err(ref err) if is_socket_timeout(err) => {
                $ftp.set_mode(Mode::Active);
                $call
            }
            other => other,
        }
    }};
}

fn is_socket_timeout(err: &FtpError) -> bool {
    matches!(
        err,
        FtpError::ConnectionError(io_err)
            if io_err.kind() == io::ErrorKind::TimedOut
                || io_err.kind() == io::ErrorKind::WouldBlock
    )
}

fn classify_ftp(target: &str, err: FtpError) -> FetchError {
    match err {
        FtpError::UnexpectedResponse(ref response)
            if response.status == Status::FileUnavailable =>
        {
            FetchError::NotFound(target.to_string())
        }
        other => FetchError::transport(target, other),
    }
}

fn classify_ssh(target: &str, err: ssh2::Error) -> FetchError {
    // SFTP status 2 is "no such file"
    if err.code() == ssh2::ErrorCode::SFTP(2) {
        FetchError::NotFound(target.to_string())
    } else {
        FetchError::transport(target, err)
    }
}

fn resolve_addr(parts: &RemoteParts, default_port: u16) -> Result<SocketAddr, FetchError> {
    let port = parts.port.unwrap_or(default_port);
    (parts.host.as_str(), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            FetchError::invalid_uri(
                format!("{}:{port}", parts.host),
                "host did not resolve to any address",
            )
        })
}

fn connect(parts: &RemoteParts, timeout: Duration) -> Result<FtpSession, FetchError> {
    let target = parts.host.as_str();
    match parts.scheme.as_str() {
        "ftp" => {
            let addr = resolve_addr(parts, DEFAULT_FTP_PORT)?;
            let mut ftp = FtpStream::connect_timeout(addr, timeout)
                .map_err(|err| FetchError::transport(target, err))?;
            ftp.login(
                parts.username.as_deref().unwrap_or_default(),
                parts.password.as_deref().unwrap_or_default(),
            )
            .map_err(|err| FetchError::transport(target, err))?;
            ftp.transfer_type(FileType::Binary)
                .map_err(|err| FetchError::transport(target, err))?;
            Ok(FtpSession::Plain(ftp))
        }
        "ftps" => {
            let addr = resolve_addr(parts, DEFAULT_FTPS_PORT)?;
            let ftp = connect_ftps(parts, addr, timeout)?;
            Ok(FtpSession::Secure(ftp))
        }
        "sftp" => {
            let addr = resolve_addr(parts, DEFAULT_SFTP_PORT)?;
            let tcp = TcpStream::connect_timeout(&addr, timeout)?;
            let mut session =
                ssh2::Session::new().map_err(|err| FetchError::transport(target, err))?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|err| FetchError::transport(target, err))?;
            session
                .userauth_password(
                    parts.username.as_deref().unwrap_or_default(),
                    parts.password.as_deref().unwrap_or_default(),
                )
                .map_err(|err| FetchError::transport(target, err))?;
            let sftp = session
                .sftp()
                .map_err(|err| FetchError::transport(target, err))?;
            Ok(FtpSession::Sftp { session, sftp })
        }
        scheme => Err(FetchError::UnsupportedScheme {
            scheme: scheme.to_string(),
            uri: parts.host.clone(),
        }),
    }
}

/// Connect over FTPS and log in.
///
/// The TLS session of the control connection is reused for data connections,
/// which avoids renegotiation failures on servers that reject fresh data-
/// channel handshakes. Servers disagree on whether data protection must be
/// negotiated before or after login; when the first order is rejected, one
/// fresh session is attempted with login first before giving up.
fn connect_ftps(
    parts: &RemoteParts,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<NativeTlsFtpStream, FetchError> {
    let target = parts.host.as_str();
    let username = parts.username.as_deref().unwrap_or_default();
    let password = parts.password.as_deref().unwrap_or_default();

    let secure_stream = || -> Result<NativeTlsFtpStream, FetchError> {
        let connector =
            TlsConnector::new().map_err(|err| FetchError::transport(target, err))?;
        let plain = NativeTlsFtpStream::connect_timeout(addr, timeout)
            .map_err(|err| FetchError::transport(target, err))?;
        plain
            .into_secure(NativeTlsConnector::from(connector), target)
            .map_err(|err| FetchError::transport(target, err))
    };

    let mut ftp = secure_stream()?;
    if let Err(err) = ftp.login(username, password) {
        if !is_negotiation_order_rejection(&err) {
            return Err(FetchError::transport(target, err));
        }
        let _ = ftp.quit();
        ftp = secure_stream()?;
        ftp.login(username, password)
            .map_err(|err| FetchError::transport(target, err))?;
    }
    ftp.transfer_type(FileType::Binary)
        .map_err(|err| FetchError::transport(target, err))?;
    Ok(ftp)
}

fn is_negotiation_order_rejection(err: &FtpError) -> bool {
    match err {
        FtpError::UnexpectedResponse(response) => String::from_utf8_lossy(&response.body)
            .contains("SSL/TLS required on the control channel"),
        _ => false,
    }
}

fn teardown(session: FtpSession) {
    match session {
        FtpSession::Plain(mut ftp) => {
            let _ = ftp.quit();
        }
        FtpSession::Secure(mut ftp) => {
            let _ = ftp.quit();
        }
        FtpSession::Sftp { session, .. } => {
            let _ = session.disconnect(None, "done", None);
        }
    }
}

fn join_path(dirpath: &str, name: &str) -> String {
    if dirpath.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dirpath.trim_end_matches('/'), name)
    }
}

fn session_listdir(session: &mut FtpSession, path: &str) -> Result<Vec<String>, FetchError> {
    ftp_variants!(
        session,
        |ftp| {
            let names = with_active_fallback!(ftp, ftp.nlst(Some(path)))
                .map_err(|err| classify_ftp(path, err))?;
            // NLST may return full paths
            Ok(names
                .into_iter()
                .map(|name| name.rsplit('/').next().unwrap_or("").to_string())
                .filter(|name| !name.is_empty())
                .collect())
        },
        |sftp| {
            let path = if path.is_empty() { "." } else { path };
            let entries = sftp
                .readdir(Path::new(path))
                .map_err(|err| classify_ssh(path, err))?;
            Ok(entries
                .into_iter()
                .filter_map(|(entry, _)| {
                    entry.file_name().map(|n| n.to_string_lossy().into_owned())
                })
                .collect())
        }
    )
}

fn session_mtime(session: &mut FtpSession, path: &str) -> Result<Option<i64>, FetchError> {
    ftp_variants!(
        session,
        |ftp| {
            // MDTM replies with a fixed-width `YYYYMMDDhhmmss` timestamp,
            // possibly with a fractional-seconds suffix.
            match ftp.mdtm(path) {
                Ok(datetime) => Ok(Some(datetime.and_utc().timestamp())),
                Err(FtpError::UnexpectedResponse(response))
                    if response.status == Status::FileUnavailable =>
                {
                    warn!("no modification time for {path}: file does not exist");
                    Ok(None)
                }
                Err(err) => Err(FetchError::transport(path, err)),
            }
        },
        |sftp| {
            match sftp.stat(Path::new(path)) {
                Ok(stat) => Ok(stat.mtime.map(|m| m as i64)),
                Err(err) if err.code() == ssh2::ErrorCode::SFTP(2) => {
                    warn!("no modification time for {path}: file does not exist");
                    Ok(None)
                }
                Err(err) => Err(FetchError::transport(path, err)),
            }
        }
    )
}

fn session_retrieve(
    session: &mut FtpSession,
    path: &str,
    out: &mut std::fs::File,
) -> Result<(), FetchError> {
    ftp_variants!(
        session,
        |ftp| {
            with_active_fallback!(
                ftp,
                ftp.retr(path, |reader| {
                    io::copy(reader, out)
                        .map(|_| ())
                        .map_err(FtpError::ConnectionError)
                })
            )
            .map_err(|err| classify_ftp(path, err))
        },
        |sftp| {
            let mut remote = sftp
                .open(Path::new(path))
                .map_err(|err| classify_ssh(path, err))?;
            io::copy(&mut remote, out)?;
            Ok(())
        }
    )
}

/// Retry `op` on transient errors, sleeping `2 * attempt^2` seconds between
/// attempts, up to the ceiling. Permanent errors propagate immediately; the
/// last transient error propagates once the ceiling is reached.
fn retry_with_backoff<T>(
    max_attempts: u32,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(err);
                }
                let delay = Duration::from_secs(u64::from(2 * attempt * attempt));
                warn!("retry #{attempt}: sleeping {}s after {err}", delay.as_secs());
                sleep(delay);
            }
        }
    }
}

/// Fetcher for the FTP scheme family.
pub struct FtpFetcher {
    connect_timeout: Duration,
}

impl FtpFetcher {
    pub fn new(options: &FetcherOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
        }
    }

    /// Scoped connection acquisition: connect, run `op`, always tear down.
    fn with_session<T>(
        &self,
        uri: &str,
        op: impl FnOnce(&mut FtpSession, &str) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let parts = parse_remote(uri)?;
        let mut session = connect(&parts, self.connect_timeout)?;
        let result = op(&mut session, &parts.path);
        teardown(session);
        result
    }

    fn try_open(&self, uri: &str) -> Result<FetchedFile, FetchError> {
        self.with_session(uri, |session, path| {
            let mut temp = temp_with_extension(uri)?;
            session_retrieve(session, path, temp.as_file_mut())?;
            Ok(FetchedFile::from_temp(temp)?)
        })
    }

    /// Sibling names and mtimes of a directory, fetched in one connection
    /// and cached for a short window.
    fn dir_mtimes(&self, dirpath: &str) -> Result<HashMap<String, Option<i64>>, FetchError> {
        let connection_key = parse_remote(dirpath)?.connection_key();
        if let Some(mtimes) = SHARED_DIR_MTIMES.lookup(&connection_key, dirpath) {
            return Ok(mtimes);
        }
        let mtimes = self.with_session(dirpath, |session, path| {
            let mut mtimes = HashMap::new();
            for name in session_listdir(session, path)? {
                let mtime = session_mtime(session, &join_path(path, &name))?;
                mtimes.insert(name, mtime);
            }
            Ok(mtimes)
        })?;
        SHARED_DIR_MTIMES.store(&connection_key, dirpath, mtimes.clone());
        Ok(mtimes)
    }
}

impl Fetcher for FtpFetcher {
    fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError> {
        retry_with_backoff(MAX_RETRIES, thread::sleep, || self.try_open(uri))
    }

    fn listdir(&mut self, dirpath: &str) -> Result<Vec<String>, FetchError> {
        Ok(self.dir_mtimes(dirpath)?.into_keys().collect())
    }

    fn mtime(&mut self, uri: &str) -> Result<Option<i64>, FetchError> {
        let (dirpath, name) = split_uri(uri);
        let connection_key = parse_remote(uri)?.connection_key();
        if let Some(mtimes) = SHARED_DIR_MTIMES.lookup(&connection_key, dirpath) {
            return Ok(mtimes.get(name).copied().flatten());
        }
        self.with_session(uri, |session, path| session_mtime(session, path))
    }
}
