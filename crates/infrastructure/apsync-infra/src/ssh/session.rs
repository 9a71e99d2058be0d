use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use apsync_core::{ExecResult, FileFingerprint, RemoteTarget};
use async_trait::async_trait;
use camino::Utf8Path;
use ssh2::{ErrorCode, ExtendedData, Session, Sftp};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::ssh::exec::{build_command_line, SentinelParser};
use crate::ssh::{Connection, TransportError};

// LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;

pub(crate) struct Inner {
    pub(crate) session: Session,
    sftp: Sftp,
}

/// One live SSH session plus its SFTP subsystem, bound to a single
/// target. The underlying transport is single-streamed, so all wire
/// access is serialized behind a mutex while callers stay logically
/// concurrent; blocking libssh2 calls run on the blocking pool. The
/// session disconnects when the last handle is dropped.
pub struct SshConnection {
    target: RemoteTarget,
    inner: Arc<Mutex<Inner>>,
}

impl SshConnection {
    pub async fn connect(target: RemoteTarget) -> Result<Self, TransportError> {
        tokio::task::spawn_blocking(move || Self::connect_blocking(target))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }

    fn connect_blocking(target: RemoteTarget) -> Result<Self, TransportError> {
        let port = target.port.unwrap_or(apsync_config::DEFAULT_SSH_PORT);
        debug!("connecting to {}:{}", target.host, port);
        let tcp = TcpStream::connect((target.host.as_str(), port)).map_err(|source| {
            TransportError::Connect {
                host: target.host.clone(),
                port,
                source,
            }
        })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let user = target
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());
        match &target.password {
            Some(password) => session.userauth_password(&user, password)?,
            None => session.userauth_agent(&user)?,
        }
        if !session.authenticated() {
            return Err(TransportError::Auth {
                user,
                host: target.host.clone(),
            });
        }

        let sftp = session.sftp()?;
        Ok(Self {
            target,
            inner: Arc::new(Mutex::new(Inner { session, sftp })),
        })
    }

    async fn with_session<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> Result<T, TransportError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| TransportError::Join("session mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| TransportError::Join(e.to_string()))?
    }

    pub(crate) fn inner(&self) -> Arc<Mutex<Inner>> {
        self.inner.clone()
    }

    /// Start a batch command and hand back the pid channel alongside
    /// the completion future. The pid becomes available as soon as the
    /// sentinel line arrives, long before the command finishes.
    pub(crate) fn exec_with_pid(
        &self,
        argv: &[String],
        cwd: Option<&Utf8Path>,
    ) -> Result<
        (
            oneshot::Receiver<i64>,
            impl std::future::Future<Output = Result<ExecResult, TransportError>>,
        ),
        TransportError,
    > {
        let cmdline = build_command_line(argv, cwd)?;
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let fut = async move {
            tokio::task::spawn_blocking(move || exec_blocking(&inner, &cmdline, Some(tx)))
                .await
                .map_err(|e| TransportError::Join(e.to_string()))?
        };
        Ok((rx, fut))
    }
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn exec_blocking(
    inner: &Arc<Mutex<Inner>>,
    cmdline: &str,
    mut pid_tx: Option<oneshot::Sender<i64>>,
) -> Result<ExecResult, TransportError> {
    let guard = inner
        .lock()
        .map_err(|_| TransportError::Join("session mutex poisoned".into()))?;
    trace!("exec: {cmdline}");

    let mut channel = guard.session.channel_session()?;
    // One combined stream, same as the caller-visible output contract.
    channel.handle_extended_data(ExtendedData::Merge)?;
    channel.exec(cmdline)?;

    let mut parser = SentinelParser::new();
    let mut output = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = channel.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        if let Some(pid) = parser.feed(&chunk[..n], &mut output) {
            if let Some(tx) = pid_tx.take() {
                let _ = tx.send(pid);
            }
        }
    }
    parser.finish(&mut output);

    channel.wait_close()?;
    let exit_signal = channel.exit_signal()?.exit_signal;
    let exit_code = match exit_signal {
        Some(_) => None,
        None => Some(channel.exit_status()?),
    };
    Ok(ExecResult {
        exit_code,
        exit_signal,
        output,
    })
}

#[async_trait]
impl Connection for SshConnection {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Option<FileFingerprint>, TransportError> {
        let path = path.to_owned();
        self.with_session(move |inner| match inner.sftp.stat(path.as_std_path()) {
            Ok(st) => Ok(Some(FileFingerprint {
                size: st.size.unwrap_or(0),
                mtime_sec: st.mtime.unwrap_or(0) as i64,
                // SFTP v3 stats carry whole seconds only.
                mtime_nsec: None,
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        })
        .await
    }

    async fn mkdir(&self, path: &Utf8Path) -> Result<(), TransportError> {
        let path = path.to_owned();
        self.with_session(move |inner| {
            inner.sftp.mkdir(path.as_std_path(), 0o755)?;
            Ok(())
        })
        .await
    }

    async fn upload(&self, bytes: Vec<u8>, remote: &Utf8Path) -> Result<(), TransportError> {
        let remote = remote.to_owned();
        self.with_session(move |inner| {
            let mut file = inner.sftp.create(remote.as_std_path())?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await
    }

    async fn upload_file(
        &self,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), TransportError> {
        let local = local.to_owned();
        let remote = remote.to_owned();
        self.with_session(move |inner| {
            let bytes = std::fs::read(local.as_std_path())?;
            let mut file = inner.sftp.create(remote.as_std_path())?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await
    }

    async fn download(&self, remote: &Utf8Path) -> Result<Vec<u8>, TransportError> {
        let remote = remote.to_owned();
        self.with_session(move |inner| {
            let mut file = inner.sftp.open(remote.as_std_path())?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(bytes)
        })
        .await
    }

    async fn exec(
        &self,
        argv: &[String],
        cwd: Option<&Utf8Path>,
    ) -> Result<ExecResult, TransportError> {
        let (_pid, fut) = self.exec_with_pid(argv, cwd)?;
        fut.await
    }
}
