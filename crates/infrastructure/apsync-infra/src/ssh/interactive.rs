//! Terminal-forwarding execution. A single cooperative loop alternates
//! bounded non-blocking transport reads with draining whatever local
//! input has arrived; no other operation may share the connection
//! while this runs.

use std::io::{Read, Write};
use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

use camino::Utf8Path;
use tracing::debug;

use crate::ssh::exec::ExecError;
use crate::ssh::session::SshConnection;
use crate::ssh::TransportError;

fn build_interactive_command_line(
    argv: &[String],
    cwd: &Utf8Path,
) -> Result<String, TransportError> {
    let quote = |s: &str| {
        shlex::try_quote(s)
            .map(|q| q.into_owned())
            .map_err(|_| TransportError::Command(format!("cannot quote {s:?}")))
    };
    let mut quoted = Vec::with_capacity(argv.len());
    for arg in argv {
        quoted.push(quote(arg)?);
    }
    Ok(format!(
        "cd {} && exec {}",
        quote(cwd.as_str())?,
        quoted.join(" ")
    ))
}

impl SshConnection {
    pub(crate) async fn exec_interactive(
        &self,
        argv: &[String],
        cwd: &Utf8Path,
    ) -> Result<i32, ExecError> {
        let cmdline = build_interactive_command_line(argv, cwd)?;
        let inner = self.inner();

        // Local stdin is read on its own thread; the loop below only
        // ever drains the channel, so it never blocks on the terminal.
        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>();
        std::thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stdin_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let status = tokio::task::spawn_blocking(move || -> Result<i32, TransportError> {
            let guard = inner
                .lock()
                .map_err(|_| TransportError::Join("session mutex poisoned".into()))?;
            debug!("interactive exec: {cmdline}");

            let mut channel = guard.session.channel_session()?;
            channel.request_pty("xterm", None, None)?;
            channel.exec(&cmdline)?;
            guard.session.set_blocking(false);

            let mut stdout = std::io::stdout();
            let mut stderr = std::io::stderr();
            let mut buf = [0u8; 8192];
            let mut pending: Vec<u8> = Vec::new();
            let poll = Duration::from_millis(apsync_config::INTERACTIVE_POLL_MS);

            let result = loop {
                let mut progressed = false;

                match channel.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        stdout.write_all(&buf[..n])?;
                        stdout.flush()?;
                        progressed = true;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => break Err(TransportError::Io(err)),
                }

                match channel.stderr().read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        stderr.write_all(&buf[..n])?;
                        stderr.flush()?;
                        progressed = true;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => break Err(TransportError::Io(err)),
                }

                if pending.is_empty() {
                    match stdin_rx.try_recv() {
                        Ok(bytes) => pending = bytes,
                        Err(TryRecvError::Empty) => {}
                        // Local end-of-input ends the session, not an
                        // error.
                        Err(TryRecvError::Disconnected) => break Ok(()),
                    }
                }
                if !pending.is_empty() {
                    match channel.write(&pending) {
                        Ok(n) => {
                            pending.drain(..n);
                            progressed = true;
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(err) => break Err(TransportError::Io(err)),
                    }
                }

                if channel.eof() {
                    break Ok(());
                }
                if !progressed {
                    std::thread::sleep(poll);
                }
            };

            guard.session.set_blocking(true);
            let status = result.and_then(|()| {
                channel.close()?;
                channel.wait_close()?;
                Ok(channel.exit_status()?)
            });
            status
        })
        .await
        .map_err(|e| TransportError::Join(e.to_string()))??;

        Ok(status)
    }
}
