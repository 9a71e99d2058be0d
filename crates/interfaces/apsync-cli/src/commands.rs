use crate::bootstrap_label;
use crate::registry::RemoteRegistry;
use crate::workspace::{self, SyncManifest};
use anyhow::{bail, Context, Result};
use apsync_core::{layout, RemoteTarget, SyncOutcome};
use apsync_infra::{RemoteExec, SshConnection};
use apsync_pipeline::{SyncEngine, TransferEvent};
use camino::Utf8PathBuf;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Remotes a command operates on: every enabled one by default, or
/// exactly the named ones (enabled or not) when names are given.
fn selected_targets(registry: &RemoteRegistry, names: &[String]) -> Result<Vec<RemoteTarget>> {
    if names.is_empty() {
        registry
            .list()?
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.target())
            .collect()
    } else {
        names
            .iter()
            .map(|name| registry.find(name)?.target())
            .collect()
    }
}

pub fn cmd_list(registry: &RemoteRegistry) -> Result<()> {
    let remotes = registry.list()?;
    if remotes.is_empty() {
        println!("No remotes registered.");
        return Ok(());
    }

    println!("{:<20} {:<50} {:<8}", "NAME", "URI", "STATE");
    println!("{:-<20} {:-<50} {:-<8}", "", "", "");
    for remote in remotes {
        let state = if remote.enabled { "enabled" } else { "disabled" };
        println!("{:<20} {:<50} {:<8}", remote.name, remote.uri, state);
    }
    Ok(())
}

pub async fn cmd_status(registry: &RemoteRegistry, root: Utf8PathBuf) -> Result<()> {
    let manifest = workspace::load_manifest(&root)?;
    let targets = selected_targets(registry, &[])?;
    if targets.is_empty() {
        println!("No enabled remotes.");
        return Ok(());
    }

    let engine = SyncEngine::new();
    let mut failed = false;
    for target in targets {
        match engine
            .status_target(&target, &manifest.workspace, &manifest.artifacts)
            .await
        {
            Ok(report) => {
                println!(":: {} ({})", report.target, bootstrap_label(report.bootstrap));
                if report.outdated.is_empty() {
                    println!("   all {} artifacts up to date", manifest.artifacts.len());
                } else {
                    println!("   {} artifacts behind:", report.outdated.len());
                    for name in report.outdated {
                        println!("   - {name}");
                    }
                }
            }
            Err(err) => {
                eprintln!(":: {}: {err}", target.name);
                failed = true;
            }
        }
    }
    if failed {
        bail!("status failed for at least one remote");
    }
    Ok(())
}

pub async fn cmd_update(
    registry: &RemoteRegistry,
    root: Utf8PathBuf,
    names: Vec<String>,
) -> Result<()> {
    let manifest = workspace::load_manifest(&root)?;
    let targets = selected_targets(registry, &names)?;
    if targets.is_empty() {
        println!("No enabled remotes.");
        return Ok(());
    }

    let engine = SyncEngine::new();
    let mut failed = false;
    for target in &targets {
        println!(":: Syncing to {}", target.name);
        match sync_with_progress(&engine, target, &manifest).await {
            Ok(outcome) => {
                print_outcome(&outcome);
                failed |= !outcome.is_success();
            }
            Err(err) => {
                eprintln!("   {err:#}");
                failed = true;
            }
        }
    }
    if failed {
        bail!("synchronization failed for at least one remote");
    }
    Ok(())
}

async fn sync_with_progress(
    engine: &SyncEngine,
    target: &RemoteTarget,
    manifest: &SyncManifest,
) -> Result<SyncOutcome> {
    let (tx, mut rx) = mpsc::channel(64);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .context("progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let reporter = tokio::spawn(async move {
        let mut done = 0usize;
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::Started { artifact } => {
                    pb.set_message(format!("transferring {artifact}"));
                }
                TransferEvent::Completed { artifact, success } => {
                    done += 1;
                    if !success {
                        pb.println(format!("   transfer of {artifact} failed"));
                    }
                    pb.set_message(format!("{done} transfers finished"));
                }
            }
        }
        pb.finish_and_clear();
    });

    let outcome = engine
        .sync_target(target, &manifest.workspace, &manifest.artifacts, Some(tx))
        .await;
    // The event sender is gone once sync returns, so the reporter
    // drains and stops on its own.
    let _ = reporter.await;
    Ok(outcome?)
}

fn print_outcome(outcome: &SyncOutcome) {
    if outcome.bootstrapped {
        println!("   remote tool installation updated");
    }
    println!("   {} artifacts transferred", outcome.transferred.len());
    for failure in &outcome.failures {
        match &failure.artifact {
            Some(artifact) => eprintln!("   FAILED {artifact}: {}", failure.cause),
            None => eprintln!("   FAILED: {}", failure.cause),
        }
    }
}

/// Cancels the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Runs `<remote tool> exec <cmd…>` in the remote workspace and
/// reports the exit code the process should propagate: the remote
/// code, or 255 when the command died to a signal or was cancelled.
pub async fn cmd_exec(
    registry: &RemoteRegistry,
    root: Utf8PathBuf,
    name: String,
    cmd: Vec<String>,
    chdir: Option<Utf8PathBuf>,
    interactive: bool,
) -> Result<i32> {
    let manifest = workspace::load_manifest(&root)?;
    let target = registry.find(&name)?.target()?;
    let cwd = target.remote_path(chdir.as_deref().unwrap_or(&manifest.workspace.root_dir));

    let mut argv = vec![layout::REMOTE_TOOL.to_string(), "exec".to_string()];
    argv.extend(cmd);

    let conn = SshConnection::connect(target)
        .await
        .with_context(|| format!("failed to connect to {name}"))?;
    let exec = RemoteExec::new(&conn);

    if interactive {
        return Ok(exec.run_interactive(&argv, &cwd).await?);
    }

    let cancel = cancel_on_ctrl_c();
    match exec.run(&argv, Some(&cwd), &cancel).await {
        Ok(result) => {
            std::io::stdout().write_all(&result.output)?;
            if result.exit_signal.is_some() {
                Ok(255)
            } else {
                Ok(result.exit_code.unwrap_or(255))
            }
        }
        Err(apsync_infra::ExecError::Cancelled) => Ok(255),
        Err(err) => Err(err.into()),
    }
}

/// Installs the workspace's osdep packages on each selected remote,
/// one remote-tool invocation per package manager, `native` first.
pub async fn cmd_osdeps(
    registry: &RemoteRegistry,
    root: Utf8PathBuf,
    names: Vec<String>,
) -> Result<()> {
    let manifest = workspace::load_manifest(&root)?;
    let targets = selected_targets(registry, &names)?;
    if targets.is_empty() {
        println!("No enabled remotes.");
        return Ok(());
    }
    if manifest.osdeps.is_empty() {
        println!("No osdep packages recorded in the workspace manifest.");
        return Ok(());
    }

    let cancel = cancel_on_ctrl_c();
    let mut failed = false;
    for target in &targets {
        println!(":: Installing osdeps on {}", target.name);
        let cwd = target.remote_path(&manifest.workspace.root_dir);
        let conn = match SshConnection::connect(target.clone()).await {
            Ok(conn) => conn,
            Err(err) => {
                eprintln!("   {err}");
                failed = true;
                continue;
            }
        };
        let exec = RemoteExec::new(&conn);

        for group in manifest.ordered_osdeps() {
            let mut argv = vec![
                layout::REMOTE_TOOL.to_string(),
                "sync".to_string(),
                "install-osdeps".to_string(),
                group.manager.clone(),
            ];
            argv.extend(group.packages.iter().cloned());

            match exec.run(&argv, Some(&cwd), &cancel).await {
                Ok(result) if result.success() => {
                    println!("   {}: {} packages", group.manager, group.packages.len());
                }
                Ok(result) => {
                    eprintln!(
                        "   {} install failed:\n{}",
                        group.manager,
                        result.output_lossy()
                    );
                    failed = true;
                    break;
                }
                Err(err) => {
                    eprintln!("   {} install failed: {err}", group.manager);
                    failed = true;
                    break;
                }
            }
        }
    }
    if failed {
        bail!("osdep installation failed for at least one remote");
    }
    Ok(())
}
