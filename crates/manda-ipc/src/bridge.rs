use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use manda_core::{IpcCommand, IpcEvent, IpcMessage};

use crate::error::{IpcError, Result};
use crate::process::SidecarProcess;

/// Owns the protocol sidecar process.
pub struct BridgeManager {
    bridge_dir: PathBuf,
    process: Option<SidecarProcess>,
    line_tx: mpsc::Sender<String>,
    line_rx: Option<mpsc::Receiver<String>>,
}

impl BridgeManager {
    pub fn new(bridge_dir: PathBuf) -> Self {
        let (line_tx, line_rx) = mpsc::channel(1000);
        Self {
            bridge_dir,
            process: None,
            line_tx,
            line_rx: Some(line_rx),
        }
    }

    pub fn bridge_dir(&self) -> &Path {
        &self.bridge_dir
    }

    /// Raw stdout lines of the sidecar. Can be taken once.
    pub fn take_line_receiver(&mut self) -> Option<mpsc::Receiver<String>> {
        self.line_rx.take()
    }

    pub async fn ensure_dependencies(&self) -> Result<()> {
        let package_json = self.bridge_dir.join("package.json");
        let node_modules = self.bridge_dir.join("node_modules");

        if !package_json.exists() {
            return Err(IpcError::BunInstallFailed(format!(
                "package.json not found in {}",
                self.bridge_dir.display()
            )));
        }

        if !node_modules.exists() {
            info!(dir = %self.bridge_dir.display(), "Installing bridge dependencies with bun");
            self.run_bun_install().await?;
        }

        Ok(())
    }

    async fn run_bun_install(&self) -> Result<()> {
        let output = Command::new("bun")
            .arg("install")
            .current_dir(&self.bridge_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| IpcError::BunInstallFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IpcError::BunInstallFailed(stderr.to_string()));
        }

        info!("bun install completed");
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        self.ensure_dependencies().await?;

        info!("Starting protocol bridge");

        let handle = SidecarProcess::spawn(
            &self.bridge_dir,
            "bun",
            &["run", "index.ts"],
            self.line_tx.clone(),
        )
        .await?;

        self.process = Some(handle);

        info!("Protocol bridge started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if self.process.is_some() {
            info!("Stopping protocol bridge");
            let _ = self.send_command(IpcCommand::Shutdown).await;
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Some(mut process) = self.process.take() {
                let _ = process.kill().await;
            }
            info!("Protocol bridge stopped");
        }
        Ok(())
    }

    /// Writes `message` to the sidecar.
    pub async fn send(&self, message: &IpcMessage) -> Result<()> {
        let process = self.process.as_ref().ok_or(IpcError::ProcessNotRunning)?;
        process.send(&serde_json::to_string(message)?).await
    }

    /// Sends a command and returns the id it went out under.
    pub async fn send_command(&self, command: IpcCommand) -> Result<String> {
        match command.instance_id() {
            Some(instance_id) => {
                debug!(command = command.name(), instance_id, "Sending IPC command")
            }
            None => debug!(command = command.name(), "Sending IPC command"),
        }

        let message = IpcMessage::new_command(command);
        self.send(&message).await?;
        Ok(message.id)
    }

    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut process) = self.process {
            match process.exit_status() {
                Ok(None) => true,
                _ => {
                    self.process = None;
                    false
                }
            }
        } else {
            false
        }
    }

    pub fn parse_event(line: &str) -> Option<IpcEvent> {
        IpcMessage::from_line(line)?.into_event()
    }
}
