use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{IpcError, Result};

const STDIN_QUEUE: usize = 256;

/// The sidecar child. Frames are newline-delimited JSON in both directions.
pub struct SidecarProcess {
    child: Child,
    frames: mpsc::Sender<String>,
}

impl SidecarProcess {
    /// Starts `program args..` in `dir`. Every non-blank stdout line goes to
    /// `inbound`; stderr ends up in the log.
    pub async fn spawn(dir: &Path, program: &str, args: &[&str], inbound: mpsc::Sender<String>) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IpcError::SpawnFailed(format!("{program}: {e}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(IpcError::ProcessNotRunning);
        };

        let (frames, queued) = mpsc::channel(STDIN_QUEUE);
        tokio::spawn(write_frames(stdin, queued));

        tokio::spawn(read_frames(BufReader::new(stdout), move |line| {
            let inbound = inbound.clone();
            async move { inbound.send(line).await.is_ok() }
        }));

        let label = program.to_string();
        tokio::spawn(read_frames(BufReader::new(stderr), move |line| {
            warn!(process = %label, "stderr: {line}");
            std::future::ready(true)
        }));

        debug!(program, pid = ?child.id(), "Sidecar spawned");
        Ok(Self { child, frames })
    }

    /// Queues one frame for stdin. A trailing newline is added when missing.
    pub async fn send(&self, frame: &str) -> Result<()> {
        self.frames
            .send(terminated(frame))
            .await
            .map_err(|_| IpcError::ChannelClosed)
    }

    pub async fn kill(&mut self) -> Result<()> {
        Ok(self.child.kill().await?)
    }

    /// `None` while the child is still running.
    pub fn exit_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}

fn terminated(frame: &str) -> String {
    let mut line = frame.to_string();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

/// Writes queued frames, flushing once the queue is momentarily empty.
async fn write_frames(stdin: ChildStdin, mut queued: mpsc::Receiver<String>) {
    let mut out = BufWriter::new(stdin);
    while let Some(frame) = queued.recv().await {
        if write_batch(&mut out, frame, &mut queued).await.is_err() {
            debug!("Sidecar stdin closed");
            break;
        }
    }
}

async fn write_batch<W: AsyncWrite + Unpin>(
    out: &mut W,
    first: String,
    queued: &mut mpsc::Receiver<String>,
) -> std::io::Result<()> {
    out.write_all(first.as_bytes()).await?;
    while let Ok(frame) = queued.try_recv() {
        out.write_all(frame.as_bytes()).await?;
    }
    out.flush().await
}

/// Feeds each non-blank line, minus any `\r`, to `on_line` until the stream
/// ends or `on_line` returns false.
async fn read_frames<R, F, Fut>(reader: R, mut on_line: F)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if !on_line(line.to_string()).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_end_in_exactly_one_newline() {
        assert_eq!(terminated("{}"), "{}\n");
        assert_eq!(terminated("{}\n"), "{}\n");
    }

    #[tokio::test]
    async fn blank_lines_and_carriage_returns_are_dropped() {
        let input: &[u8] = b"one\r\n\n   \ntwo\nthree";
        let mut seen = Vec::new();
        read_frames(input, |line| {
            seen.push(line);
            std::future::ready(true)
        })
        .await;
        assert_eq!(seen, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn reading_stops_when_the_consumer_does() {
        let input: &[u8] = b"a\nb\nc\n";
        let mut seen = Vec::new();
        read_frames(input, |line| {
            seen.push(line);
            std::future::ready(seen.len() < 2)
        })
        .await;
        assert_eq!(seen, ["a", "b"]);
    }

    #[tokio::test]
    async fn queued_frames_are_written_in_one_batch() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("b\n".to_string()).await.unwrap();
        tx.send("c\n".to_string()).await.unwrap();

        let mut out = Vec::new();
        write_batch(&mut out, "a\n".to_string(), &mut rx).await.unwrap();
        assert_eq!(out, b"a\nb\nc\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn frames_round_trip_through_cat() {
        use std::time::Duration;

        let (tx, mut rx) = mpsc::channel(8);
        let mut process = SidecarProcess::spawn(Path::new("."), "cat", &[], tx).await.unwrap();

        process.send("{\"hello\":1}").await.unwrap();
        process.send("\n").await.unwrap();
        process.send("second\n").await.unwrap();

        for expected in ["{\"hello\":1}", "second"] {
            let line = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert_eq!(line, expected);
        }

        assert!(process.exit_status().unwrap().is_none());
        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let (tx, _rx) = mpsc::channel(1);
        let err = SidecarProcess::spawn(Path::new("."), "definitely-not-a-real-binary-xyz", &[], tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IpcError::SpawnFailed(msg) if msg.starts_with("definitely-not")));
    }
}
