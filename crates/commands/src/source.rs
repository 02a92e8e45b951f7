//! Where pending commands come from and where their reports go.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use warden_core::{Command, CommandReport, WireCommand};

#[async_trait::async_trait]
pub trait CommandSource: Send + Sync {
    async fn list_pending_commands(&self) -> Result<Vec<Command>>;
    async fn send_command_reports(&self, reports: &[CommandReport]) -> Result<()>;
}

/// File-backed source.
///
/// Pending commands are a JSON array in `commands`. A batch is claimed by
/// renaming the file, so writers should drop a new file in place rather than
/// edit it. A batch that does not parse is moved aside to `<file>.rejected`.
/// Reports are appended to `reports` as JSON lines.
pub struct SpoolSource {
    commands: PathBuf,
    reports: PathBuf,
}

impl SpoolSource {
    pub fn new(commands: impl Into<PathBuf>, reports: impl Into<PathBuf>) -> Self {
        Self { commands: commands.into(), reports: reports.into() }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.commands.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        self.commands.with_file_name(name)
    }
}

pub fn parse_commands(bytes: &[u8]) -> Result<Vec<Command>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let wire: Vec<WireCommand> = serde_json::from_slice(bytes).context("parsing pending commands")?;
    Ok(wire.into_iter().map(Command::from).collect())
}

async fn read_claimed(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))
}

#[async_trait::async_trait]
impl CommandSource for SpoolSource {
    async fn list_pending_commands(&self) -> Result<Vec<Command>> {
        let claimed = self.sibling(".claimed");
        let leftover = tokio::fs::try_exists(&claimed)
            .await
            .with_context(|| format!("checking {}", claimed.display()))?;
        if leftover {
            // A previous poll claimed this batch but never finished with it.
            warn!(path = %claimed.display(), "resuming previously claimed batch");
        } else {
            match tokio::fs::rename(&self.commands, &claimed).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(anyhow!(e).context(format!("claiming {}", self.commands.display()))),
            }
        }

        let bytes = read_claimed(&claimed).await?;
        match parse_commands(&bytes) {
            Ok(cmds) => {
                if let Err(e) = tokio::fs::remove_file(&claimed).await {
                    warn!(error = %e, path = %claimed.display(), "failed to remove claimed batch; it will be replayed");
                }
                debug!(count = cmds.len(), path = %self.commands.display(), "spool batch claimed");
                Ok(cmds)
            }
            Err(e) => {
                let rejected = self.sibling(".rejected");
                if let Err(re) = tokio::fs::rename(&claimed, &rejected).await {
                    warn!(error = %re, path = %claimed.display(), "failed to set rejected batch aside");
                }
                Err(e)
            }
        }
    }

    async fn send_command_reports(&self, reports: &[CommandReport]) -> Result<()> {
        let mut buf = Vec::new();
        for r in reports {
            serde_json::to_writer(&mut buf, r).context("serializing command report")?;
            buf.push(b'\n');
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.reports)
            .await
            .with_context(|| format!("opening {}", self.reports.display()))?;
        f.write_all(&buf).await.with_context(|| format!("writing {}", self.reports.display()))?;
        f.flush().await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    pending: Vec<Command>,
    sent: Vec<Vec<CommandReport>>,
    list_calls: usize,
    fail_lists: usize,
    fail_sends: usize,
}

/// In-memory source with failure injection. Listing drains the queue.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<MemoryInner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, cmd: Command) {
        self.inner.lock().pending.push(cmd);
    }

    /// Make the next `n` listings fail.
    pub fn fail_lists(&self, n: usize) {
        self.inner.lock().fail_lists = n;
    }

    /// Make the next `n` report sends fail.
    pub fn fail_sends(&self, n: usize) {
        self.inner.lock().fail_sends = n;
    }

    pub fn sent(&self) -> Vec<Vec<CommandReport>> {
        self.inner.lock().sent.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().list_calls
    }
}

#[async_trait::async_trait]
impl CommandSource for MemorySource {
    async fn list_pending_commands(&self) -> Result<Vec<Command>> {
        let mut g = self.inner.lock();
        g.list_calls += 1;
        if g.fail_lists > 0 {
            g.fail_lists -= 1;
            return Err(anyhow!("platform unavailable"));
        }
        Ok(std::mem::take(&mut g.pending))
    }

    async fn send_command_reports(&self, reports: &[CommandReport]) -> Result<()> {
        let mut g = self.inner.lock();
        if g.fail_sends > 0 {
            g.fail_sends -= 1;
            return Err(anyhow!("platform unavailable"));
        }
        g.sent.push(reports.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{CommandPayload, ReportErrorKind};

    const BATCH: &str = r#"[
        {"id": "c1", "createdAt": "2022-05-01T10:00:00Z", "type": "delete-ingress-acp",
         "data": {"ingressId": "web@prod.ingress.networking.k8s.io"}}
    ]"#;

    #[tokio::test]
    async fn spool_batch_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let cmds = dir.path().join("commands.json");
        let reports = dir.path().join("reports.jsonl");
        std::fs::write(&cmds, BATCH).unwrap();
        let src = SpoolSource::new(&cmds, &reports);

        let batch = src.list_pending_commands().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(batch[0].payload, CommandPayload::DeletePolicy(_)));
        assert!(!cmds.exists());

        assert!(src.list_pending_commands().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spool_rejects_garbage_and_moves_it_aside() {
        let dir = tempfile::tempdir().unwrap();
        let cmds = dir.path().join("commands.json");
        std::fs::write(&cmds, "{not json").unwrap();
        let src = SpoolSource::new(&cmds, dir.path().join("reports.jsonl"));

        assert!(src.list_pending_commands().await.is_err());
        assert!(dir.path().join("commands.json.rejected").exists());
        assert!(src.list_pending_commands().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spool_appends_reports_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("reports.jsonl");
        let src = SpoolSource::new(dir.path().join("commands.json"), &reports);

        src.send_command_reports(&[CommandReport::success("c1")]).await.unwrap();
        src.send_command_reports(&[CommandReport::failure("c2", ReportErrorKind::IngressNotFound)])
            .await
            .unwrap();

        let text = std::fs::read_to_string(&reports).unwrap();
        let lines: Vec<CommandReport> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(
            lines,
            vec![CommandReport::success("c1"), CommandReport::failure("c2", ReportErrorKind::IngressNotFound)]
        );
    }

    #[tokio::test]
    async fn spool_resumes_a_leftover_claimed_batch_first() {
        let dir = tempfile::tempdir().unwrap();
        let cmds = dir.path().join("commands.json");
        let claimed = dir.path().join("commands.json.claimed");
        std::fs::write(&claimed, BATCH).unwrap();
        std::fs::write(
            &cmds,
            r#"[{"id": "c2", "createdAt": "2022-05-01T11:00:00Z", "type": "delete-ingress-acp",
                 "data": {"ingressId": "web@prod.ingress.networking.k8s.io"}}]"#,
        )
        .unwrap();
        let src = SpoolSource::new(&cmds, dir.path().join("reports.jsonl"));

        let first = src.list_pending_commands().await.unwrap();
        assert_eq!(first.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);
        assert!(!claimed.exists());
        assert!(cmds.exists(), "new batch is left for the next poll");

        let second = src.list_pending_commands().await.unwrap();
        assert_eq!(second.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c2"]);
        assert!(src.list_pending_commands().await.unwrap().is_empty());
    }

    #[test]
    fn blank_spool_file_is_an_empty_batch() {
        assert!(parse_commands(b"  \n").unwrap().is_empty());
        assert!(parse_commands(b"[]").unwrap().is_empty());
    }
}
