//! 本地目录沙箱
//!
//! 每个沙箱是 root 下以 id 命名的目录，创建时从 templates_dir/<template> 复制初始内容；
//! 元数据（模板、创建时间、过期时间）存放在 root/.meta/<id>.json。
//! 路径校验沿用 SafeFs 的思路：拒绝 `..` 逃逸，绝对路径视为相对沙箱根。

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::sandbox::{CommandBuffers, CommandOutput, Sandbox, SandboxError, SandboxProvider};

const META_DIR: &str = ".meta";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxMeta {
    id: String,
    template: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl SandboxMeta {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Utc::now())
    }
}

/// 本地沙箱提供方
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    root: PathBuf,
    templates_dir: PathBuf,
    host_template: String,
    command_timeout: Duration,
}

impl LocalSandboxProvider {
    pub fn new(root: impl AsRef<Path>, templates_dir: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            templates_dir: templates_dir.as_ref().to_path_buf(),
            host_template: "{port}-{id}.localhost".to_string(),
            command_timeout: Duration::from_secs(300),
        }
    }

    /// host 模板，支持 `{port}` 与 `{id}` 占位
    pub fn with_host_template(mut self, template: impl Into<String>) -> Self {
        self.host_template = template.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{id}.json"))
    }

    fn sandbox(&self, id: &str) -> LocalSandbox {
        LocalSandbox {
            id: id.to_string(),
            dir: self.root.join(id),
            meta_path: self.meta_path(id),
            host_template: self.host_template.clone(),
            command_timeout: self.command_timeout,
        }
    }

    /// 删除所有已过期的沙箱，返回删除数量
    pub async fn reap_expired(&self) -> Result<usize, SandboxError> {
        let meta_dir = self.root.join(META_DIR);
        if !meta_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&meta_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match read_meta(&entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable sandbox metadata");
                    continue;
                }
            };
            if meta.is_expired() {
                let dir = self.root.join(&meta.id);
                if dir.exists() {
                    tokio::fs::remove_dir_all(&dir).await?;
                }
                tokio::fs::remove_file(entry.path()).await?;
                tracing::info!(sandbox_id = %meta.id, "reaped expired sandbox");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && name != "."
        && name != ".."
}

async fn read_meta(path: &Path) -> Result<SandboxMeta, SandboxError> {
    let data = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&data).map_err(|e| SandboxError::Metadata(e.to_string()))
}

async fn write_meta(path: &Path, meta: &SandboxMeta) -> Result<(), SandboxError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_string_pretty(meta).map_err(|e| SandboxError::Metadata(e.to_string()))?;
    tokio::fs::write(path, data).await?;
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), SandboxError> {
    std::fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| SandboxError::Io(std::io::Error::other(e.to_string())))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| SandboxError::Io(std::io::Error::other(e.to_string())))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// 把一块原始输出追加到 `pending` 并解码；末尾未完整的多字节字符留到下一块，非法字节替换为 U+FFFD
fn decode_chunk(pending: &mut Vec<u8>, chunk: &[u8]) -> String {
    pending.extend_from_slice(chunk);
    let split = pending.len() - incomplete_tail_len(pending);
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}

fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if !is_plain_name(template) {
            return Err(SandboxError::TemplateNotFound(template.to_string()));
        }
        let template_dir = self.templates_dir.join(template);
        if !template_dir.is_dir() {
            return Err(SandboxError::TemplateNotFound(template.to_string()));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let sandbox = self.sandbox(&id);
        let dir = sandbox.dir.clone();
        tokio::task::spawn_blocking(move || copy_dir(&template_dir, &dir))
            .await
            .map_err(|e| SandboxError::Io(std::io::Error::other(e.to_string())))??;

        let meta = SandboxMeta {
            id: id.clone(),
            template: template.to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        write_meta(&sandbox.meta_path, &meta).await?;
        tracing::info!(sandbox_id = %id, template, "sandbox created");
        Ok(Arc::new(sandbox))
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if !is_plain_name(id) {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        let sandbox = self.sandbox(id);
        if !sandbox.dir.is_dir() || !sandbox.meta_path.exists() {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        let meta = read_meta(&sandbox.meta_path).await?;
        if meta.is_expired() {
            return Err(SandboxError::Expired(id.to_string()));
        }
        Ok(Arc::new(sandbox))
    }
}

/// 本地沙箱句柄
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    id: String,
    dir: PathBuf,
    meta_path: PathBuf,
    host_template: String,
    command_timeout: Duration,
}

impl LocalSandbox {
    /// 把沙箱内路径映射到宿主目录，禁止 `..` 逃逸
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.dir.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(SandboxError::PathEscape(path.to_string())),
            }
        }
        if resolved == self.dir {
            return Err(SandboxError::PathEscape(path.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(&target).await?)
    }

    async fn run_command(
        &self,
        command: &str,
        buffers: &mut CommandBuffers,
    ) -> Result<CommandOutput, SandboxError> {
        tracing::debug!(sandbox_id = %self.id, command, "sandbox run command");

        let mut child = Command::new("sh")
            .args(["-c", command])
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Io(std::io::Error::other("stderr not captured")))?;

        let run = async {
            let (mut stdout, mut stderr) = (stdout, stderr);
            let mut out_chunk = [0u8; 4096];
            let mut err_chunk = [0u8; 4096];
            let mut out_pending = Vec::new();
            let mut err_pending = Vec::new();
            let (mut out_done, mut err_done) = (false, false);
            while !(out_done && err_done) {
                tokio::select! {
                    n = stdout.read(&mut out_chunk), if !out_done => match n? {
                        0 => {
                            buffers.push_stdout(&String::from_utf8_lossy(&out_pending));
                            out_done = true;
                        }
                        n => buffers.push_stdout(&decode_chunk(&mut out_pending, &out_chunk[..n])),
                    },
                    n = stderr.read(&mut err_chunk), if !err_done => match n? {
                        0 => {
                            buffers.push_stderr(&String::from_utf8_lossy(&err_pending));
                            err_done = true;
                        }
                        n => buffers.push_stderr(&decode_chunk(&mut err_pending, &err_chunk[..n])),
                    },
                }
            }
            let status = child.wait().await?;
            Ok::<_, SandboxError>(status)
        };

        let status = tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| SandboxError::CommandTimeout(self.command_timeout.as_secs()))??;

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(SandboxError::CommandExit { exit_code });
        }
        Ok(CommandOutput {
            stdout: buffers.stdout.clone(),
            stderr: buffers.stderr.clone(),
            exit_code,
        })
    }

    fn host(&self, port: u16) -> String {
        self.host_template
            .replace("{port}", &port.to_string())
            .replace("{id}", &self.id)
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<(), SandboxError> {
        let mut meta = read_meta(&self.meta_path).await?;
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| SandboxError::Metadata(e.to_string()))?;
        meta.expires_at = Some(Utc::now() + timeout);
        write_meta(&self.meta_path, &meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_template(tmp: &tempfile::TempDir) -> LocalSandboxProvider {
        let templates = tmp.path().join("templates");
        std::fs::create_dir_all(templates.join("nextjs/app")).unwrap();
        std::fs::write(templates.join("nextjs/app/page.tsx"), "export default 1").unwrap();
        LocalSandboxProvider::new(tmp.path().join("sandboxes"), templates)
    }

    #[tokio::test]
    async fn test_create_copies_template_and_connect_resumes() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();
        assert_eq!(sandbox.read_file("app/page.tsx").await.unwrap(), "export default 1");

        let resumed = provider.connect(sandbox.id()).await.unwrap();
        assert_eq!(resumed.id(), sandbox.id());
        sandbox.write_file("index.html", "<button/>").await.unwrap();
        assert_eq!(resumed.read_file("/index.html").await.unwrap(), "<button/>");
    }

    #[tokio::test]
    async fn test_missing_template_and_unknown_id() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        assert!(matches!(
            provider.create("missing").await,
            Err(SandboxError::TemplateNotFound(_))
        ));
        assert!(matches!(
            provider.connect("does-not-exist").await,
            Err(SandboxError::NotFound(_))
        ));
        assert!(matches!(
            provider.connect("../etc").await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();
        let err = sandbox.write_file("../outside.txt", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::PathEscape(_)));
        assert!(!tmp.path().join("sandboxes/outside.txt").exists());
    }

    #[tokio::test]
    async fn test_run_command_success_and_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();

        let mut buffers = CommandBuffers::new();
        let out = sandbox.run_command("echo hi", &mut buffers).await.unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, 0);

        let mut buffers = CommandBuffers::new();
        let err = sandbox
            .run_command("echo partial; echo oops 1>&2; exit 3", &mut buffers)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::CommandExit { exit_code: 3 }));
        assert_eq!(buffers.stdout, "partial\n");
        assert_eq!(buffers.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_command_runs_inside_sandbox_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();
        let mut buffers = CommandBuffers::new();
        let out = sandbox.run_command("cat app/page.tsx", &mut buffers).await.unwrap();
        assert_eq!(out.stdout, "export default 1\n");
    }

    #[tokio::test]
    async fn test_expired_sandbox_refused_and_reaped() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();
        sandbox.set_timeout(Duration::ZERO).await.unwrap();
        assert!(matches!(
            provider.connect(sandbox.id()).await,
            Err(SandboxError::Expired(_))
        ));
        assert_eq!(provider.reap_expired().await.unwrap(), 1);
        assert!(matches!(
            provider.connect(sandbox.id()).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[test]
    fn test_host_template() {
        let sandbox = LocalSandboxProvider::new("/tmp/a", "/tmp/b")
            .with_host_template("{port}-{id}.sandbox.dev")
            .sandbox("abc");
        assert_eq!(sandbox.host(3000), "3000-abc.sandbox.dev");
    }

    #[tokio::test]
    async fn test_command_output_is_raw_and_tolerates_invalid_utf8() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = provider_with_template(&tmp);
        let sandbox = provider.create("nextjs").await.unwrap();

        let mut buffers = CommandBuffers::new();
        let out = sandbox.run_command("printf abc", &mut buffers).await.unwrap();
        assert_eq!(out.stdout, "abc");

        let mut buffers = CommandBuffers::new();
        let out = sandbox
            .run_command("echo before; printf 'caf\\351\\n'; echo after", &mut buffers)
            .await
            .unwrap();
        assert_eq!(out.stdout, "before\ncaf\u{FFFD}\nafter\n");
    }

    #[test]
    fn test_decode_chunk_keeps_split_multibyte_char() {
        let mut pending = Vec::new();
        let bytes = "é".as_bytes();
        assert_eq!(decode_chunk(&mut pending, &[b'a', bytes[0]]), "a");
        assert_eq!(pending, vec![bytes[0]]);
        assert_eq!(decode_chunk(&mut pending, &[bytes[1], b'b']), "éb");
        assert!(pending.is_empty());
    }
}
