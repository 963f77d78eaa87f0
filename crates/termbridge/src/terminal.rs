//! Terminal directory: find a live terminal by id, title, or index and drive it.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use crate::types::{BridgeError, BridgeResult};

/// Lines of output retained per terminal.
pub const SCROLLBACK_LINES: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub id: String,
    pub title: String,
    pub index: usize,
    pub alive: bool,
}

/// How a caller names a terminal. `id` wins over `title`, `title` over `index`;
/// an empty selector picks the first terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalSelector {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

impl std::fmt::Display for TerminalSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.id, &self.title, self.index) {
            (Some(id), _, _) => write!(f, "id={id}"),
            (None, Some(title), _) => write!(f, "title={title}"),
            (None, None, Some(index)) => write!(f, "index={index}"),
            (None, None, None) => write!(f, "<default>"),
        }
    }
}

/// A live terminal that accepts input and exposes recent output.
#[async_trait]
pub trait TerminalHandle: Send + Sync {
    fn id(&self) -> &str;

    fn title(&self) -> &str;

    fn is_alive(&self) -> bool;

    async fn send_input(&self, input: &str) -> BridgeResult<()>;

    /// The last `lines` lines of output, oldest first.
    fn read_buffer(&self, lines: usize) -> Vec<String>;
}

/// Lookup of live terminals.
pub trait TerminalDirectory: Send + Sync {
    fn list(&self) -> Vec<TerminalInfo>;

    fn resolve(&self, selector: &TerminalSelector) -> BridgeResult<Arc<dyn TerminalHandle>>;
}

/// In-process directory that terminals are added to by the host.
#[derive(Default)]
pub struct TerminalRegistry {
    terminals: RwLock<Vec<Arc<dyn TerminalHandle>>>,
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, terminal: Arc<dyn TerminalHandle>) {
        tracing::info!("Terminal attached: {} ({})", terminal.title(), terminal.id());
        self.write().push(terminal);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut terminals = self.write();
        let before = terminals.len();
        terminals.retain(|t| t.id() != id);
        before != terminals.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn TerminalHandle>>> {
        self.terminals.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn TerminalHandle>>> {
        self.terminals.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl TerminalDirectory for TerminalRegistry {
    fn list(&self) -> Vec<TerminalInfo> {
        self.read()
            .iter()
            .enumerate()
            .map(|(index, t)| TerminalInfo {
                id: t.id().to_string(),
                title: t.title().to_string(),
                index,
                alive: t.is_alive(),
            })
            .collect()
    }

    fn resolve(&self, selector: &TerminalSelector) -> BridgeResult<Arc<dyn TerminalHandle>> {
        let terminals = self.read();
        let found = match (&selector.id, &selector.title, selector.index) {
            (Some(id), _, _) => terminals.iter().find(|t| t.id() == id),
            (None, Some(title), _) => terminals.iter().find(|t| t.title() == title),
            (None, None, Some(index)) => terminals.get(index),
            (None, None, None) => terminals.first(),
        };
        found
            .cloned()
            .ok_or_else(|| BridgeError::TerminalNotFound(selector.to_string()))
    }
}

type Scrollback = Arc<Mutex<VecDeque<String>>>;

/// A shell child process with piped stdio and captured output.
pub struct ProcessTerminal {
    id: String,
    title: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    scrollback: Scrollback,
    alive: Arc<AtomicBool>,
    _child: Mutex<Child>,
}

impl ProcessTerminal {
    /// Spawn `shell` and start capturing its stdout and stderr.
    pub fn spawn(title: &str, shell: &str) -> BridgeResult<Arc<Self>> {
        let mut child = Command::new(shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Terminal(format!("Failed to spawn {shell}: {e}")))?;

        let scrollback: Scrollback = Arc::new(Mutex::new(VecDeque::new()));
        let alive = Arc::new(AtomicBool::new(true));

        if let Some(stdout) = child.stdout.take() {
            spawn_capture(stdout, scrollback.clone(), Some(alive.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_capture(stderr, scrollback.clone(), None);
        }
        let stdin = child.stdin.take();

        Ok(Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            scrollback,
            alive,
            _child: Mutex::new(child),
        }))
    }
}

fn spawn_capture<R>(stream: R, scrollback: Scrollback, alive: Option<Arc<AtomicBool>>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buf = scrollback.lock().unwrap_or_else(|p| p.into_inner());
            if buf.len() == SCROLLBACK_LINES {
                buf.pop_front();
            }
            buf.push_back(line);
        }
        if let Some(alive) = alive {
            alive.store(false, Ordering::Release);
        }
    });
}

#[async_trait]
impl TerminalHandle for ProcessTerminal {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn send_input(&self, input: &str) -> BridgeResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| BridgeError::Terminal(format!("Terminal {} has no input", self.id)))?;
        if let Err(e) = async {
            stdin.write_all(input.as_bytes()).await?;
            stdin.flush().await
        }
        .await
        {
            guard.take();
            return Err(BridgeError::Terminal(format!("Write to {} failed: {e}", self.id)));
        }
        Ok(())
    }

    fn read_buffer(&self, lines: usize) -> Vec<String> {
        let buf = self.scrollback.lock().unwrap_or_else(|p| p.into_inner());
        let skip = buf.len().saturating_sub(lines);
        buf.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTerminal {
        id: String,
        title: String,
    }

    #[async_trait]
    impl TerminalHandle for FakeTerminal {
        fn id(&self) -> &str {
            &self.id
        }
        fn title(&self) -> &str {
            &self.title
        }
        fn is_alive(&self) -> bool {
            true
        }
        async fn send_input(&self, _input: &str) -> BridgeResult<()> {
            Ok(())
        }
        fn read_buffer(&self, _lines: usize) -> Vec<String> {
            Vec::new()
        }
    }

    fn fake(id: &str, title: &str) -> Arc<dyn TerminalHandle> {
        Arc::new(FakeTerminal {
            id: id.to_string(),
            title: title.to_string(),
        })
    }

    #[test]
    fn test_resolve_by_id_title_index() {
        let registry = TerminalRegistry::new();
        registry.add(fake("a", "build"));
        registry.add(fake("b", "logs"));

        let by_id = TerminalSelector {
            id: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(registry.resolve(&by_id).unwrap().title(), "logs");

        let by_title = TerminalSelector {
            title: Some("build".into()),
            ..Default::default()
        };
        assert_eq!(registry.resolve(&by_title).unwrap().id(), "a");

        let by_index = TerminalSelector {
            index: Some(1),
            ..Default::default()
        };
        assert_eq!(registry.resolve(&by_index).unwrap().id(), "b");

        assert_eq!(registry.resolve(&TerminalSelector::default()).unwrap().id(), "a");
    }

    #[test]
    fn test_resolve_missing() {
        let registry = TerminalRegistry::new();
        assert!(matches!(
            registry.resolve(&TerminalSelector::default()),
            Err(BridgeError::TerminalNotFound(_))
        ));
        registry.add(fake("a", "one"));
        let sel = TerminalSelector {
            index: Some(5),
            ..Default::default()
        };
        assert!(registry.resolve(&sel).is_err());
    }

    #[test]
    fn test_list_and_remove() {
        let registry = TerminalRegistry::new();
        registry.add(fake("a", "one"));
        registry.add(fake("b", "two"));
        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].index, 1);
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.list()[0].id, "b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_terminal_echo() {
        let term = ProcessTerminal::spawn("sh", "sh").unwrap();
        term.send_input("echo hello-from-shell\n").await.unwrap();

        let mut seen = false;
        for _ in 0..100 {
            if term.read_buffer(10).iter().any(|l| l == "hello-from-shell") {
                seen = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(seen, "shell output should be captured");
        assert!(term.is_alive());
    }
}
