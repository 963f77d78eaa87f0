//! Background transfer manager.
//!
//! Tasks live in the manager, not in the request that started them. Each task
//! owns a cancellation flag that the copy loop polls at every chunk boundary,
//! so `cancel()` stops the copy instead of only relabelling it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::fs::{BoxedReader, BoxedWriter, RemoteFs};
use crate::types::{
    BridgeError, BridgeResult, TransferDirection, TransferFilter, TransferStatus, TransferTask,
};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_TRANSFER_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_RETENTION: usize = 100;

/// Limits applied by the transfer manager.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub max_upload_bytes: u64,
    pub max_download_bytes: u64,
    /// Terminal tasks kept for status queries.
    pub retention: usize,
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            max_download_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            retention: DEFAULT_RETENTION,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransferConfig {
    fn limit_for(&self, direction: TransferDirection) -> u64 {
        match direction {
            TransferDirection::Upload => self.max_upload_bytes,
            TransferDirection::Download => self.max_download_bytes,
        }
    }
}

/// Parameters for `TransferManager::start_transfer`.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    pub owner_session_id: Option<String>,
    /// Wait for completion instead of returning the pending task.
    pub sync: bool,
}

struct TaskEntry {
    task: TransferTask,
    cancel: Arc<AtomicBool>,
    clock: Instant,
    end_seq: u64,
}

/// Tracks uploads and downloads independent of any connection.
pub struct TransferManager {
    remote: Arc<dyn RemoteFs>,
    config: TransferConfig,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    end_counter: AtomicU64,
}

impl TransferManager {
    pub fn new(remote: Arc<dyn RemoteFs>, config: TransferConfig) -> Self {
        Self {
            remote,
            config,
            tasks: Mutex::new(HashMap::new()),
            end_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn RemoteFs> {
        &self.remote
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate and register a transfer, then run it inline (`sync`) or in the background.
    pub async fn start_transfer(
        self: &Arc<Self>,
        request: TransferRequest,
    ) -> BridgeResult<TransferTask> {
        let total_bytes = self.source_size(&request).await?;
        let limit = self.config.limit_for(request.direction);
        if total_bytes > limit {
            return Err(BridgeError::FileTooLarge {
                direction: request.direction,
                size: total_bytes,
                limit,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let task = TransferTask {
            id: id.clone(),
            direction: request.direction,
            local_path: request.local_path.clone(),
            remote_path: request.remote_path.clone(),
            owner_session_id: request.owner_session_id.clone(),
            status: TransferStatus::Pending,
            progress_percent: 0,
            bytes_transferred: 0,
            total_bytes,
            throughput_bytes_per_sec: 0,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };

        {
            let mut tasks = self.lock();
            tasks.insert(
                id.clone(),
                TaskEntry {
                    task: task.clone(),
                    cancel: cancel.clone(),
                    clock: Instant::now(),
                    end_seq: 0,
                },
            );
            self.evict_terminal(&mut tasks);
        }

        tracing::info!(
            "Transfer {id} queued: {} {} -> {} ({total_bytes} bytes)",
            request.direction,
            request.local_path,
            request.remote_path
        );

        // Runs detached from the caller; a sync caller only waits on it.
        let sync = request.sync;
        let manager = Arc::clone(self);
        let run_id = id.clone();
        let handle = tokio::spawn(async move {
            manager.execute(&run_id, &request, cancel).await;
        });

        if !sync {
            return Ok(task);
        }
        if let Err(e) = handle.await {
            tracing::error!("Transfer {id} task ended abnormally: {e}");
            self.finish(&id, Some(format!("Transfer task ended abnormally: {e}")));
        }
        self.status(&id)
    }

    async fn source_size(&self, request: &TransferRequest) -> BridgeResult<u64> {
        match request.direction {
            TransferDirection::Upload => {
                let meta = tokio::fs::metadata(&request.local_path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        BridgeError::SourceMissing(request.local_path.clone())
                    } else {
                        BridgeError::Io(e)
                    }
                })?;
                if meta.is_dir() {
                    return Err(BridgeError::InvalidInput(format!(
                        "{} is a directory",
                        request.local_path
                    )));
                }
                Ok(meta.len())
            }
            TransferDirection::Download => {
                let stat = self.remote.stat(&request.remote_path).await?;
                if stat.is_dir {
                    return Err(BridgeError::InvalidInput(format!(
                        "{} is a directory",
                        request.remote_path
                    )));
                }
                Ok(stat.size)
            }
        }
    }

    async fn open_endpoints(
        &self,
        request: &TransferRequest,
    ) -> BridgeResult<(BoxedReader, BoxedWriter)> {
        match request.direction {
            TransferDirection::Upload => {
                let reader = tokio::fs::File::open(&request.local_path).await?;
                let writer = self.remote.open_write(&request.remote_path).await?;
                Ok((Box::new(reader), writer))
            }
            TransferDirection::Download => {
                let reader = self.remote.open_read(&request.remote_path).await?;
                if let Some(parent) = Path::new(&request.local_path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let writer = tokio::fs::File::create(&request.local_path).await?;
                Ok((reader, Box::new(writer)))
            }
        }
    }

    async fn discard_partial(&self, request: &TransferRequest) {
        let result = match request.direction {
            TransferDirection::Upload => self.remote.remove(&request.remote_path).await,
            TransferDirection::Download => tokio::fs::remove_file(&request.local_path)
                .await
                .map_err(BridgeError::from),
        };
        if let Err(e) = result {
            tracing::debug!("Could not remove partial transfer output: {e}");
        }
    }

    async fn execute(&self, id: &str, request: &TransferRequest, cancel: Arc<AtomicBool>) {
        if !self.transition(id, TransferStatus::Pending, TransferStatus::Running) {
            tracing::debug!("Transfer {id} no longer pending, not starting");
            return;
        }

        // Nothing is discarded unless this transfer opened the destination itself.
        let (reader, writer) = match self.open_endpoints(request).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!("Transfer {id} failed to open: {e}");
                self.finish(id, Some(e.to_string()));
                return;
            }
        };

        match self.copy(id, reader, writer, &cancel).await {
            Ok(true) => self.finish(id, None),
            Ok(false) => {
                tracing::info!("Transfer {id} stopped after cancellation");
                self.discard_partial(request).await;
            }
            Err(e) => {
                tracing::warn!("Transfer {id} failed: {e}");
                self.finish(id, Some(e.to_string()));
                self.discard_partial(request).await;
            }
        }
    }

    /// Returns `Ok(false)` when the copy stopped because the task left `Running`.
    async fn copy(
        &self,
        id: &str,
        mut reader: BoxedReader,
        mut writer: BoxedWriter,
        cancel: &AtomicBool,
    ) -> BridgeResult<bool> {
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            if cancel.load(Ordering::Acquire) {
                return Ok(false);
            }
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            if !self.record_progress(id, n as u64) {
                return Ok(false);
            }
        }

        writer.flush().await?;
        writer.shutdown().await?;
        Ok(true)
    }

    fn transition(&self, id: &str, from: TransferStatus, to: TransferStatus) -> bool {
        let mut tasks = self.lock();
        match tasks.get_mut(id) {
            Some(entry) if entry.task.status == from => {
                entry.task.status = to;
                entry.clock = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Add `bytes` to a running task. Returns false if the task is no longer running.
    fn record_progress(&self, id: &str, bytes: u64) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(id) else {
            return false;
        };
        if entry.task.status != TransferStatus::Running {
            return false;
        }

        let task = &mut entry.task;
        task.bytes_transferred += bytes;
        // The source grew since it was measured.
        if task.bytes_transferred > task.total_bytes {
            task.total_bytes = task.bytes_transferred;
        }
        task.progress_percent = percent(task.bytes_transferred, task.total_bytes);
        let elapsed = entry.clock.elapsed().as_secs_f64().max(1e-3);
        task.throughput_bytes_per_sec = (task.bytes_transferred as f64 / elapsed) as u64;
        true
    }

    fn finish(&self, id: &str, error: Option<String>) {
        let seq = self.end_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(id) else {
            return;
        };
        if entry.task.status != TransferStatus::Running {
            return;
        }

        let task = &mut entry.task;
        match error {
            None => {
                // The source shrank since it was measured.
                task.total_bytes = task.bytes_transferred;
                task.progress_percent = 100;
                task.status = TransferStatus::Completed;
                tracing::info!("Transfer {id} completed ({} bytes)", task.bytes_transferred);
            }
            Some(message) => {
                task.status = TransferStatus::Failed;
                task.error = Some(message);
            }
        }
        task.ended_at = Some(Utc::now());
        entry.end_seq = seq;
        self.evict_terminal(&mut tasks);
    }

    /// Snapshot of one task.
    pub fn status(&self, id: &str) -> BridgeResult<TransferTask> {
        self.lock()
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| BridgeError::TransferNotFound(id.to_string()))
    }

    /// Tasks matching `filter`, newest first.
    pub fn list(&self, filter: TransferFilter) -> Vec<TransferTask> {
        let mut tasks: Vec<TransferTask> = self
            .lock()
            .values()
            .filter(|entry| filter.matches(entry.task.status))
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
    }

    /// Request cancellation of a pending or running task.
    pub fn cancel(&self, id: &str) -> BridgeResult<TransferTask> {
        let seq = self.end_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tasks = self.lock();
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| BridgeError::TransferNotFound(id.to_string()))?;

        if !entry.task.status.is_active() {
            return Err(BridgeError::InvalidState {
                id: id.to_string(),
                status: entry.task.status,
            });
        }

        entry.cancel.store(true, Ordering::Release);
        entry.task.status = TransferStatus::Cancelled;
        entry.task.ended_at = Some(Utc::now());
        entry.end_seq = seq;
        let snapshot = entry.task.clone();
        self.evict_terminal(&mut tasks);
        tracing::info!("Transfer {id} cancelled");
        Ok(snapshot)
    }

    /// Number of tasks currently pending or running.
    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| entry.task.status.is_active())
            .count()
    }

    fn evict_terminal(&self, tasks: &mut HashMap<String, TaskEntry>) {
        let mut ended: Vec<(chrono::DateTime<Utc>, u64, String)> = tasks
            .values()
            .filter(|entry| entry.task.status.is_terminal())
            .map(|entry| {
                (
                    entry.task.ended_at.unwrap_or(entry.task.started_at),
                    entry.end_seq,
                    entry.task.id.clone(),
                )
            })
            .collect();

        if ended.len() <= self.config.retention {
            return;
        }

        ended.sort();
        let excess = ended.len() - self.config.retention;
        for (_, _, id) in ended.into_iter().take(excess) {
            tasks.remove(&id);
        }
        tracing::debug!("Evicted {excess} finished transfers");
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFs;

    fn manager(root: &Path, config: TransferConfig) -> Arc<TransferManager> {
        Arc::new(TransferManager::new(Arc::new(LocalFs::new(root)), config))
    }

    fn upload(local: &Path, remote: &str, sync: bool) -> TransferRequest {
        TransferRequest {
            direction: TransferDirection::Upload,
            local_path: local.display().to_string(),
            remote_path: remote.to_string(),
            owner_session_id: Some("s1".to_string()),
            sync,
        }
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(10, 10), 100);
    }

    #[tokio::test]
    async fn test_sync_upload_completes() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("data.bin");
        std::fs::write(&src, vec![7u8; 200_000]).unwrap();

        let mgr = manager(remote.path(), TransferConfig::default());
        let task = mgr.start_transfer(upload(&src, "in/data.bin", true)).await.unwrap();

        assert_eq!(task.status, TransferStatus::Completed);
        assert_eq!(task.progress_percent, 100);
        assert_eq!(task.bytes_transferred, 200_000);
        assert_eq!(task.total_bytes, 200_000);
        assert!(task.ended_at.is_some());
        assert_eq!(task.owner_session_id.as_deref(), Some("s1"));
        let copied = std::fs::read(remote.path().join("in/data.bin")).unwrap();
        assert_eq!(copied.len(), 200_000);
    }

    #[tokio::test]
    async fn test_sync_download_completes() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("r.txt"), b"remote contents").unwrap();

        let mgr = manager(remote.path(), TransferConfig::default());
        let dest = local.path().join("sub/r.txt");
        let task = mgr
            .start_transfer(TransferRequest {
                direction: TransferDirection::Download,
                local_path: dest.display().to_string(),
                remote_path: "r.txt".to_string(),
                owner_session_id: None,
                sync: true,
            })
            .await
            .unwrap();

        assert_eq!(task.status, TransferStatus::Completed);
        assert_eq!(std::fs::read(&dest).unwrap(), b"remote contents");
    }

    #[tokio::test]
    async fn test_cap_rejects_without_creating_task() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("big.bin");
        std::fs::write(&src, vec![0u8; 2048]).unwrap();

        let config = TransferConfig {
            max_upload_bytes: 1024,
            ..TransferConfig::default()
        };
        let mgr = manager(remote.path(), config);
        let err = mgr.start_transfer(upload(&src, "big.bin", false)).await.unwrap_err();

        match err {
            BridgeError::FileTooLarge { size, limit, .. } => {
                assert_eq!(size, 2048);
                assert_eq!(limit, 1024);
            }
            other => panic!("expected FileTooLarge, got {other}"),
        }
        assert!(mgr.list(TransferFilter::All).is_empty());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let remote = tempfile::tempdir().unwrap();
        let mgr = manager(remote.path(), TransferConfig::default());
        let err = mgr
            .start_transfer(upload(Path::new("/definitely/not/here.bin"), "x", true))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_invalid_state() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        let mgr = manager(remote.path(), TransferConfig::default());
        let task = mgr.start_transfer(upload(&src, "a.txt", true)).await.unwrap();
        let err = mgr.cancel(&task.id).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidState { status: TransferStatus::Completed, .. }
        ));
        assert!(err.to_string().contains("completed"));
    }

    #[tokio::test]
    async fn test_status_unknown_id() {
        let remote = tempfile::tempdir().unwrap();
        let mgr = manager(remote.path(), TransferConfig::default());
        assert!(matches!(mgr.status("nope"), Err(BridgeError::TransferNotFound(_))));
        assert!(matches!(mgr.cancel("nope"), Err(BridgeError::TransferNotFound(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_before_start() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("a.bin");
        std::fs::write(&src, vec![1u8; 4096]).unwrap();

        let mgr = manager(remote.path(), TransferConfig::default());
        // On a current-thread runtime the spawned copy cannot run until we yield.
        let task = mgr.start_transfer(upload(&src, "a.bin", false)).await.unwrap();
        assert_eq!(task.status, TransferStatus::Pending);

        let cancelled = mgr.cancel(&task.id).unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert!(mgr.list(TransferFilter::Active).is_empty());

        tokio::task::yield_now().await;
        let after = mgr.status(&task.id).unwrap();
        assert_eq!(after.status, TransferStatus::Cancelled);
        assert_eq!(after.bytes_transferred, 0);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("a.txt");
        std::fs::write(&src, b"payload").unwrap();

        let config = TransferConfig {
            retention: 3,
            ..TransferConfig::default()
        };
        let mgr = manager(remote.path(), config);

        let mut ids = Vec::new();
        for i in 0..5 {
            let task = mgr
                .start_transfer(upload(&src, &format!("out/{i}.txt"), true))
                .await
                .unwrap();
            ids.push(task.id);
        }

        let remaining = mgr.list(TransferFilter::All);
        assert_eq!(remaining.len(), 3);
        for old in &ids[..2] {
            assert!(mgr.status(old).is_err(), "oldest tasks are evicted");
        }
        for recent in &ids[2..] {
            assert!(mgr.status(recent).is_ok());
        }
    }

    #[tokio::test]
    async fn test_progress_invariants_hold_across_snapshots() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("big.bin");
        std::fs::write(&src, vec![3u8; 4 * 1024 * 1024]).unwrap();

        let config = TransferConfig {
            chunk_size: 4096,
            ..TransferConfig::default()
        };
        let mgr = manager(remote.path(), config);
        let task = mgr.start_transfer(upload(&src, "big.bin", false)).await.unwrap();

        let mut last_percent = 0u8;
        loop {
            let snap = mgr.status(&task.id).unwrap();
            assert!(snap.bytes_transferred <= snap.total_bytes);
            if snap.status == TransferStatus::Running {
                assert_eq!(
                    snap.progress_percent,
                    percent(snap.bytes_transferred, snap.total_bytes)
                );
                assert!(snap.progress_percent >= last_percent);
                last_percent = snap.progress_percent;
            }
            if snap.status.is_terminal() {
                assert_eq!(snap.status, TransferStatus::Completed);
                assert_eq!(snap.progress_percent, 100);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_failed_open_leaves_existing_destination() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();
        std::fs::create_dir(remote.path().join("inbox")).unwrap();

        let mgr = manager(remote.path(), TransferConfig::default());
        let task = mgr.start_transfer(upload(&src, "inbox", true)).await.unwrap();

        assert_eq!(task.status, TransferStatus::Failed);
        assert!(task.error.is_some());
        assert!(remote.path().join("inbox").is_dir());
    }

    #[tokio::test]
    async fn test_sync_transfer_finishes_after_caller_is_dropped() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("big.bin");
        std::fs::write(&src, vec![5u8; 4 * 1024 * 1024]).unwrap();

        let config = TransferConfig {
            chunk_size: 64,
            ..TransferConfig::default()
        };
        let mgr = manager(remote.path(), config);
        let caller = mgr.start_transfer(upload(&src, "big.bin", true));
        let _ = tokio::time::timeout(std::time::Duration::from_millis(20), caller).await;

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(60);
        let task = loop {
            let tasks = mgr.list(TransferFilter::All);
            assert_eq!(tasks.len(), 1);
            if tasks[0].status.is_terminal() {
                break tasks[0].clone();
            }
            assert!(tokio::time::Instant::now() < deadline, "transfer never finished");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };

        assert_eq!(task.status, TransferStatus::Completed);
        assert_eq!(task.bytes_transferred, 4 * 1024 * 1024);
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_copy() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("big.bin");
        std::fs::write(&src, vec![9u8; 8 * 1024 * 1024]).unwrap();

        let config = TransferConfig {
            chunk_size: 1024,
            ..TransferConfig::default()
        };
        let mgr = manager(remote.path(), config);
        let task = mgr.start_transfer(upload(&src, "big.bin", false)).await.unwrap();

        loop {
            let snap = mgr.status(&task.id).unwrap();
            if snap.bytes_transferred > 0 || snap.status.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }

        if mgr.cancel(&task.id).is_ok() {
            let frozen = mgr.status(&task.id).unwrap().bytes_transferred;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let snap = mgr.status(&task.id).unwrap();
            assert_eq!(snap.status, TransferStatus::Cancelled);
            assert_eq!(snap.bytes_transferred, frozen, "no progress after cancel");
            assert!(snap.total_bytes > snap.bytes_transferred);
        }
    }
}
