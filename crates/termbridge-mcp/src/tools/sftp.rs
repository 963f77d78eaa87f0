//! Tools: sftp_* file browsing and background transfers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use termbridge::{
    TransferDirection, TransferFilter, TransferManager, TransferRequest, TransferStatus,
};

use crate::types::{McpError, McpResult};

use super::registry::{RegistryError, Tool, ToolContext, ToolRegistryBuilder};
use super::{parse_args, ToolDeps};

const CATEGORY: &str = "sftp";

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferParams {
    local_path: String,
    remote_path: String,
    #[serde(default, rename = "async")]
    run_async: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferIdParams {
    transfer_id: String,
}

#[derive(Debug, Deserialize)]
struct ListTransfersParams {
    #[serde(default)]
    filter: Option<String>,
}

pub fn register(builder: &mut ToolRegistryBuilder, deps: &ToolDeps) -> Result<(), RegistryError> {
    let transfers = deps.transfers.clone();
    builder.register(Tool::new(
        "sftp_list_directory",
        "List the entries of a remote directory",
        CATEGORY,
        json!({ "path": { "type": "string", "description": "Remote directory" } }),
        move |args, _| {
            let transfers = transfers.clone();
            async move { list_directory(transfers, args).await }
        },
    ))?;

    let transfers = deps.transfers.clone();
    builder.register(Tool::new(
        "sftp_stat",
        "Show size, type, and modification time of a remote path",
        CATEGORY,
        json!({ "path": { "type": "string", "description": "Remote path" } }),
        move |args, _| {
            let transfers = transfers.clone();
            async move { stat(transfers, args).await }
        },
    ))?;

    for (name, direction, description) in [
        (
            "sftp_upload",
            TransferDirection::Upload,
            "Upload a local file to the remote side. Set async=true to run it in the background",
        ),
        (
            "sftp_download",
            TransferDirection::Download,
            "Download a remote file to the local side. Set async=true to run it in the background",
        ),
    ] {
        let transfers = deps.transfers.clone();
        builder.register(Tool::new(
            name,
            description,
            CATEGORY,
            json!({
                "localPath": { "type": "string", "description": "Path on this machine" },
                "remotePath": { "type": "string", "description": "Path on the remote side" },
                "async": { "type": "boolean", "description": "Return immediately with a transferId", "optional": true }
            }),
            move |args, ctx| {
                let transfers = transfers.clone();
                async move { transfer(transfers, direction, args, ctx).await }
            },
        ))?;
    }

    let transfers = deps.transfers.clone();
    builder.register(Tool::new(
        "sftp_transfer_status",
        "Show progress of a transfer",
        CATEGORY,
        json!({ "transferId": { "type": "string" } }),
        move |args, _| {
            let transfers = transfers.clone();
            async move {
                let params: TransferIdParams = parse_args(args)?;
                let task = transfers.status(&params.transfer_id)?;
                Ok(json!({ "success": true, "transfer": task }))
            }
        },
    ))?;

    let transfers = deps.transfers.clone();
    builder.register(Tool::new(
        "sftp_list_transfers",
        "List transfers, newest first. filter: all, active, completed or failed",
        CATEGORY,
        json!({
            "filter": {
                "type": "string",
                "enum": ["all", "active", "completed", "failed"],
                "optional": true
            }
        }),
        move |args, _| {
            let transfers = transfers.clone();
            async move {
                let params: ListTransfersParams = parse_args(args)?;
                let filter = match params.filter.as_deref() {
                    None => TransferFilter::All,
                    Some(raw) => raw.parse::<TransferFilter>()?,
                };
                let tasks = transfers.list(filter);
                Ok(json!({
                    "success": true,
                    "count": tasks.len(),
                    "transfers": tasks,
                }))
            }
        },
    ))?;

    let transfers = deps.transfers.clone();
    builder.register(Tool::new(
        "sftp_cancel_transfer",
        "Cancel a pending or running transfer",
        CATEGORY,
        json!({ "transferId": { "type": "string" } }),
        move |args, _| {
            let transfers = transfers.clone();
            async move {
                let params: TransferIdParams = parse_args(args)?;
                let task = transfers.cancel(&params.transfer_id)?;
                Ok(json!({ "success": true, "transfer": task }))
            }
        },
    ))?;

    Ok(())
}

async fn list_directory(transfers: Arc<TransferManager>, args: Value) -> McpResult<Value> {
    let params: PathParams = parse_args(args)?;
    let entries = transfers.remote().read_dir(&params.path).await?;
    Ok(json!({
        "success": true,
        "path": params.path,
        "count": entries.len(),
        "entries": entries,
    }))
}

async fn stat(transfers: Arc<TransferManager>, args: Value) -> McpResult<Value> {
    let params: PathParams = parse_args(args)?;
    let stat = transfers.remote().stat(&params.path).await?;
    Ok(json!({ "success": true, "stat": stat }))
}

async fn transfer(
    transfers: Arc<TransferManager>,
    direction: TransferDirection,
    args: Value,
    ctx: ToolContext,
) -> McpResult<Value> {
    let params: TransferParams = parse_args(args)?;
    let sync = !params.run_async;
    let task = transfers
        .start_transfer(TransferRequest {
            direction,
            local_path: params.local_path,
            remote_path: params.remote_path,
            owner_session_id: ctx.session_id,
            sync,
        })
        .await?;

    if !sync {
        return Ok(json!({
            "success": true,
            "transferId": task.id,
            "status": task.status,
            "totalBytes": task.total_bytes,
        }));
    }

    match task.status {
        TransferStatus::Completed => Ok(json!({
            "success": true,
            "transferId": task.id,
            "bytesTransferred": task.bytes_transferred,
            "throughputBytesPerSec": task.throughput_bytes_per_sec,
        })),
        status => Err(McpError::Bridge(task.error.unwrap_or_else(|| {
            format!("Transfer {} ended as {status}", task.id)
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::ToolRegistry;
    use termbridge::{LocalFs, TransferConfig};

    fn registry(root: &std::path::Path) -> ToolRegistry {
        let remote = Arc::new(LocalFs::new(root));
        let deps = ToolDeps {
            transfers: Arc::new(TransferManager::new(remote, TransferConfig::default())),
            terminals: Arc::new(termbridge::TerminalRegistry::new()),
            profiles: Arc::new(termbridge::ProfileStore::new(Vec::new())),
        };
        let mut builder = ToolRegistry::builder();
        register(&mut builder, &deps).unwrap();
        builder.seal()
    }

    #[tokio::test]
    async fn test_sync_upload_then_stat() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let src = local.path().join("notes.txt");
        std::fs::write(&src, b"hello remote").unwrap();
        let registry = registry(remote.path());

        let outcome = registry
            .invoke(
                "sftp_upload",
                Some(json!({
                    "localPath": src.to_string_lossy(),
                    "remotePath": "inbox/notes.txt"
                })),
                ToolContext::default(),
            )
            .await
            .unwrap()
            .into_payload();
        assert_eq!(outcome["success"], true);
        assert_eq!(outcome["bytesTransferred"], 12);

        let stat = registry
            .invoke(
                "sftp_stat",
                Some(json!({"path": "inbox/notes.txt"})),
                ToolContext::default(),
            )
            .await
            .unwrap()
            .into_payload();
        assert_eq!(stat["stat"]["size"], 12);

        let listed = registry
            .invoke("sftp_list_transfers", Some(json!({"filter": "completed"})), ToolContext::default())
            .await
            .unwrap()
            .into_payload();
        assert_eq!(listed["count"], 1);
    }

    #[tokio::test]
    async fn test_failures_are_payloads() {
        let remote = tempfile::tempdir().unwrap();
        let registry = registry(remote.path());

        let missing = registry
            .invoke(
                "sftp_download",
                Some(json!({"localPath": "/tmp/never", "remotePath": "absent.bin"})),
                ToolContext::default(),
            )
            .await
            .unwrap()
            .into_payload();
        assert_eq!(missing["success"], false);
        assert!(missing["error"].as_str().unwrap().contains("absent.bin"));

        let unknown = registry
            .invoke(
                "sftp_cancel_transfer",
                Some(json!({"transferId": "nope"})),
                ToolContext::default(),
            )
            .await
            .unwrap()
            .into_payload();
        assert_eq!(unknown["success"], false);

        let bad_filter = registry
            .invoke("sftp_list_transfers", Some(json!({"filter": "stuck"})), ToolContext::default())
            .await
            .unwrap();
        assert!(!bad_filter.is_success());
    }
}
