//! ECS task metadata lookup for worker-name magic tokens.
//!
//! A worker name may contain `MAGIC_ECS_TASK_ARN` or `MAGIC_ECS_TASK_ID`;
//! both resolve through the task metadata document the container runtime
//! provides, either as a file (`ECS_CONTAINER_METADATA_FILE`) or an HTTP
//! endpoint (`ECS_CONTAINER_METADATA_URI`). Resolution happens once at
//! startup; an unresolvable token is fatal.

use serde::Deserialize;

use crate::error::{Result, WorkerError};

pub const MAGIC_ECS_TASK_ARN: &str = "MAGIC_ECS_TASK_ARN";
pub const MAGIC_ECS_TASK_ID: &str = "MAGIC_ECS_TASK_ID";

const METADATA_FILE_ENV: &str = "ECS_CONTAINER_METADATA_FILE";
const METADATA_URI_ENV: &str = "ECS_CONTAINER_METADATA_URI";

#[derive(Deserialize)]
struct TaskMetadata {
    #[serde(rename = "TaskARN")]
    task_arn: String,
}

/// Replace magic tokens in `worker_name`, consulting the metadata source
/// only when a token is actually present.
pub async fn expand_worker_name(worker_name: &str) -> Result<String> {
    if !worker_name.contains(MAGIC_ECS_TASK_ARN) && !worker_name.contains(MAGIC_ECS_TASK_ID) {
        return Ok(worker_name.to_string());
    }
    let arn = lookup_task_arn().await?;
    Ok(replace_tokens(worker_name, &arn))
}

fn replace_tokens(worker_name: &str, task_arn: &str) -> String {
    worker_name
        .replace(MAGIC_ECS_TASK_ARN, task_arn)
        .replace(MAGIC_ECS_TASK_ID, task_id_from_arn(task_arn))
}

/// The task ID is the final path segment of the task ARN, e.g.
/// `arn:aws:ecs:us-west-2:123:task/cluster/abc123` -> `abc123`.
fn task_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

async fn lookup_task_arn() -> Result<String> {
    if let Ok(path) = std::env::var(METADATA_FILE_ENV) {
        return arn_from_file(&path).await;
    }
    if let Ok(uri) = std::env::var(METADATA_URI_ENV) {
        return arn_from_endpoint(&uri).await;
    }
    Err(WorkerError::Metadata(format!(
        "worker name contains a magic token but neither {METADATA_FILE_ENV} nor {METADATA_URI_ENV} is set"
    )))
}

async fn arn_from_file(path: &str) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WorkerError::Metadata(format!("could not read {path}: {e}")))?;
    let metadata: TaskMetadata = serde_json::from_str(&contents)
        .map_err(|e| WorkerError::Metadata(format!("could not parse {path}: {e}")))?;
    Ok(metadata.task_arn)
}

async fn arn_from_endpoint(uri: &str) -> Result<String> {
    let url = format!("{uri}/task");
    let response = reqwest::get(&url)
        .await
        .map_err(|e| WorkerError::Metadata(format!("GET {url} failed: {e}")))?;
    let metadata: TaskMetadata = response
        .json()
        .await
        .map_err(|e| WorkerError::Metadata(format!("could not parse response from {url}: {e}")))?;
    Ok(metadata.task_arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:ecs:us-west-2:589690932525:task/cluster/af3f338a8d7b43c0";

    #[test]
    fn task_id_is_the_last_arn_segment() {
        assert_eq!(task_id_from_arn(ARN), "af3f338a8d7b43c0");
        assert_eq!(task_id_from_arn("no-slashes"), "no-slashes");
    }

    #[test]
    fn replaces_both_tokens() {
        assert_eq!(
            replace_tokens("worker-MAGIC_ECS_TASK_ID", ARN),
            "worker-af3f338a8d7b43c0"
        );
        assert_eq!(
            replace_tokens("MAGIC_ECS_TASK_ARN", ARN),
            ARN.to_string()
        );
        assert_eq!(replace_tokens("plain", ARN), "plain");
    }

    #[tokio::test]
    async fn reads_arn_from_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(
            &path,
            format!("{{\"Cluster\":\"cluster\",\"TaskARN\":\"{ARN}\"}}"),
        )
        .unwrap();
        let arn = arn_from_file(path.to_str().unwrap()).await.unwrap();
        assert_eq!(arn, ARN);
    }

    #[tokio::test]
    async fn missing_metadata_file_is_an_error() {
        let err = arn_from_file("/does/not/exist.json").await.unwrap_err();
        assert!(matches!(err, WorkerError::Metadata(_)));
    }
}
