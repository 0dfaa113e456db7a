//! AWS SDK adapters.
//!
//! The only file that names SDK types. Everything above talks to the
//! [`ActivityCoordinator`] and [`MetricsSink`] traits, so the engine can be
//! exercised against in-memory fakes.

use async_trait::async_trait;
use aws_sdk_sfn::error::DisplayErrorContext;

use crate::coordinator::{ActivityCoordinator, CoordinatorError, HeartbeatError, WorkItem};
use crate::metrics::{MetricsSink, METRIC_ACTIVITY_ACTIVE_PERCENT, METRIC_NAMESPACE};

/// Step Functions client behind the coordinator trait.
pub struct SfnCoordinator {
    client: aws_sdk_sfn::Client,
}

impl SfnCoordinator {
    pub fn new(client: aws_sdk_sfn::Client) -> Self {
        Self { client }
    }
}

fn sfn_tags(tags: &[(String, String)]) -> Vec<aws_sdk_sfn::types::Tag> {
    tags.iter()
        .map(|(key, value)| {
            aws_sdk_sfn::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
        })
        .collect()
}

#[async_trait]
impl ActivityCoordinator for SfnCoordinator {
    async fn create_activity(
        &self,
        name: &str,
        tags: &[(String, String)],
    ) -> Result<String, CoordinatorError> {
        let output = self
            .client
            .create_activity()
            .name(name)
            .set_tags(Some(sfn_tags(tags)))
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        Ok(output.activity_arn().to_string())
    }

    async fn tag_activity(
        &self,
        arn: &str,
        tags: &[(String, String)],
    ) -> Result<(), CoordinatorError> {
        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(sfn_tags(tags)))
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn get_activity_task(
        &self,
        arn: &str,
        worker_name: &str,
    ) -> Result<Option<WorkItem>, CoordinatorError> {
        let output = self
            .client
            .get_activity_task()
            .activity_arn(arn)
            .worker_name(worker_name)
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        match output.task_token() {
            Some(token) if !token.is_empty() => Ok(Some(WorkItem {
                token: token.to_string(),
                input: output.input().unwrap_or_default().to_string(),
            })),
            _ => Ok(None),
        }
    }

    async fn send_task_heartbeat(&self, token: &str) -> Result<(), HeartbeatError> {
        match self
            .client
            .send_task_heartbeat()
            .task_token(token)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                let service_error = e.into_service_error();
                // These responses prove the task is no longer ours.
                if service_error.is_invalid_token()
                    || service_error.is_task_does_not_exist()
                    || service_error.is_task_timed_out()
                {
                    Err(HeartbeatError::Fatal(message))
                } else {
                    Err(HeartbeatError::Transient(message))
                }
            }
        }
    }

    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), CoordinatorError> {
        self.client
            .send_task_success()
            .task_token(token)
            .output(output)
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), CoordinatorError> {
        self.client
            .send_task_failure()
            .task_token(token)
            .error(error)
            .cause(cause)
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

/// CloudWatch client behind the metrics-sink trait.
pub struct CloudWatchSink {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchSink {
    pub fn new(client: aws_sdk_cloudwatch::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSink for CloudWatchSink {
    async fn put_active_percent(
        &self,
        activity_arn: &str,
        percent: f64,
    ) -> Result<(), CoordinatorError> {
        let datum = aws_sdk_cloudwatch::types::MetricDatum::builder()
            .metric_name(METRIC_ACTIVITY_ACTIVE_PERCENT)
            .unit(aws_sdk_cloudwatch::types::StandardUnit::Percent)
            .value(percent)
            .dimensions(
                aws_sdk_cloudwatch::types::Dimension::builder()
                    .name("ActivityArn")
                    .value(activity_arn)
                    .build(),
            )
            .build();
        self.client
            .put_metric_data()
            .namespace(METRIC_NAMESPACE)
            .metric_data(datum)
            .send()
            .await
            .map_err(|e| CoordinatorError::Call(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
