//! BigQuery load jobs over the REST API
//!
//! A load is `jobs.insert` with a `configuration.load` body followed by `jobs.get`
//! polls until the job reaches `DONE`. The bearer token is taken from configuration
//! as-is; obtaining and refreshing it is left to the environment.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    CreateDisposition, FieldSpec, LoadReceipt, LoadRequest, SourceFormat, Warehouse,
    WarehouseError, WriteDisposition,
};
use crate::config::WarehouseConfig;

const JOB_STATE_DONE: &str = "DONE";

pub struct BigQueryWarehouse {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
    location: Option<String>,
    poll_interval: Duration,
    max_polls: u32,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("ais-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            location: config.location.clone(),
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
        })
    }

    fn jobs_url(&self, project_id: &str) -> String {
        format!("{}/bigquery/v2/projects/{}/jobs", self.endpoint, project_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn insert_job(&self, project_id: &str, job: &JobInsert<'_>) -> Result<Job, WarehouseError> {
        let response = self
            .authorize(self.client.post(self.jobs_url(project_id)))
            .json(job)
            .send()
            .await?;
        decode_job(response).await
    }

    async fn get_job(&self, project_id: &str, job_id: &str) -> Result<Job, WarehouseError> {
        let mut request = self
            .authorize(self.client.get(format!("{}/{}", self.jobs_url(project_id), job_id)));
        if let Some(location) = &self.location {
            request = request.query(&[("location", location)]);
        }
        decode_job(request.send().await?).await
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    #[instrument(skip(self, request), fields(source_uri = %request.source_uri, table = %request.table))]
    async fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, WarehouseError> {
        let job_id = format!("ais_load_{}", Uuid::new_v4().simple());
        let project_id = request.table.project_id.as_str();
        let body = JobInsert::new(&job_id, self.location.as_deref(), request);

        let mut job = self.insert_job(project_id, &body).await?;
        debug!(job_id = %job_id, state = %job.state(), "Load job submitted");

        let mut polls = 0;
        while job.state() != JOB_STATE_DONE {
            if polls >= self.max_polls {
                warn!(job_id = %job_id, polls, "Load job did not finish in time");
                return Err(WarehouseError::Timeout { job_id, polls });
            }
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(project_id, &job_id).await?;
            polls += 1;
        }

        if let Some(error) = job.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Err(WarehouseError::JobFailed {
                job_id,
                reason: error.describe(),
            });
        }

        let output_rows = job
            .statistics
            .as_ref()
            .and_then(|s| s.load.as_ref())
            .and_then(|l| l.output_rows.as_deref())
            .and_then(|rows| rows.parse().ok());

        info!(job_id = %job_id, output_rows = ?output_rows, "Load job done");

        Ok(LoadReceipt { job_id, output_rows })
    }
}

async fn decode_job(response: reqwest::Response) -> Result<Job, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WarehouseError::Http {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Job>()
        .await
        .map_err(|e| WarehouseError::InvalidResponse(e.to_string()))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobInsert<'a> {
    job_reference: JobReference,
    configuration: JobConfiguration<'a>,
}

impl<'a> JobInsert<'a> {
    fn new(job_id: &str, location: Option<&str>, request: &'a LoadRequest) -> Self {
        Self {
            job_reference: JobReference {
                project_id: Some(request.table.project_id.clone()),
                job_id: job_id.to_string(),
                location: location.map(str::to_string),
            },
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    source_uris: vec![request.source_uri.as_str()],
                    destination_table: DestinationTable {
                        project_id: &request.table.project_id,
                        dataset_id: &request.table.dataset,
                        table_id: &request.table.table,
                    },
                    schema: TableSchema {
                        fields: request.schema,
                    },
                    source_format: request.source_format,
                    skip_leading_rows: request.skip_leading_rows,
                    write_disposition: request.write_disposition,
                    create_disposition: request.create_disposition,
                },
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    source_uris: Vec<&'a str>,
    destination_table: DestinationTable<'a>,
    schema: TableSchema<'a>,
    source_format: SourceFormat,
    skip_leading_rows: u32,
    write_disposition: WriteDisposition,
    create_disposition: CreateDisposition,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DestinationTable<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TableSchema<'a> {
    fields: &'a [FieldSpec],
}

#[derive(Debug, Deserialize)]
struct Job {
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
}

impl Job {
    fn state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .unwrap_or("PENDING")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: Option<String>,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    /// int64 values arrive as JSON strings
    output_rows: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::TableRef;

    #[test]
    fn test_job_insert_body() {
        let request = LoadRequest::append_csv(
            "gs://lake/raw/ais/2020-01/aisdk.csv",
            TableRef {
                project_id: "proj".to_string(),
                dataset: "ais_staging".to_string(),
                table: "stg_ais_raw".to_string(),
            },
        );
        let body = serde_json::to_value(JobInsert::new("job1", Some("EU"), &request)).unwrap();

        assert_eq!(body["jobReference"]["jobId"], "job1");
        assert_eq!(body["jobReference"]["location"], "EU");
        let load = &body["configuration"]["load"];
        assert_eq!(load["sourceUris"][0], "gs://lake/raw/ais/2020-01/aisdk.csv");
        assert_eq!(load["destinationTable"]["datasetId"], "ais_staging");
        assert_eq!(load["destinationTable"]["tableId"], "stg_ais_raw");
        assert_eq!(load["sourceFormat"], "CSV");
        assert_eq!(load["skipLeadingRows"], 1);
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(load["schema"]["fields"].as_array().unwrap().len(), 16);
        assert_eq!(load["schema"]["fields"][0]["type"], "TIMESTAMP");
    }

    #[test]
    fn test_job_state_defaults_to_pending() {
        let job: Job = serde_json::from_str("{}").unwrap();
        assert_eq!(job.state(), "PENDING");

        let done: Job = serde_json::from_str(
            r#"{"status":{"state":"DONE"},"statistics":{"load":{"outputRows":"42"}}}"#,
        )
        .unwrap();
        assert_eq!(done.state(), "DONE");
    }

    #[test]
    fn test_error_description() {
        let error = ErrorProto {
            reason: Some("invalid".to_string()),
            message: Some("bad row".to_string()),
        };
        assert_eq!(error.describe(), "invalid: bad row");
    }
}
