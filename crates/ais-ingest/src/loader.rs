//! Warehouse loads for published objects
//!
//! One load per object keeps a per-object record of what reached the staging table.
//! Loads are append-only, so loading an object twice appends its rows twice.

use tracing::{info, instrument, warn};

use crate::config::WarehouseConfig;
use crate::error::PartialLoadFailure;
use crate::models::PublishedObject;
use crate::warehouse::{LoadRequest, TableRef, WarehouseRef};

pub struct Loader {
    warehouse: WarehouseRef,
    table: TableRef,
}

impl Loader {
    pub fn new(warehouse: WarehouseRef, config: &WarehouseConfig) -> Self {
        Self {
            warehouse,
            table: TableRef {
                project_id: config.project_id.clone(),
                dataset: config.dataset.clone(),
                table: config.table.clone(),
            },
        }
    }

    /// Load every object, then report the failures together.
    ///
    /// Returns the loaded objects when every load succeeded. Empty input is a no-op.
    #[instrument(skip(self, objects), fields(table = %self.table, objects = objects.len()))]
    pub async fn load_all(
        &self,
        objects: &[PublishedObject],
    ) -> Result<Vec<PublishedObject>, PartialLoadFailure> {
        if objects.is_empty() {
            info!("No published objects to load");
            return Ok(Vec::new());
        }

        let mut loaded = Vec::with_capacity(objects.len());
        let mut failed = Vec::new();

        for object in objects {
            let request = LoadRequest::append_csv(object.object_uri.clone(), self.table.clone());
            match self.warehouse.load(&request).await {
                Ok(receipt) => {
                    info!(
                        period_key = %object.period_key,
                        uri = %object.object_uri,
                        job_id = %receipt.job_id,
                        rows = ?receipt.output_rows,
                        "Loaded object"
                    );
                    loaded.push(object.clone());
                },
                Err(e) => {
                    warn!(
                        period_key = %object.period_key,
                        uri = %object.object_uri,
                        error = %e,
                        "Load failed"
                    );
                    failed.push((object.clone(), e));
                },
            }
        }

        if failed.is_empty() {
            Ok(loaded)
        } else {
            Err(PartialLoadFailure { loaded, failed })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::{LoadReceipt, Warehouse, WarehouseError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Fails any object whose URI contains "bad"; records every request.
    #[derive(Default)]
    struct ScriptedWarehouse {
        requests: Mutex<Vec<LoadRequest>>,
    }

    #[async_trait]
    impl Warehouse for ScriptedWarehouse {
        async fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, WarehouseError> {
            self.requests.lock().unwrap().push(request.clone());
            if request.source_uri.contains("bad") {
                return Err(WarehouseError::JobFailed {
                    job_id: "j".to_string(),
                    reason: "invalid".to_string(),
                });
            }
            Ok(LoadReceipt {
                job_id: "j".to_string(),
                output_rows: Some(1),
            })
        }
    }

    fn object(uri: &str) -> PublishedObject {
        PublishedObject {
            period_key: "2020-01".to_string(),
            object_uri: uri.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_input_is_noop() {
        let warehouse = Arc::new(ScriptedWarehouse::default());
        let loader = Loader::new(warehouse.clone(), &WarehouseConfig::default());

        assert!(loader.load_all(&[]).await.unwrap().is_empty());
        assert!(warehouse.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_collected_after_full_pass() {
        let warehouse = Arc::new(ScriptedWarehouse::default());
        let loader = Loader::new(warehouse.clone(), &WarehouseConfig::default());
        let objects = [object("gs://b/bad.csv"), object("gs://b/good.csv")];

        let failure = loader.load_all(&objects).await.unwrap_err();

        assert_eq!(warehouse.requests.lock().unwrap().len(), 2);
        assert_eq!(failure.loaded, vec![object("gs://b/good.csv")]);
        assert_eq!(failure.failed.len(), 1);
        assert_eq!(failure.failed[0].0.object_uri, "gs://b/bad.csv");
    }

    #[tokio::test]
    async fn test_requests_target_configured_table() {
        let warehouse = Arc::new(ScriptedWarehouse::default());
        let loader = Loader::new(warehouse.clone(), &WarehouseConfig::default());

        loader.load_all(&[object("gs://b/a.csv")]).await.unwrap();

        let requests = warehouse.requests.lock().unwrap();
        assert_eq!(requests[0].table.to_string(), "your-gcp-project-id.ais_staging.stg_ais_raw");
        assert_eq!(requests[0].skip_leading_rows, 1);
    }
}
