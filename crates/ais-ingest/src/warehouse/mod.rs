//! Warehouse staging table
//!
//! The loader hands each published object to a [`Warehouse`] as a [`LoadRequest`]:
//! append-only, create-if-needed, CSV with one header row, all fields nullable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod bigquery;

pub use bigquery::BigQueryWarehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Timestamp,
    Integer,
    Float,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Nullable,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

const fn nullable(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        mode: FieldMode::Nullable,
    }
}

/// Column layout of the raw AIS staging table, in file order.
pub const AIS_STAGING_SCHEMA: &[FieldSpec] = &[
    nullable("timestamp", FieldType::Timestamp),
    nullable("mmsi", FieldType::Integer),
    nullable("latitude", FieldType::Float),
    nullable("longitude", FieldType::Float),
    nullable("sog", FieldType::Float),
    nullable("cog", FieldType::Float),
    nullable("heading", FieldType::Integer),
    nullable("vessel_name", FieldType::String),
    nullable("imo", FieldType::String),
    nullable("call_sign", FieldType::String),
    nullable("vessel_type", FieldType::Integer),
    nullable("status", FieldType::Integer),
    nullable("length", FieldType::Float),
    nullable("width", FieldType::Float),
    nullable("draft", FieldType::Float),
    nullable("cargo", FieldType::Integer),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteAppend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    CreateIfNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceFormat {
    Csv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset, self.table)
    }
}

/// One object to append to the staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub source_uri: String,
    pub table: TableRef,
    pub schema: &'static [FieldSpec],
    pub source_format: SourceFormat,
    pub skip_leading_rows: u32,
    pub write_disposition: WriteDisposition,
    pub create_disposition: CreateDisposition,
}

impl LoadRequest {
    /// Append a headered CSV object to `table` using the AIS staging schema.
    pub fn append_csv(source_uri: impl Into<String>, table: TableRef) -> Self {
        Self {
            source_uri: source_uri.into(),
            table,
            schema: AIS_STAGING_SCHEMA,
            source_format: SourceFormat::Csv,
            skip_leading_rows: 1,
            write_disposition: WriteDisposition::WriteAppend,
            create_disposition: CreateDisposition::CreateIfNeeded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReceipt {
    pub job_id: String,
    pub output_rows: Option<u64>,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Warehouse request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Warehouse returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Load job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Load job {job_id} still running after {polls} polls")]
    Timeout { job_id: String, polls: u32 },

    #[error("Unexpected warehouse response: {0}")]
    InvalidResponse(String),
}

/// Append-only load interface to the staging table.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, WarehouseError>;
}

pub type WarehouseRef = Arc<dyn Warehouse>;
