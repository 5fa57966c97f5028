//! Settle-all fan-out for schema drops
//!
//! Every drop runs as its own task. All outcomes are collected, including
//! panics, and no failure cancels a sibling. The batch finishes only once
//! every drop has settled.

use crate::error::ProvisionError;
use crate::provisioner::SchemaProvisioner;
use crate::types::{RecordId, SchemaName};
use futures::future::join_all;
use std::sync::Arc;

/// A drop that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropFailure {
    /// Session row the schema belonged to
    pub record: RecordId,
    /// Schema left behind
    pub schema: SchemaName,
    /// Why the drop failed
    pub error: ProvisionError,
}

/// Outcome of a drop batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropReport {
    /// Schemas dropped (or already absent)
    pub dropped: Vec<SchemaName>,
    /// Drops that failed; these schemas may be orphaned
    pub failed: Vec<DropFailure>,
}

impl DropReport {
    /// Drops attempted
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.dropped.len() + self.failed.len()
    }

    /// Whether every drop succeeded
    #[inline]
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drop every target concurrently and report each outcome
pub async fn drop_schemas(
    provisioner: Arc<dyn SchemaProvisioner>,
    targets: Vec<(RecordId, SchemaName)>,
) -> DropReport {
    let handles: Vec<_> = targets
        .iter()
        .map(|(_, schema)| {
            let provisioner = Arc::clone(&provisioner);
            let schema = schema.clone();
            tokio::spawn(async move { provisioner.drop_schema(&schema).await })
        })
        .collect();

    let outcomes = join_all(handles).await;

    let mut report = DropReport::default();
    for ((record, schema), outcome) in targets.into_iter().zip(outcomes) {
        let error = match outcome {
            Ok(Ok(())) => {
                report.dropped.push(schema);
                continue;
            }
            Ok(Err(error)) => error,
            Err(join_error) => ProvisionError::Aborted {
                schema: schema.to_string(),
                message: join_error.to_string(),
            },
        };
        tracing::warn!(
            record = %record,
            schema = %schema,
            error = %error,
            "schema drop failed; schema may be orphaned"
        );
        report.failed.push(DropFailure {
            record,
            schema,
            error,
        });
    }
    report
}
