//! # Schema Reconciliation
//!
//! Compares the sink's physical table shapes against the shapes implied by
//! configuration and classifies every configured dataset as new, drifted or
//! unchanged.
//!
//! Matching is by dataset name (case-sensitive). Drift is a set comparison of
//! field names: column order and column type changes on a common field are
//! not detected.

use crate::common::{RelationalSink, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// One field of a dataset shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl FieldDescriptor {
    pub fn new(field: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            field_type: field_type.into(),
        }
    }
}

/// Ordered field list of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetShape {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl DatasetShape {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field_names(&self) -> HashSet<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }
}

/// Field-level difference between the desired and the physical shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeDrift {
    /// Desired fields missing from the sink
    pub added: Vec<FieldDescriptor>,
    /// Sink fields no longer desired
    pub removed: Vec<FieldDescriptor>,
}

impl ShapeDrift {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A desired dataset whose field set differs from the sink's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftedDataset {
    pub shape: DatasetShape,
    pub drift: ShapeDrift,
}

/// Classification of every desired dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub new: Vec<DatasetShape>,
    pub drifted: Vec<DriftedDataset>,
    pub unchanged: Vec<DatasetShape>,
}

impl Reconciliation {
    /// Datasets that need a table (re)build and a bulk load, in desired order
    /// within each group: new first, then drifted.
    pub fn needs_import(&self) -> Vec<&str> {
        self.new
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.drifted.iter().map(|d| d.shape.name.as_str()))
            .collect()
    }

    /// Datasets that can be tailed right away.
    pub fn tail_ready(&self) -> Vec<&str> {
        self.unchanged.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Field difference between a desired and a physical shape.
pub fn shape_drift(desired: &DatasetShape, physical: &DatasetShape) -> ShapeDrift {
    let physical_names = physical.field_names();
    let desired_names = desired.field_names();

    ShapeDrift {
        added: desired
            .fields
            .iter()
            .filter(|f| !physical_names.contains(f.field.as_str()))
            .cloned()
            .collect(),
        removed: physical
            .fields
            .iter()
            .filter(|f| !desired_names.contains(f.field.as_str()))
            .cloned()
            .collect(),
    }
}

/// Classify desired shapes against the physical ones.
///
/// Total over well-formed input: every desired dataset ends up in exactly one
/// of the three lists. Physical shapes with no desired counterpart are
/// ignored.
pub fn classify(physical: &[DatasetShape], desired: &[DatasetShape]) -> Reconciliation {
    let by_name: HashMap<&str, &DatasetShape> =
        physical.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut result = Reconciliation::default();
    for shape in desired {
        match by_name.get(shape.name.as_str()) {
            None => result.new.push(shape.clone()),
            Some(existing) => {
                let drift = shape_drift(shape, existing);
                if drift.is_empty() {
                    result.unchanged.push(shape.clone());
                } else {
                    debug!(
                        dataset = %shape.name,
                        added = ?drift.added.iter().map(|f| &f.field).collect::<Vec<_>>(),
                        removed = ?drift.removed.iter().map(|f| &f.field).collect::<Vec<_>>(),
                        "Dataset drifted"
                    );
                    result.drifted.push(DriftedDataset {
                        shape: shape.clone(),
                        drift,
                    });
                }
            }
        }
    }
    result
}

/// Introspect the sink and classify the desired shapes against it.
pub async fn reconcile(
    sink: &dyn RelationalSink,
    prefix: &str,
    desired: &[DatasetShape],
) -> Result<Reconciliation> {
    let physical = sink.shapes(prefix).await?;
    let result = classify(&physical, desired);

    info!(
        total = desired.len(),
        new = result.new.len(),
        drifted = result.drifted.len(),
        unchanged = result.unchanged.len(),
        "Schema reconciled"
    );

    Ok(result)
}
