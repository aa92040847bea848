//! Op dispatcher
//!
//! Turns one decoded [`ChangeEvent`] into at most one sink call against the
//! matching [`Definition`]. Sink failures come back as
//! [`CdcError::Write`], which the orchestration loop treats as fatal.

use crate::common::{
    lookup_path, CdcError, ChangeEvent, Definition, DefinitionSet, OpKind, RelationalSink, Result,
    Row, WriteOp,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Why an event produced no sink call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No definition tracks the event's namespace
    UntrackedNamespace,
    /// An update touched no defined field
    NoChanges,
    /// Log-internal marker
    Noop,
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Inserted,
    Updated { columns: usize },
    Deleted,
    Skipped(SkipReason),
}

impl DispatchOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

/// Routes change events to sink writes.
#[derive(Clone)]
pub struct OpDispatcher {
    sink: Arc<dyn RelationalSink>,
}

impl OpDispatcher {
    pub fn new(sink: Arc<dyn RelationalSink>) -> Self {
        Self { sink }
    }

    /// Dispatch one event against the current generation's definitions.
    pub async fn dispatch(
        &self,
        definitions: &DefinitionSet,
        event: &ChangeEvent,
    ) -> Result<DispatchOutcome> {
        if event.op == OpKind::Noop {
            return Ok(DispatchOutcome::Skipped(SkipReason::Noop));
        }

        let Some(definition) = definitions.get(&event.namespace) else {
            trace!(namespace = %event.namespace, "No definition, dropping event");
            return Ok(DispatchOutcome::Skipped(SkipReason::UntrackedNamespace));
        };

        match event.op {
            OpKind::Insert => {
                debug!(namespace = %definition.namespace, "Insert a new record");
                self.insert(definition, &event.document).await?;
                Ok(DispatchOutcome::Inserted)
            }
            OpKind::Update => {
                let id = Self::identifier(definition, event, WriteOp::Update)?;
                let changes = update_row(definition, event.set.as_ref(), event.unset.as_ref());
                if changes.is_empty() {
                    return Ok(DispatchOutcome::Skipped(SkipReason::NoChanges));
                }
                debug!(
                    namespace = %definition.namespace,
                    id = %id,
                    columns = changes.len(),
                    "Update a record"
                );
                let id = definition.convert_id(id);
                self.sink
                    .update(definition, &id, &changes)
                    .await
                    .map_err(|e| rejected(WriteOp::Update, definition, e))?;
                Ok(DispatchOutcome::Updated {
                    columns: changes.len(),
                })
            }
            OpKind::Delete => {
                let id = Self::identifier(definition, event, WriteOp::Delete)?;
                debug!(namespace = %definition.namespace, id = %id, "Delete a record");
                let id = definition.convert_id(id);
                self.sink
                    .delete(definition, &id)
                    .await
                    .map_err(|e| rejected(WriteOp::Delete, definition, e))?;
                Ok(DispatchOutcome::Deleted)
            }
            OpKind::Noop => Ok(DispatchOutcome::Skipped(SkipReason::Noop)),
        }
    }

    /// Write every defined field of a full document.
    pub async fn insert(&self, definition: &Definition, document: &Value) -> Result<()> {
        let row = insert_row(definition, document);
        self.sink
            .insert(definition, &row)
            .await
            .map_err(|e| rejected(WriteOp::Insert, definition, e))
    }

    fn identifier<'a>(
        definition: &Definition,
        event: &'a ChangeEvent,
        op: WriteOp,
    ) -> Result<&'a Value> {
        event
            .identifier(&definition.id_source_field)
            .ok_or_else(|| {
                CdcError::write(
                    op,
                    definition.name.clone(),
                    format!("entry carries no '{}'", definition.id_source_field),
                )
            })
    }
}

impl std::fmt::Debug for OpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpDispatcher").finish_non_exhaustive()
    }
}

fn rejected(op: WriteOp, definition: &Definition, err: CdcError) -> CdcError {
    match err {
        err @ CdcError::Write { .. } => err,
        other => CdcError::write(op, definition.name.clone(), other.to_string()),
    }
}

/// Row holding every defined field of `document`.
pub fn insert_row(definition: &Definition, document: &Value) -> Row {
    definition
        .fields
        .iter()
        .map(|field| (field.target_name.clone(), field.extract(document)))
        .collect()
}

/// Row holding the defined fields an update touches.
///
/// A field present in `set` takes its new value; a field only present in
/// `unset` becomes NULL. Fields in neither are left out.
pub fn update_row(definition: &Definition, set: Option<&Value>, unset: Option<&Value>) -> Row {
    definition
        .fields
        .iter()
        .filter_map(|field| {
            if let Some(value) = set.and_then(|s| lookup_path(s, &field.source_name)) {
                Some((field.target_name.clone(), field.conversion.convert(Some(value))))
            } else if unset.is_some_and(|u| lookup_path(u, &field.source_name).is_some()) {
                Some((field.target_name.clone(), field.conversion.convert(None)))
            } else {
                None
            }
        })
        .collect()
}
