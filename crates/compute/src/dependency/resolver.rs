use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use tabla_core::{FieldId, FieldStore};

use super::extract::extract_dependencies;
use super::graph::DependencyGraph;
use crate::error::CalcError;

/// Resolves calculation order for a table's computed fields.
#[derive(Clone)]
pub struct DependencyResolver {
    fields: Arc<dyn FieldStore>,
}

impl DependencyResolver {
    pub fn new(fields: Arc<dyn FieldStore>) -> Self {
        Self { fields }
    }

    /// Build the dependency graph for `field_ids` of `table_id`.
    ///
    /// A cycle does not fail resolution: the graph comes back with
    /// `is_valid == false`, the cycle edges in `cycles`, and a fallback
    /// `calculation_order`.
    pub async fn resolve_dependencies(
        &self,
        table_id: &str,
        field_ids: &[FieldId],
    ) -> Result<DependencyGraph, CalcError> {
        let fields = self
            .fields
            .fields_for_table(table_id)
            .await
            .map_err(|source| CalcError::Resolve {
                table_id: table_id.to_string(),
                source,
            })?;
        Ok(DependencyGraph::build(table_id, &fields, field_ids))
    }

    /// Every field transitively affected by a change to `changed_fields`,
    /// in breadth-first order with the changed fields themselves first.
    ///
    /// Walks reverse dependency edges over the whole table, not just a
    /// requested subset.
    pub async fn affected_fields(
        &self,
        table_id: &str,
        changed_fields: &[FieldId],
    ) -> Result<Vec<FieldId>, CalcError> {
        let fields = self
            .fields
            .fields_for_table(table_id)
            .await
            .map_err(|source| CalcError::Resolve {
                table_id: table_id.to_string(),
                source,
            })?;

        let mut dependents: HashMap<FieldId, Vec<FieldId>> = HashMap::new();
        for field in &fields {
            for dep in extract_dependencies(field) {
                dependents.entry(dep).or_default().push(field.id.clone());
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for id in changed_fields {
            if seen.insert(id.as_str()) {
                queue.push_back(id.as_str());
            }
        }

        let mut affected = Vec::new();
        while let Some(id) = queue.pop_front() {
            affected.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if seen.insert(dependent.as_str()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }

        debug!(
            table_id,
            changed = changed_fields.len(),
            affected = affected.len(),
            "affected fields resolved"
        );
        Ok(affected)
    }
}
