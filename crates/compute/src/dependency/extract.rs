use tabla_core::{formula_references, Field, FieldId, FieldKind};

/// Fields of the same table that `field` reads.
///
/// Non-computed fields have no dependencies. Lookups, rollups and counts
/// depend only on their link field: the looked-up or aggregated field lives
/// in the linked table and is outside this table's ordering.
pub fn extract_dependencies(field: &Field) -> Vec<FieldId> {
    match &field.kind {
        FieldKind::Formula { expression } => extract_formula_dependencies(expression),
        FieldKind::Lookup { link_field_id, .. } => extract_lookup_dependencies(link_field_id),
        FieldKind::Rollup { link_field_id, .. } => extract_rollup_dependencies(link_field_id),
        FieldKind::Count { link_field_id } => extract_count_dependencies(link_field_id),
        FieldKind::Text
        | FieldKind::Number
        | FieldKind::Checkbox
        | FieldKind::Date
        | FieldKind::Link { .. } => Vec::new(),
    }
}

/// `{field_id}` references, first occurrence order.
pub fn extract_formula_dependencies(expression: &str) -> Vec<FieldId> {
    formula_references(expression)
}

pub fn extract_lookup_dependencies(link_field_id: &str) -> Vec<FieldId> {
    link_dependency(link_field_id)
}

pub fn extract_rollup_dependencies(link_field_id: &str) -> Vec<FieldId> {
    link_dependency(link_field_id)
}

pub fn extract_count_dependencies(link_field_id: &str) -> Vec<FieldId> {
    link_dependency(link_field_id)
}

fn link_dependency(link_field_id: &str) -> Vec<FieldId> {
    if link_field_id.is_empty() {
        Vec::new()
    } else {
        vec![link_field_id.to_string()]
    }
}
