use serde::{Deserialize, Serialize};

use crate::record::TableId;

/// Field identifier, unique within a base.
pub type FieldId = String;

/// Aggregation applied by a rollup field over linked records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupFunction {
    Sum,
    Average,
    Min,
    Max,
    CountAll,
    ArrayJoin,
}

/// Type-specific field configuration.
///
/// Computed kinds carry the references needed to extract their in-table
/// dependencies:
/// - formulas reference fields with `{field_id}` tokens in `expression`;
/// - lookups, rollups and counts read through `link_field_id`, a link field of
///   the same table. Their target field lives in the linked table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Checkbox,
    Date,
    Link {
        foreign_table_id: TableId,
    },
    Formula {
        expression: String,
    },
    Lookup {
        link_field_id: FieldId,
        lookup_field_id: FieldId,
    },
    Rollup {
        link_field_id: FieldId,
        rollup_field_id: FieldId,
        function: RollupFunction,
    },
    Count {
        link_field_id: FieldId,
    },
}

/// Field type tag without configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Checkbox,
    Date,
    Link,
    Formula,
    Lookup,
    Rollup,
    Count,
}

impl FieldType {
    /// Whether values of this type are derived from other fields.
    pub fn is_computed(self) -> bool {
        matches!(
            self,
            FieldType::Formula | FieldType::Lookup | FieldType::Rollup | FieldType::Count
        )
    }

    /// Static ordering used only as a deterministic tie-break when a cycle
    /// prevents a true topological order. Lower runs first.
    pub fn type_priority(self) -> u8 {
        match self {
            FieldType::Formula => 1,
            FieldType::Lookup => 2,
            FieldType::Rollup => 3,
            FieldType::Count => 4,
            _ => 5,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Checkbox => "checkbox",
            FieldType::Date => "date",
            FieldType::Link => "link",
            FieldType::Formula => "formula",
            FieldType::Lookup => "lookup",
            FieldType::Rollup => "rollup",
            FieldType::Count => "count",
        };
        write!(f, "{s}")
    }
}

/// A column definition of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub table_id: TableId,
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl Field {
    pub fn new(
        table_id: impl Into<TableId>,
        id: impl Into<FieldId>,
        name: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            id: id.into(),
            table_id: table_id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match &self.kind {
            FieldKind::Text => FieldType::Text,
            FieldKind::Number => FieldType::Number,
            FieldKind::Checkbox => FieldType::Checkbox,
            FieldKind::Date => FieldType::Date,
            FieldKind::Link { .. } => FieldType::Link,
            FieldKind::Formula { .. } => FieldType::Formula,
            FieldKind::Lookup { .. } => FieldType::Lookup,
            FieldKind::Rollup { .. } => FieldType::Rollup,
            FieldKind::Count { .. } => FieldType::Count,
        }
    }

    /// Formula expression, for formula fields.
    pub fn expression(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Formula { expression } => Some(expression),
            _ => None,
        }
    }

    /// The in-table link field a lookup/rollup/count reads through.
    pub fn link_field_id(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Lookup { link_field_id, .. }
            | FieldKind::Rollup { link_field_id, .. }
            | FieldKind::Count { link_field_id } => Some(link_field_id),
            _ => None,
        }
    }
}

/// Field ids referenced by `{field_id}` tokens in a formula expression,
/// in first-occurrence order without duplicates. Empty `{}` and unclosed
/// braces are ignored.
pub fn formula_references(expression: &str) -> Vec<FieldId> {
    let mut refs: Vec<FieldId> = Vec::new();
    let mut rest = expression;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        // `{a{b}` references `b`: restart from the innermost opening brace
        if let Some(inner) = after[..close].rfind('{') {
            rest = &after[inner..];
            continue;
        }
        let token = after[..close].trim();
        if !token.is_empty() && !refs.iter().any(|r| r == token) {
            refs.push(token.to_string());
        }
        rest = &after[close + 1..];
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_priority_ordering() {
        assert!(FieldType::Formula.type_priority() < FieldType::Lookup.type_priority());
        assert!(FieldType::Lookup.type_priority() < FieldType::Rollup.type_priority());
        assert!(FieldType::Rollup.type_priority() < FieldType::Count.type_priority());
        assert!(FieldType::Count.type_priority() < FieldType::Text.type_priority());
        assert_eq!(FieldType::Link.type_priority(), FieldType::Number.type_priority());
    }

    #[test]
    fn computed_types() {
        assert!(FieldType::Formula.is_computed());
        assert!(FieldType::Count.is_computed());
        assert!(!FieldType::Link.is_computed());
        assert!(!FieldType::Text.is_computed());
    }

    #[test]
    fn formula_references_in_order() {
        let refs = formula_references("{fPrice} * {fQty} + {fPrice}");
        assert_eq!(refs, vec!["fPrice".to_string(), "fQty".to_string()]);
    }

    #[test]
    fn formula_references_ignores_malformed() {
        assert!(formula_references("1 + 2").is_empty());
        assert!(formula_references("{} + {  }").is_empty());
        assert_eq!(formula_references("{ fA } + {fB"), vec!["fA".to_string()]);
        assert_eq!(formula_references("{x{fC}"), vec!["fC".to_string()]);
    }

    #[test]
    fn formula_references_with_multibyte_text_before_nested_brace() {
        assert_eq!(formula_references("{\u{3000}x{fB}"), vec!["fB".to_string()]);
        assert_eq!(
            formula_references("{ é {fA} + {\u{3000}fB\u{3000}}"),
            vec!["fA".to_string(), "fB".to_string()]
        );
    }

    #[test]
    fn field_kind_json_shape() {
        let json = r#"{"id":"f1","table_id":"t","name":"Total","type":"rollup",
            "link_field_id":"fLink","rollup_field_id":"fAmount","function":"sum"}"#;
        let field: Field = serde_json::from_str(json).unwrap();
        assert_eq!(field.field_type(), FieldType::Rollup);
        assert_eq!(field.link_field_id(), Some("fLink"));

        let text: Field =
            serde_json::from_str(r#"{"id":"f2","table_id":"t","name":"Name","type":"text"}"#)
                .unwrap();
        assert_eq!(text.field_type(), FieldType::Text);
        assert_eq!(text.link_field_id(), None);
    }

    #[test]
    fn accessors() {
        let formula = Field::new(
            "t",
            "f1",
            "Total",
            FieldKind::Formula {
                expression: "{a}+{b}".into(),
            },
        );
        assert_eq!(formula.expression(), Some("{a}+{b}"));
        assert_eq!(formula.link_field_id(), None);

        let count = Field::new(
            "t",
            "f2",
            "Orders",
            FieldKind::Count {
                link_field_id: "fLink".into(),
            },
        );
        assert_eq!(count.link_field_id(), Some("fLink"));
        assert_eq!(count.field_type().to_string(), "count");
    }
}
