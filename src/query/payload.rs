//! Wire-level request shape: `QueryPayload`, `WhereClause`, `Formula`,
//! and the normalization step the query builder and row mapper both
//! depend on.

use serde::Deserialize;

use crate::query::value::DynValue;

/// One JSON value taken straight off the wire, before it has been
/// classified as scalar vs. sequence (`WhereClause::value`) or folded
/// into a `DynValue` (everything else).
pub type RawValue = serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub table_name: String,
    #[serde(default)]
    pub order_by: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub r#where: Vec<WhereClause>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub is_format_date: bool,
    #[serde(default)]
    pub is_disable_count: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub operator: String,
    pub value: RawValue,
}

impl WhereClause {
    /// `IN`/`NOT IN` clauses take an ordered sequence of values; every
    /// other operator takes a scalar. A non-array value paired with
    /// `IN`/`NOT IN` degrades to a single-element list per §4.2.
    pub fn values(&self) -> Vec<DynValue> {
        let is_set_operator = self.operator.eq_ignore_ascii_case("in")
            || self.operator.eq_ignore_ascii_case("not in");

        match &self.value {
            RawValue::Array(items) if is_set_operator => {
                items.iter().cloned().map(DynValue::from_json).collect()
            }
            other if is_set_operator => vec![DynValue::from_json(other.clone())],
            other => vec![DynValue::from_json(other.clone())],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Formula {
    pub params: Vec<String>,
    pub field: String,
    #[serde(default)]
    pub operator: String,
    pub position: i64,
}

/// A formula after position-normalization: stable sort by `position`,
/// then reassigned to 1..=N so duplicate input positions become
/// distinct, per §4.2's "Formula normalization" rule.
#[derive(Debug, Clone)]
pub struct NormalizedFormula {
    pub params: Vec<String>,
    pub field: String,
    pub operator: String,
    pub position: usize,
}

/// Stable-sorts `formulas` by `position` and reassigns positions to
/// 1..=N. Ties keep their original relative order (stable sort), which
/// is what makes the output deterministic for identical payloads.
pub fn normalize_formulas(formulas: &[Formula]) -> Vec<NormalizedFormula> {
    let mut indexed: Vec<&Formula> = formulas.iter().collect();
    indexed.sort_by_key(|f| f.position);

    indexed
        .into_iter()
        .enumerate()
        .map(|(i, f)| NormalizedFormula {
            params: f.params.clone(),
            field: f.field.clone(),
            operator: f.operator.clone(),
            position: i + 1,
        })
        .collect()
}

/// One `(field, value)` pair of the final serialized row, in output
/// order.
pub type OutputRecord = Vec<(String, DynValue)>;

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(field: &str, position: i64) -> Formula {
        Formula {
            params: vec!["id".to_string()],
            field: field.to_string(),
            operator: String::new(),
            position,
        }
    }

    #[test]
    fn normalize_reassigns_duplicate_positions() {
        let formulas = vec![formula("a", 1), formula("b", 1), formula("c", 1)];
        let normalized = normalize_formulas(&formulas);
        let positions: Vec<usize> = normalized.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let fields: std::collections::HashSet<_> =
            normalized.iter().map(|f| f.field.clone()).collect();
        let original_fields: std::collections::HashSet<_> =
            formulas.iter().map(|f| f.field.clone()).collect();
        assert_eq!(fields, original_fields);
    }

    #[test]
    fn normalize_preserves_order_for_ties() {
        let formulas = vec![formula("first", 5), formula("second", 5)];
        let normalized = normalize_formulas(&formulas);
        assert_eq!(normalized[0].field, "first");
        assert_eq!(normalized[1].field, "second");
    }

    #[test]
    fn in_clause_degrades_scalar_to_single_element_list() {
        let clause = WhereClause {
            field: "status".to_string(),
            operator: "IN".to_string(),
            value: serde_json::json!("open"),
        };
        assert_eq!(clause.values().len(), 1);
    }
}
