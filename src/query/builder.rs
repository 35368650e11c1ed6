//! Parameterized SQL construction.
//!
//! Runs only after `validator::validate` has approved the payload, so
//! every identifier encountered here is already known safe. No value
//! from the payload is ever written into the SQL text itself — values
//! become positional `$N` parameters, identifiers are either
//! backtick-quoted plain names or emitted verbatim when they were
//! classified as a SQL expression.

use crate::query::payload::{NormalizedFormula, QueryPayload};
use crate::query::validator::is_expression_like;
use crate::query::value::DynValue;

/// A built statement: text with `$1, $2, ...` placeholders and the
/// positional arguments to bind.
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<DynValue>,
}

/// The columns a `SELECT` must fetch, derived from the formula
/// parameters. `None` means no formulas were supplied and the caller
/// should fetch every column (`SELECT *`).
pub enum SelectColumns {
    Explicit(Vec<String>),
    All,
}

/// Flattens the position-sorted formulas' params into the SELECT
/// list, first occurrence wins, preserving first-seen order. This is
/// the "unique-column extraction" step; callers must pass
/// `normalize_formulas`'s output so duplicate positions have already
/// been resolved.
pub fn select_columns(formulas: &[NormalizedFormula]) -> SelectColumns {
    if formulas.is_empty() {
        return SelectColumns::All;
    }
    let mut seen = std::collections::HashSet::new();
    let mut columns = Vec::new();
    for formula in formulas {
        for param in &formula.params {
            if seen.insert(param.clone()) {
                columns.push(param.clone());
            }
        }
    }
    SelectColumns::Explicit(columns)
}

/// Quotes a plain identifier in backticks; emits an expression-like
/// param verbatim (it has already passed `validator::validate_expression_safe`).
fn quote_identifier(name: &str) -> String {
    if is_expression_like(name) {
        name.to_string()
    } else {
        format!("`{name}`")
    }
}

/// Builds `SELECT COUNT(*) FROM <table> [WHERE ...]` with no ordering,
/// limit, or offset.
pub fn build_count(payload: &QueryPayload) -> BuiltQuery {
    let mut sql = format!("SELECT COUNT(*) FROM `{}`", payload.table_name);
    let mut args = Vec::new();
    append_where(&mut sql, &mut args, payload);
    BuiltQuery { sql, args }
}

/// Builds the full `SELECT` statement: column list (or `*`), table,
/// `WHERE`, `ORDER BY`, `LIMIT`, `OFFSET`, in that order.
pub fn build_select(payload: &QueryPayload, columns: &SelectColumns) -> BuiltQuery {
    let column_list = match columns {
        SelectColumns::All => "*".to_string(),
        SelectColumns::Explicit(cols) => cols
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut sql = format!("SELECT {column_list} FROM `{}`", payload.table_name);
    let mut args = Vec::new();
    append_where(&mut sql, &mut args, payload);
    append_order_by(&mut sql, payload);
    append_limit_offset(&mut sql, &mut args, payload);

    BuiltQuery { sql, args }
}

fn append_where(sql: &mut String, args: &mut Vec<DynValue>, payload: &QueryPayload) {
    if payload.r#where.is_empty() {
        return;
    }
    sql.push_str(" WHERE ");
    let clauses: Vec<String> = payload
        .r#where
        .iter()
        .map(|clause| {
            let values = clause.values();
            let operator = clause.operator.to_uppercase();
            let field = quote_identifier(&clause.field);

            if operator == "IN" || operator == "NOT IN" {
                let start = args.len() + 1;
                args.extend(values.iter().cloned());
                let marks = (start..start + values.len())
                    .map(|i| format!("${i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{field} {operator} ({marks})")
            } else {
                args.push(values.into_iter().next().unwrap_or(DynValue::Null));
                format!("{field} {operator} ${}", args.len())
            }
        })
        .collect();
    sql.push_str(&clauses.join(" AND "));
}

fn append_order_by(sql: &mut String, payload: &QueryPayload) {
    let Some(order_by) = &payload.order_by else {
        return;
    };
    if order_by.len() != 2 {
        return;
    }
    let field = quote_identifier(&order_by[0]);
    let direction = order_by[1].to_uppercase();
    sql.push_str(&format!(" ORDER BY {field} {direction}"));
}

fn append_limit_offset(sql: &mut String, args: &mut Vec<DynValue>, payload: &QueryPayload) {
    if let Some(limit) = payload.limit {
        if limit > 0 {
            args.push(DynValue::Int(limit));
            sql.push_str(&format!(" LIMIT ${}", args.len()));
        }
    }
    if payload.offset > 0 {
        args.push(DynValue::Int(payload.offset));
        sql.push_str(&format!(" OFFSET ${}", args.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::payload::{Formula, WhereClause};

    fn base_payload() -> QueryPayload {
        QueryPayload {
            table_name: "tickets".to_string(),
            order_by: None,
            limit: None,
            offset: 0,
            r#where: vec![],
            formulas: vec![],
            is_format_date: false,
            is_disable_count: false,
        }
    }

    #[test]
    fn select_all_when_no_formulas() {
        let payload = base_payload();
        let built = build_select(&payload, &SelectColumns::All);
        assert_eq!(built.sql, "SELECT * FROM `tickets`");
        assert!(built.args.is_empty());
    }

    #[test]
    fn in_predicate_binds_all_values_positionally() {
        let mut payload = base_payload();
        payload.r#where.push(WhereClause {
            field: "status".to_string(),
            operator: "IN".to_string(),
            value: serde_json::json!(["open", "pending"]),
        });
        let built = build_select(&payload, &SelectColumns::All);
        assert_eq!(
            built.sql,
            "SELECT * FROM `tickets` WHERE `status` IN ($1, $2)"
        );
        assert_eq!(built.args.len(), 2);
    }

    #[test]
    fn limit_and_offset_are_positional() {
        let mut payload = base_payload();
        payload.limit = Some(10);
        payload.offset = 5;
        let built = build_select(&payload, &SelectColumns::All);
        assert_eq!(built.sql, "SELECT * FROM `tickets` LIMIT $1 OFFSET $2");
        assert_eq!(built.args, vec![DynValue::Int(10), DynValue::Int(5)]);
    }

    #[test]
    fn determinism_identical_payload_produces_identical_sql() {
        let payload = base_payload();
        let first = build_select(&payload, &SelectColumns::All);
        let second = build_select(&payload, &SelectColumns::All);
        assert_eq!(first.sql, second.sql);
    }

    #[test]
    fn unique_column_extraction_flattens_formula_params_first_occurrence_wins() {
        let formulas = vec![
            NormalizedFormula {
                params: vec!["id".to_string(), "created_at".to_string()],
                field: "masked_id".to_string(),
                operator: "ticketIdMasking".to_string(),
                position: 1,
            },
            NormalizedFormula {
                params: vec!["id".to_string()],
                field: "plain_id".to_string(),
                operator: String::new(),
                position: 2,
            },
        ];
        match select_columns(&formulas) {
            SelectColumns::Explicit(cols) => {
                assert_eq!(cols, vec!["id".to_string(), "created_at".to_string()])
            }
            SelectColumns::All => panic!("expected explicit columns"),
        }
    }
}
