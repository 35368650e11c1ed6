//! Per-row mapping: scan a driver row into named columns, evaluate
//! the position-ordered formula pipeline, and apply the optional
//! `isFormatDate` post-pass.

use tokio_postgres::Row;

use crate::constants::DEFAULT_TICKET_DATE_FORMAT;
use crate::error::ServiceError;
use crate::query::operators;
use crate::query::payload::{NormalizedFormula, OutputRecord};
use crate::query::validator::is_expression_like;
use crate::query::value::DynValue;
use std::collections::HashMap;

/// Scans every column of `row` into driver-reported order plus a
/// `column_name -> value` map (see `DynValue::from_row`). The order is
/// returned separately so `map_row`'s `SELECT *` fallback doesn't need
/// to hold onto the live `Row` — that keeps `map_row` testable without
/// a real driver connection.
pub fn scan_row(
    row: &Row,
) -> Result<(Vec<String>, HashMap<String, DynValue>), tokio_postgres::Error> {
    let mut order = Vec::with_capacity(row.columns().len());
    let mut map = HashMap::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        order.push(column.name().to_string());
        map.insert(column.name().to_string(), DynValue::from_row(row, idx)?);
    }
    Ok((order, map))
}

/// When `formulas` is empty, passes every scanned column through
/// unchanged and in driver-reported order (`column_order`) — the
/// "empty formulas means `SELECT *`" fallback. Otherwise evaluates
/// each formula in position order, resolving each param either by its
/// extracted alias (for a SQL expression param) or its literal name,
/// and applies `formatDate` to any field named with a "date"-ish
/// prefix when `is_format_date` is set.
pub fn map_row(
    column_order: &[String],
    scanned: &HashMap<String, DynValue>,
    formulas: &[NormalizedFormula],
    is_format_date: bool,
) -> Result<OutputRecord, ServiceError> {
    if formulas.is_empty() {
        let mut record: OutputRecord = column_order
            .iter()
            .map(|name| {
                let value = scanned.get(name).cloned().unwrap_or(DynValue::Null);
                (name.clone(), value)
            })
            .collect();
        if is_format_date {
            apply_format_date(&mut record);
        }
        return Ok(record);
    }

    let mut record = OutputRecord::with_capacity(formulas.len());
    for formula in formulas {
        let mut params = Vec::with_capacity(formula.params.len());
        for param in &formula.params {
            let key = resolve_param_key(param);
            let value = scanned.get(key).cloned().ok_or_else(|| {
                ServiceError::internal_server_error("formula param not found in row")
                    .with_detail(format!("{} (field {})", param, formula.field))
            })?;
            params.push(value);
        }
        let output = operators::resolve(&formula.operator)(&params);
        record.push((formula.field.clone(), output));
    }

    if is_format_date {
        apply_format_date(&mut record);
    }
    Ok(record)
}

/// For an expression-like param (`"COALESCE(a, b) AS combined"`), the
/// row was selected under its alias, so the lookup key is the text
/// after ` AS `. Plain params are looked up by their literal name.
fn resolve_param_key(param: &str) -> &str {
    if !is_expression_like(param) {
        return param;
    }
    match param.to_uppercase().find(" AS ") {
        Some(idx) => param[idx + 4..].trim(),
        None => param,
    }
}

/// Reformats any output field whose name starts with `date` (case
/// insensitive) as an RFC3339-like string, carrying through whatever
/// offset the driver reported the timestamp in (always `+00:00` for
/// `tokio-postgres`, which normalizes to UTC), per the `isFormatDate`
/// flag.
fn apply_format_date(record: &mut OutputRecord) {
    for (field, value) in record.iter_mut() {
        if !field.to_lowercase().starts_with("date") {
            continue;
        }
        if let DynValue::Timestamp(ts) = value {
            *value = DynValue::Text(ts.format(DEFAULT_TICKET_DATE_FORMAT).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, Utc};

    fn scanned_row() -> (Vec<String>, HashMap<String, DynValue>) {
        let order = vec!["id".to_string(), "date_created".to_string()];
        let timestamp: DateTime<Utc> = DateTime::from_naive_utc_and_offset(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            Utc,
        );
        let map = HashMap::from([
            ("id".to_string(), DynValue::Int(42)),
            ("date_created".to_string(), DynValue::Timestamp(timestamp)),
        ]);
        (order, map)
    }

    #[test]
    fn resolve_param_key_extracts_alias() {
        assert_eq!(resolve_param_key("COALESCE(a, b) AS combined"), "combined");
        assert_eq!(resolve_param_key("plain_column"), "plain_column");
    }

    #[test]
    fn empty_formulas_falls_back_to_column_order() {
        let (order, scanned) = scanned_row();
        let record = map_row(&order, &scanned, &[], false).unwrap();
        assert_eq!(
            record,
            vec![
                ("id".to_string(), DynValue::Int(42)),
                (
                    "date_created".to_string(),
                    scanned["date_created"].clone()
                ),
            ]
        );
    }

    #[test]
    fn format_date_reformats_date_prefixed_timestamp_fields() {
        let (order, scanned) = scanned_row();
        let record = map_row(&order, &scanned, &[], true).unwrap();
        let (field, value) = &record[1];
        assert_eq!(field, "date_created");
        assert_eq!(value, &DynValue::Text("2024-01-01T00:00:00+00:00".to_string()));
    }

    #[test]
    fn formula_evaluation_resolves_params_and_applies_operator() {
        let (_, scanned) = scanned_row();
        let formulas = vec![NormalizedFormula {
            params: vec!["id".to_string()],
            field: "masked".to_string(),
            operator: "ticketIdMasking".to_string(),
            position: 1,
        }];
        let record = map_row(&[], &scanned, &formulas, false).unwrap();
        assert_eq!(
            record,
            vec![(
                "masked".to_string(),
                DynValue::Text("TICKET-0000000042".to_string())
            )]
        );
    }

    #[test]
    fn formula_param_expression_alias_is_resolved_by_alias_name() {
        let (_, scanned) = scanned_row();
        let formulas = vec![NormalizedFormula {
            params: vec!["COALESCE(id, 0) AS id".to_string()],
            field: "x".to_string(),
            operator: String::new(),
            position: 1,
        }];
        let record = map_row(&[], &scanned, &formulas, false).unwrap();
        assert_eq!(record, vec![("x".to_string(), DynValue::Int(42))]);
    }

    #[test]
    fn missing_formula_param_is_a_fatal_error() {
        let (_, scanned) = scanned_row();
        let formulas = vec![NormalizedFormula {
            params: vec!["missing_column".to_string()],
            field: "x".to_string(),
            operator: String::new(),
            position: 1,
        }];
        assert!(map_row(&[], &scanned, &formulas, false).is_err());
    }
}
