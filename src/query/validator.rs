//! Request validation.
//!
//! Runs entirely before any SQL text is assembled. A payload that
//! fails here never reaches the builder, so the builder itself can
//! trust that every identifier it touches is already safe.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{
    ALLOWED_ORDER_DIRECTIONS, ALLOWED_SQL_FUNCTIONS, ALLOWED_TABLES, ALLOWED_WHERE_OPERATORS,
    ARITHMETIC_OPERATOR_CHARS, RESERVED_IDENTIFIER_WORDS,
};
use crate::error::ServiceError;
use crate::query::operators;
use crate::query::payload::QueryPayload;

/// A plain identifier: letters, digits, underscore, optionally
/// dotted (`table.column`), not starting with a digit.
static PLAIN_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// Tokens that indicate SQL was smuggled into what should be a plain
/// identifier or parameter name.
const DANGEROUS_SUBSTRINGS: &[&str] = &[";", "--", "/*", "*/", "'", "\""];

pub fn validate(payload: &QueryPayload) -> Result<(), ServiceError> {
    validate_table_name(&payload.table_name)?;

    for clause in &payload.r#where {
        validate_identifier_safe(&clause.field, "where[].field")?;
        validate_where_operator(&clause.operator)?;
    }

    if let Some(order_by) = &payload.order_by {
        for token in order_by {
            validate_order_by_token(token)?;
        }
    }

    if let Some(limit) = payload.limit {
        if limit < 1 {
            return Err(ServiceError::bad_request("limit must be at least 1"));
        }
    }
    if payload.offset < 0 {
        return Err(ServiceError::bad_request("offset must not be negative"));
    }

    validate_formulas(payload)?;

    Ok(())
}

fn validate_table_name(table_name: &str) -> Result<(), ServiceError> {
    if !ALLOWED_TABLES.contains(table_name) {
        return Err(ServiceError::bad_request("tableName is not allowed")
            .with_detail(table_name.to_string()));
    }
    Ok(())
}

fn validate_where_operator(operator: &str) -> Result<(), ServiceError> {
    if !ALLOWED_WHERE_OPERATORS.contains(operator.to_uppercase().as_str()) {
        return Err(ServiceError::bad_request("unsupported where operator")
            .with_detail(operator.to_string()));
    }
    Ok(())
}

fn validate_order_by_token(token: &str) -> Result<(), ServiceError> {
    let mut parts = token.split_whitespace();
    let field = parts
        .next()
        .ok_or_else(|| ServiceError::bad_request("orderBy entry is empty"))?;
    validate_identifier_safe(field, "orderBy")?;

    if let Some(direction) = parts.next() {
        if !ALLOWED_ORDER_DIRECTIONS.contains(direction.to_uppercase().as_str()) {
            return Err(ServiceError::bad_request("unsupported orderBy direction")
                .with_detail(direction.to_string()));
        }
    }
    if parts.next().is_some() {
        return Err(ServiceError::bad_request("malformed orderBy entry")
            .with_detail(token.to_string()));
    }
    Ok(())
}

fn validate_formulas(payload: &QueryPayload) -> Result<(), ServiceError> {
    let mut seen_fields = std::collections::HashSet::new();
    for formula in &payload.formulas {
        if formula.field.is_empty() {
            return Err(ServiceError::bad_request("formula field must not be empty"));
        }
        if formula.params.is_empty() {
            return Err(ServiceError::bad_request("formula params must not be empty")
                .with_detail(formula.field.clone()));
        }
        if formula.position < 0 {
            return Err(ServiceError::bad_request("formula position must not be negative")
                .with_detail(formula.field.clone()));
        }
        if !operators::REGISTRY.contains_key(formula.operator.as_str()) {
            return Err(ServiceError::bad_request("formula operator is not in the registry")
                .with_detail(formula.operator.clone()));
        }

        if !seen_fields.insert(formula.field.as_str()) {
            return Err(ServiceError::bad_request("duplicate formula field name")
                .with_detail(formula.field.clone()));
        }

        for param in &formula.params {
            if is_expression_like(param) {
                validate_expression_safe(param)?;
            } else {
                validate_identifier_safe(param, "formula.params")?;
            }
        }
    }
    Ok(())
}

/// A param counts as "expression-like" (and so is allowed to contain
/// SQL syntax the plain-identifier check would reject) if it contains
/// an `AS` alias, calls one of the allow-listed SQL functions, or uses
/// an arithmetic operator.
pub fn is_expression_like(param: &str) -> bool {
    let upper = param.to_uppercase();
    if upper.contains(" AS ") {
        return true;
    }
    if ALLOWED_SQL_FUNCTIONS
        .iter()
        .any(|f| contains_function_call(&upper, f))
    {
        return true;
    }
    param.contains(ARITHMETIC_OPERATOR_CHARS)
}

fn contains_function_call(upper_haystack: &str, function: &str) -> bool {
    let needle = format!("{function}(");
    upper_haystack.contains(&needle)
}

/// Plain identifiers must match the conservative column/table pattern,
/// must not reference a stored procedure, and must not contain a
/// standalone reserved word. Applied uniformly to `where[].field`,
/// `orderBy` columns, and plain (non-expression) formula params.
fn validate_identifier_safe(identifier: &str, field_name: &str) -> Result<(), ServiceError> {
    if !PLAIN_IDENTIFIER.is_match(identifier) {
        return Err(ServiceError::bad_request(format!("invalid identifier in {field_name}"))
            .with_detail(identifier.to_string()));
    }
    reject_stored_procedure_reference(identifier, field_name)?;
    reject_reserved_word(identifier, field_name)
}

/// Expression-like params still must not contain a statement
/// terminator, a comment marker, a quote, or `xp_`/`sp_`-prefixed
/// procedure names.
fn validate_expression_safe(expression: &str) -> Result<(), ServiceError> {
    for token in DANGEROUS_SUBSTRINGS {
        if expression.contains(token) {
            return Err(
                ServiceError::bad_request("formula param contains unsafe SQL")
                    .with_detail(expression.to_string()),
            );
        }
    }
    reject_stored_procedure_reference(expression, "formula.params")?;
    reject_reserved_word(expression, "formula.params")
}

/// Rejects any identifier or expression containing an `xp_`/`sp_`
/// stored-procedure reference, the same check applied whether the
/// text is a plain identifier or a SQL expression.
fn reject_stored_procedure_reference(text: &str, field_name: &str) -> Result<(), ServiceError> {
    let lower = text.to_lowercase();
    if lower.contains("xp_") || lower.contains("sp_") {
        return Err(ServiceError::bad_request(format!(
            "{field_name} references a stored procedure"
        ))
        .with_detail(text.to_string()));
    }
    Ok(())
}

fn reject_reserved_word(text: &str, field_name: &str) -> Result<(), ServiceError> {
    let lower = text.to_lowercase();
    for token in lower.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if RESERVED_IDENTIFIER_WORDS.contains(token) {
            return Err(ServiceError::bad_request(format!(
                "reserved word is not allowed in {field_name}"
            ))
            .with_detail(text.to_string()));
        }
    }
    Ok(())
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
    fn rejects_unlisted_table() {
        let mut payload = base_payload();
        payload.table_name = "users".to_string();
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_unsafe_where_field() {
        let mut payload = base_payload();
        payload.r#where.push(WhereClause {
            field: "id; DROP TABLE tickets".to_string(),
            operator: "=".to_string(),
            value: serde_json::json!(1),
        });
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_duplicate_formula_field() {
        let mut payload = base_payload();
        payload.formulas.push(Formula {
            params: vec!["id".to_string()],
            field: "x".to_string(),
            operator: String::new(),
            position: 1,
        });
        payload.formulas.push(Formula {
            params: vec!["id".to_string()],
            field: "x".to_string(),
            operator: String::new(),
            position: 2,
        });
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn accepts_allowlisted_expression_param() {
        assert!(is_expression_like("COALESCE(a, b)"));
        assert!(validate_expression_safe("COALESCE(a, b) AS combined").is_ok());
    }

    #[test]
    fn rejects_stored_procedure_reference() {
        assert!(validate_expression_safe("xp_cmdshell('x')").is_err());
    }

    #[test]
    fn rejects_stored_procedure_prefixed_plain_identifier() {
        let mut payload = base_payload();
        payload.r#where.push(WhereClause {
            field: "xp_whatever".to_string(),
            operator: "=".to_string(),
            value: serde_json::json!(1),
        });
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_zero_limit() {
        let mut payload = base_payload();
        payload.limit = Some(0);
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_unregistered_formula_operator() {
        let mut payload = base_payload();
        payload.formulas.push(Formula {
            params: vec!["id".to_string()],
            field: "x".to_string(),
            operator: "notARealOperator".to_string(),
            position: 1,
        });
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_formula_with_empty_params() {
        let mut payload = base_payload();
        payload.formulas.push(Formula {
            params: vec![],
            field: "x".to_string(),
            operator: String::new(),
            position: 1,
        });
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_formula_with_negative_position() {
        let mut payload = base_payload();
        payload.formulas.push(Formula {
            params: vec!["id".to_string()],
            field: "x".to_string(),
            operator: String::new(),
            position: -1,
        });
        assert!(validate(&payload).is_err());
    }
}
