//! End-to-end checks across the validator, builder, payload
//! normalization, and operator registry — the parts of the pipeline
//! that don't require a live Postgres connection. Formula evaluation
//! and the `SELECT *` fallback over scanned rows are covered by
//! `query::row_mapper`'s own unit tests, which build their inputs by
//! hand; only `scan_row` itself (the part that actually reads a
//! `tokio_postgres::Row`) needs a live driver connection and so isn't
//! exercised here.

use serde_json::json;
use ticket_stream_service::query::payload::{normalize_formulas, Formula, QueryPayload, WhereClause};
use ticket_stream_service::query::value::DynValue;
use ticket_stream_service::query::{builder, operators, validator};

fn payload_with(formulas: Vec<Formula>, where_clauses: Vec<WhereClause>) -> QueryPayload {
    QueryPayload {
        table_name: "tickets".to_string(),
        order_by: None,
        limit: Some(1),
        offset: 0,
        r#where: where_clauses,
        formulas,
        is_format_date: false,
        is_disable_count: false,
    }
}

/// Scenario 1 from the specification: a plain pass-through column
/// alongside a masked id, evaluated against a synthetic row.
#[test]
fn masking_and_passthrough_scenario() {
    let payload = payload_with(
        vec![
            Formula {
                params: vec!["id".to_string()],
                field: "plain_id".to_string(),
                operator: String::new(),
                position: 1,
            },
            Formula {
                params: vec!["id".to_string(), "created_at".to_string()],
                field: "masked_id".to_string(),
                operator: "ticketIdMasking".to_string(),
                position: 2,
            },
        ],
        vec![],
    );
    validator::validate(&payload).expect("payload should be valid");

    let normalized = normalize_formulas(&payload.formulas);
    match builder::select_columns(&normalized) {
        builder::SelectColumns::Explicit(cols) => {
            assert_eq!(cols, vec!["id".to_string(), "created_at".to_string()])
        }
        builder::SelectColumns::All => panic!("expected explicit column list"),
    }

    let row = std::collections::HashMap::from([
        ("id".to_string(), DynValue::Int(12345)),
        ("created_at".to_string(), DynValue::Text("2024-01-01T00:00:00Z".to_string())),
    ]);

    let plain_id = operators::resolve("")(&[row["id"].clone()]);
    let masked_id = operators::resolve("ticketIdMasking")(&[row["id"].clone(), row["created_at"].clone()]);

    assert_eq!(plain_id, DynValue::Int(12345));
    assert_eq!(masked_id, DynValue::Text("TICKET-0000012345".to_string()));
}

/// Scenario 2: `difftime` between two unix-second timestamps.
#[test]
fn difftime_scenario() {
    let result = operators::resolve("difftime")(&[DynValue::Int(1609462800), DynValue::Int(1609459200)]);
    assert_eq!(result, DynValue::Text("01:00:00".to_string()));
}

/// Scenario 3: empty formulas fall back to a `SELECT *`.
#[test]
fn empty_formulas_select_star_scenario() {
    let payload = payload_with(vec![], vec![]);
    let normalized = normalize_formulas(&payload.formulas);
    match builder::select_columns(&normalized) {
        builder::SelectColumns::All => {}
        builder::SelectColumns::Explicit(_) => panic!("expected SELECT *"),
    }
    let built = builder::build_select(&payload, &builder::SelectColumns::All);
    assert!(built.sql.starts_with("SELECT * FROM `tickets`"));
}

/// Scenario 4: an unlisted table is rejected before any SQL is built.
#[test]
fn validation_rejection_scenario() {
    let mut payload = payload_with(vec![], vec![]);
    payload.table_name = "users".to_string();
    let err = validator::validate(&payload).expect_err("users table is not allow-listed");
    assert!(err.to_string().contains("tableName"));
}

/// Scenario 5: an `IN` predicate binds every value positionally and
/// the same clause set drives the COUNT query too.
#[test]
fn in_predicate_scenario() {
    let payload = payload_with(
        vec![],
        vec![WhereClause {
            field: "status".to_string(),
            operator: "IN".to_string(),
            value: json!(["open", "pending"]),
        }],
    );
    validator::validate(&payload).unwrap();

    let select = builder::build_select(&payload, &builder::SelectColumns::All);
    assert!(select.sql.contains("WHERE `status` IN ($1, $2)"));
    assert_eq!(
        select.args,
        vec![
            DynValue::Text("open".to_string()),
            DynValue::Text("pending".to_string())
        ]
    );

    let count = builder::build_count(&payload);
    assert_eq!(count.sql, "SELECT COUNT(*) FROM `tickets` WHERE `status` IN ($1, $2)");
}

/// Formula normalization is required to be deterministic: two
/// payloads differing only in formula input order, once positions are
/// normalized and deduplicated, must produce the same SELECT column
/// list given the same underlying position values.
#[test]
fn formula_normalization_is_order_independent_for_ties() {
    let forwards = vec![
        Formula { params: vec!["a".to_string()], field: "f1".to_string(), operator: String::new(), position: 1 },
        Formula { params: vec!["b".to_string()], field: "f2".to_string(), operator: String::new(), position: 2 },
    ];
    let backwards = vec![
        Formula { params: vec!["b".to_string()], field: "f2".to_string(), operator: String::new(), position: 2 },
        Formula { params: vec!["a".to_string()], field: "f1".to_string(), operator: String::new(), position: 1 },
    ];

    let normalized_forwards = normalize_formulas(&forwards);
    let normalized_backwards = normalize_formulas(&backwards);

    let cols_forwards = match builder::select_columns(&normalized_forwards) {
        builder::SelectColumns::Explicit(c) => c,
        builder::SelectColumns::All => panic!("expected explicit columns"),
    };
    let cols_backwards = match builder::select_columns(&normalized_backwards) {
        builder::SelectColumns::Explicit(c) => c,
        builder::SelectColumns::All => panic!("expected explicit columns"),
    };

    assert_eq!(cols_forwards, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(cols_backwards, vec!["a".to_string(), "b".to_string()]);
}
