//! The formula operator registry.
//!
//! Every operator is a pure function from ordered parameter values to
//! one output value; none may mutate its inputs. The registry is a
//! flat `HashMap` rather than the type-erased, `TypeId`-downcasting
//! registry this crate's lineage uses elsewhere, because every
//! operator here is monomorphic over `DynValue` — there is no need to
//! recover a concrete output type at the call site.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::constants::{DEFAULT_ADDITIONAL_DATA_PREFIX, DEFAULT_FORMAT_DATE_LAYOUT};
use crate::query::crypto;
use crate::query::value::DynValue;

pub type OperatorFn = fn(&[DynValue]) -> DynValue;

pub static REGISTRY: Lazy<HashMap<&'static str, OperatorFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, OperatorFn> = HashMap::new();
    m.insert("", passthrough);
    m.insert("ticketIdMasking", ticket_id_masking);
    m.insert("difftime", difftime);
    m.insert("sentimentMapping", sentiment_mapping);
    m.insert("escalatedMapping", escalated_mapping);
    m.insert("formatTime", format_time);
    m.insert("stripHTML", strip_html);
    m.insert("decrypt", decrypt_op);
    m.insert("stripDecrypt", strip_decrypt);
    m.insert("contacts", contacts);
    m.insert("ticketDate", ticket_date);
    m.insert("additionalData", additional_data);
    m.insert("transactionState", transaction_state);
    m.insert("length", length);
    m.insert("processSurveyAnswer", process_survey_answer);
    m.insert("concat", concat);
    m.insert("upper", upper);
    m.insert("lower", lower);
    m.insert("formatDate", format_date);
    m
});

/// Looks up an operator by name. Unknown operators resolve to the
/// identity pass-through — the row mapper treats an unregistered
/// `operator` string the same as the empty string.
pub fn resolve(name: &str) -> OperatorFn {
    REGISTRY.get(name).copied().unwrap_or(passthrough)
}

fn passthrough(params: &[DynValue]) -> DynValue {
    params.first().cloned().unwrap_or(DynValue::Null)
}

/// `"TICKET-" + zero-padded-to-10(id)`. The optional second parameter
/// (a date) is accepted but never consulted — that is the documented
/// legacy behavior, not an oversight. A "date-based prefix" is hinted
/// at by the name but there is no path that reaches it; the prefix is
/// always the literal `TICKET`.
fn ticket_id_masking(params: &[DynValue]) -> DynValue {
    let id = match params.first().and_then(DynValue::to_int) {
        Some(id) if id != 0 => id,
        _ => return DynValue::Null,
    };
    DynValue::Text(format!("TICKET-{id:010}"))
}

/// Absolute difference of two positive unix-second timestamps,
/// formatted `HH:MM:SS` (hours may exceed 24).
fn difftime(params: &[DynValue]) -> DynValue {
    if params.len() != 2 {
        return DynValue::Text("00:00:00".to_string());
    }
    let (a, b) = match (params[0].to_int(), params[1].to_int()) {
        (Some(a), Some(b)) if a > 0 && b > 0 => (a, b),
        _ => return DynValue::Text("00:00:00".to_string()),
    };
    DynValue::Text(format_duration_hms((a - b).unsigned_abs()))
}

fn format_duration_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn sentiment_mapping(params: &[DynValue]) -> DynValue {
    match params.first().and_then(DynValue::to_int) {
        Some(-1) => DynValue::Text("Negative".to_string()),
        Some(0) => DynValue::Text("Neutral".to_string()),
        Some(1) => DynValue::Text("Positive".to_string()),
        _ => DynValue::Null,
    }
}

fn escalated_mapping(params: &[DynValue]) -> DynValue {
    match params.first().and_then(DynValue::to_int) {
        Some(1) => DynValue::Text("escalated".to_string()),
        Some(0) => DynValue::Text("not escalated".to_string()),
        _ => DynValue::Null,
    }
}

fn format_time(params: &[DynValue]) -> DynValue {
    match params.first() {
        None | Some(DynValue::Null) => DynValue::Null,
        Some(v) => match v.to_int() {
            Some(seconds) if seconds >= 0 => {
                DynValue::Text(format_duration_hms(seconds.unsigned_abs()))
            }
            _ => DynValue::Text("00:00:00".to_string()),
        },
    }
}

/// Single-pass removal of `<...>` spans. Non-string input is
/// stringified first.
fn strip_html(params: &[DynValue]) -> DynValue {
    match params.first() {
        None | Some(DynValue::Null) => DynValue::Null,
        Some(v) => {
            let input = v.to_display_string();
            if input.is_empty() {
                return DynValue::Text(String::new());
            }
            let mut out = String::with_capacity(input.len());
            let mut in_tag = false;
            for ch in input.chars() {
                match ch {
                    '<' => in_tag = true,
                    '>' => in_tag = false,
                    c if !in_tag => out.push(c),
                    _ => {}
                }
            }
            DynValue::Text(out)
        }
    }
}

fn decrypt_op(params: &[DynValue]) -> DynValue {
    match params.first().and_then(DynValue::to_string_opt) {
        None => DynValue::Null,
        Some(s) if s.is_empty() => DynValue::Null,
        Some(s) => DynValue::Text(crypto::decrypt(&s)),
    }
}

fn strip_decrypt(params: &[DynValue]) -> DynValue {
    let decrypted = decrypt_op(params);
    strip_html(&[decrypted])
}

/// Normalizes a contact list. Accepted shapes: a JSON array (as a
/// string or native), a JSON object string/value with a `contacts`
/// key, or a single object treated as a one-element list.
fn contacts(params: &[DynValue]) -> DynValue {
    let value = match params.first() {
        None | Some(DynValue::Null) => return DynValue::Json(JsonValue::Object(JsonMap::new())),
        Some(v) => v,
    };

    let parsed = coerce_to_json(value);
    let items: Vec<JsonValue> = match parsed {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("contacts") {
            Some(JsonValue::Array(items)) => items,
            _ => vec![JsonValue::Object(obj)],
        },
        other if other.is_null() => Vec::new(),
        other => vec![other],
    };

    if items.is_empty() {
        return DynValue::Json(JsonValue::Object(JsonMap::new()));
    }

    let normalized: Vec<JsonValue> = items
        .into_iter()
        .map(|item| {
            let mut obj = match item {
                JsonValue::Object(obj) => obj,
                other => {
                    let mut m = JsonMap::new();
                    m.insert("contact_value".to_string(), other);
                    m
                }
            };
            let decrypted = obj
                .get("contact_value")
                .and_then(JsonValue::as_str)
                .map(crypto::decrypt)
                .unwrap_or_default();
            obj.insert("contact_value".to_string(), JsonValue::String(decrypted));
            let contact_type = obj.get("contact_type").cloned().unwrap_or(JsonValue::Null);
            obj.insert("type".to_string(), contact_type);
            JsonValue::Object(obj)
        })
        .collect();

    DynValue::Json(JsonValue::Array(normalized))
}

/// Parses `v` as either a JSON string or a native JSON value; falls
/// back to wrapping scalars as-is.
fn coerce_to_json(value: &DynValue) -> JsonValue {
    match value {
        DynValue::Json(v) => v.clone(),
        DynValue::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone())),
        other => other.clone().into_json(),
    }
}

fn parse_flexible_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(DateTime::from_naive_utc_and_offset(
                    date.and_hms_opt(0, 0, 0)?,
                    Utc,
                ));
            }
            None
        }
        JsonValue::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp(secs, 0)
        }
        _ => None,
    }
}

/// Reformats each `date_create` field of a status-date object list.
/// Default output format is RFC3339; an optional second parameter
/// overrides with a `strftime`-style layout.
fn ticket_date(params: &[DynValue]) -> DynValue {
    let value = match params.first() {
        None | Some(DynValue::Null) => return DynValue::Null,
        Some(v) => v,
    };
    let layout = params.get(1).and_then(DynValue::as_str);

    let parsed = coerce_to_json(value);
    let items: Vec<JsonValue> = match parsed {
        JsonValue::Array(items) => items,
        other @ JsonValue::Object(_) => vec![other],
        _ => return DynValue::Json(JsonValue::Array(Vec::new())),
    };

    let reformatted: Vec<JsonValue> = items
        .into_iter()
        .map(|item| {
            let JsonValue::Object(mut obj) = item else {
                return item;
            };
            if let Some(raw) = obj.get("date_create").cloned() {
                if let Some(parsed) = parse_flexible_timestamp(&raw) {
                    let formatted = match layout {
                        Some(fmt) => parsed.format(fmt).to_string(),
                        None => parsed.to_rfc3339(),
                    };
                    obj.insert("date_create".to_string(), JsonValue::String(formatted));
                }
            }
            JsonValue::Object(obj)
        })
        .collect();

    DynValue::Json(JsonValue::Array(reformatted))
}

/// Parses a JSON object, sanitizes each key by replacing spaces with
/// underscores, and prepends `prefix + "_"`.
fn additional_data(params: &[DynValue]) -> DynValue {
    let value = match params.first() {
        None | Some(DynValue::Null) => return DynValue::Json(JsonValue::Object(JsonMap::new())),
        Some(v) => v,
    };
    let prefix = params
        .get(1)
        .and_then(DynValue::as_str)
        .unwrap_or(DEFAULT_ADDITIONAL_DATA_PREFIX);

    let parsed = coerce_to_json(value);
    let JsonValue::Object(obj) = parsed else {
        return DynValue::Json(JsonValue::Object(JsonMap::new()));
    };

    let mut out = JsonMap::with_capacity(obj.len());
    for (key, val) in obj {
        let sanitized = key.replace(' ', "_");
        out.insert(format!("{prefix}_{sanitized}"), val);
    }
    DynValue::Json(JsonValue::Object(out))
}

fn transaction_state(params: &[DynValue]) -> DynValue {
    match params.first() {
        None | Some(DynValue::Null) => DynValue::Null,
        Some(v) => {
            let text = v.to_display_string();
            if text == "0" {
                DynValue::Text("primary".to_string())
            } else {
                DynValue::Text(format!("flow {text}"))
            }
        }
    }
}

fn length(params: &[DynValue]) -> DynValue {
    let count = match params.first() {
        Some(DynValue::Json(JsonValue::Array(items))) => items.len(),
        Some(DynValue::Text(s)) => s.chars().count(),
        Some(DynValue::Bytes(b)) => b.len(),
        _ => 0,
    };
    DynValue::Int(count as i64)
}

/// Re-keys a survey answer object using question metadata. When
/// `questions` is absent or unusable the answer passes through
/// (serialized if it is not already a plain scalar).
///
/// Comment-field keys (`"<name>-Comment"`) are identified by splitting
/// the key on its *first* `-`. Names that themselves contain `-` are
/// misclassified by this rule; that is inherited, documented behavior,
/// not a bug to fix here.
fn process_survey_answer(params: &[DynValue]) -> DynValue {
    let answer_value = match params.first() {
        None | Some(DynValue::Null) => return DynValue::Null,
        Some(v) => v,
    };
    let answer = coerce_to_json(answer_value);
    let JsonValue::Object(answer_obj) = answer else {
        return DynValue::Json(answer);
    };

    let questions = params
        .get(1)
        .map(coerce_to_json)
        .filter(|q| !q.is_null());

    let Some(questions) = questions else {
        return DynValue::Json(JsonValue::Object(answer_obj));
    };

    let elements = collect_survey_elements(&questions);

    let mut out = JsonMap::with_capacity(answer_obj.len());
    for (key, value) in answer_obj {
        let (base_name, comment_suffix) = match key.split_once('-') {
            Some((name, "Comment")) => (name, true),
            _ => (key.as_str(), false),
        };

        let Some(element) = elements.get(base_name) else {
            out.insert(key, value);
            continue;
        };

        let title = element_title(element).unwrap_or_else(|| base_name.to_string());
        let out_key = if comment_suffix {
            format!("{title}-{}", comment_text(&value))
        } else {
            title
        };
        let out_value = if comment_suffix {
            value
        } else {
            map_answer_value(element, &value)
        };
        out.insert(out_key, out_value);
    }

    DynValue::Json(JsonValue::Object(out))
}

fn comment_text(value: &JsonValue) -> String {
    value.as_str().map(str::to_string).unwrap_or_default()
}

fn collect_survey_elements(questions: &JsonValue) -> JsonMap<String, JsonValue> {
    let mut out = JsonMap::new();
    let Some(pages) = questions.get("pages").and_then(JsonValue::as_array) else {
        return out;
    };
    for page in pages {
        let Some(elements) = page.get("elements").and_then(JsonValue::as_array) else {
            continue;
        };
        for element in elements {
            if let Some(name) = element.get("name").and_then(JsonValue::as_str) {
                out.insert(name.to_string(), element.clone());
            }
        }
    }
    out
}

fn element_title(element: &JsonValue) -> Option<String> {
    match element.get("title") {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Object(multi_lang)) => multi_lang
            .get("default")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => element
            .get("name")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
    }
}

fn map_answer_value(element: &JsonValue, value: &JsonValue) -> JsonValue {
    let element_type = element.get("type").and_then(JsonValue::as_str).unwrap_or("");

    match element_type {
        "boolean" => {
            let truthy = matches!(value, JsonValue::Bool(true)) || value.as_str() == Some("true");
            let label_key = if truthy { "labelTrue" } else { "labelFalse" };
            element
                .get(label_key)
                .cloned()
                .unwrap_or_else(|| value.clone())
        }
        "multipletext" => match value {
            JsonValue::Object(parts) => {
                let joined = parts
                    .values()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(", ");
                JsonValue::String(joined)
            }
            other => other.clone(),
        },
        "matrixdynamic" => JsonValue::String(
            serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        ),
        _ => match value {
            JsonValue::Array(values) => {
                let joined = values
                    .iter()
                    .map(|v| choice_text(element, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                JsonValue::String(joined)
            }
            other => {
                if has_choices(element) {
                    JsonValue::String(choice_text(element, other))
                } else {
                    other.clone()
                }
            }
        },
    }
}

fn has_choices(element: &JsonValue) -> bool {
    element.get("choices").and_then(JsonValue::as_array).is_some()
}

fn choice_text(element: &JsonValue, value: &JsonValue) -> String {
    let Some(choices) = element.get("choices").and_then(JsonValue::as_array) else {
        return value.as_str().map(str::to_string).unwrap_or_default();
    };
    for choice in choices {
        match choice {
            JsonValue::Object(obj) => {
                if obj.get("value") == Some(value) {
                    return obj
                        .get("text")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                        .unwrap_or_default();
                }
            }
            other if other == value => {
                return other.as_str().map(str::to_string).unwrap_or_default();
            }
            _ => {}
        }
    }
    value.as_str().map(str::to_string).unwrap_or_default()
}

fn concat(params: &[DynValue]) -> DynValue {
    DynValue::Text(params.iter().map(DynValue::to_display_string).collect())
}

fn upper(params: &[DynValue]) -> DynValue {
    match params.first() {
        None | Some(DynValue::Null) => DynValue::Null,
        Some(v) => DynValue::Text(v.to_display_string().to_uppercase()),
    }
}

fn lower(params: &[DynValue]) -> DynValue {
    match params.first() {
        None | Some(DynValue::Null) => DynValue::Null,
        Some(v) => DynValue::Text(v.to_display_string().to_lowercase()),
    }
}

/// Formats a time value, an RFC3339 string, or a byte sequence using
/// `layout` (default `YYYY-MM-DD`).
fn format_date(params: &[DynValue]) -> DynValue {
    let value = match params.first() {
        None | Some(DynValue::Null) => return DynValue::Null,
        Some(v) => v,
    };
    let layout = params
        .get(1)
        .and_then(DynValue::as_str)
        .unwrap_or(DEFAULT_FORMAT_DATE_LAYOUT);

    let parsed = match value {
        DynValue::Timestamp(ts) => Some(*ts),
        DynValue::Text(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            }),
        DynValue::Bytes(b) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        DynValue::Int(secs) => DateTime::from_timestamp(*secs, 0),
        _ => None,
    };

    match parsed {
        Some(dt) => DynValue::Text(dt.format(layout).to_string()),
        None => DynValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_masking_ignores_date_param() {
        let with_date = ticket_id_masking(&[DynValue::Int(12345), DynValue::Text("2024-01-01".into())]);
        let without_date = ticket_id_masking(&[DynValue::Int(12345)]);
        assert_eq!(with_date, without_date);
        assert_eq!(with_date, DynValue::Text("TICKET-0000012345".to_string()));
    }

    #[test]
    fn ticket_id_masking_null_on_zero() {
        assert_eq!(ticket_id_masking(&[DynValue::Int(0)]), DynValue::Null);
    }

    #[test]
    fn difftime_formats_absolute_difference() {
        let result = difftime(&[DynValue::Int(1609462800), DynValue::Int(1609459200)]);
        assert_eq!(result, DynValue::Text("01:00:00".to_string()));
    }

    #[test]
    fn difftime_wrong_arity_is_zero() {
        assert_eq!(
            difftime(&[DynValue::Int(1)]),
            DynValue::Text("00:00:00".to_string())
        );
    }

    #[test]
    fn sentiment_mapping_values() {
        assert_eq!(
            sentiment_mapping(&[DynValue::Int(-1)]),
            DynValue::Text("Negative".to_string())
        );
        assert_eq!(sentiment_mapping(&[DynValue::Int(5)]), DynValue::Null);
    }

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(
            strip_html(&[DynValue::Text("<b>hi</b> there".to_string())]),
            DynValue::Text("hi there".to_string())
        );
    }

    #[test]
    fn length_counts_array_and_text() {
        assert_eq!(
            length(&[DynValue::Json(JsonValue::Array(vec![
                JsonValue::Null,
                JsonValue::Null
            ]))]),
            DynValue::Int(2)
        );
        assert_eq!(length(&[DynValue::Text("abc".to_string())]), DynValue::Int(3));
        assert_eq!(length(&[DynValue::Int(5)]), DynValue::Int(0));
    }

    #[test]
    fn transaction_state_maps_zero_to_primary() {
        assert_eq!(
            transaction_state(&[DynValue::Text("0".to_string())]),
            DynValue::Text("primary".to_string())
        );
        assert_eq!(
            transaction_state(&[DynValue::Text("7".to_string())]),
            DynValue::Text("flow 7".to_string())
        );
    }

    #[test]
    fn process_survey_answer_passthrough_without_questions() {
        let answer = DynValue::Json(serde_json::json!({"q1": "yes"}));
        let result = process_survey_answer(&[answer]);
        assert_eq!(result, DynValue::Json(serde_json::json!({"q1": "yes"})));
    }

    #[test]
    fn process_survey_answer_maps_choice_and_title() {
        let answer = DynValue::Json(serde_json::json!({"q1": "a", "q1-Comment": "note"}));
        let questions = DynValue::Json(serde_json::json!({
            "pages": [{
                "elements": [{
                    "name": "q1",
                    "title": "Question One",
                    "choices": [{"value": "a", "text": "Option A"}]
                }]
            }]
        }));
        let result = process_survey_answer(&[answer, questions]);
        let JsonValue::Object(obj) = result.into_json() else {
            panic!("expected object");
        };
        assert_eq!(obj.get("Question One"), Some(&JsonValue::String("Option A".to_string())));
        assert!(obj.keys().any(|k| k.starts_with("Question One-")));
    }

    #[test]
    fn concat_joins_display_strings() {
        assert_eq!(
            concat(&[DynValue::Text("a".to_string()), DynValue::Int(1)]),
            DynValue::Text("a1".to_string())
        );
    }

    #[test]
    fn format_date_defaults_to_ymd() {
        let value = DynValue::Text("2024-03-05T10:00:00Z".to_string());
        assert_eq!(format_date(&[value]), DynValue::Text("2024-03-05".to_string()));
    }
}
