//! Content negotiation and output formatting for `/read`.
//!
//! Four formats are offered through the `Accept` header. The JSON formats
//! collect; NDJSON and CSV emit one row at a time. CSV is only available
//! when the top-level projection is a composite of flat components, and
//! its header is derived from the projection in declaration order, so an
//! empty result still yields the header line.

use serde_json::Value;
use tether_model::specification::Projection;

use crate::errors::{HttpServerError, HttpServerResult};

#[cfg(test)]
#[path = "content_test.rs"]
mod content_test;

pub const ACCEPT_POST: &str = "text/plain, application/json, application/x-ndjson, text/csv";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFormat {
    PrettyJson,
    CompactJson,
    NdJson,
    Csv,
}

impl ReadFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ReadFormat::PrettyJson => "text/plain",
            ReadFormat::CompactJson => "application/json",
            ReadFormat::NdJson => "application/x-ndjson",
            ReadFormat::Csv => "text/csv",
        }
    }
}

/// Picks the output format from the `Accept` header; pretty JSON is the
/// default.
pub fn negotiate(accept: Option<&str>) -> ReadFormat {
    let Some(accept) = accept else {
        return ReadFormat::PrettyJson;
    };
    for offered in accept.split(',') {
        let media_type = offered.split(';').next().unwrap_or("").trim();
        match media_type {
            "application/json" => return ReadFormat::CompactJson,
            "application/x-ndjson" => return ReadFormat::NdJson,
            "text/csv" => return ReadFormat::Csv,
            "text/plain" => return ReadFormat::PrettyJson,
            _ => {}
        }
    }
    ReadFormat::PrettyJson
}

pub fn format_pretty_json(values: &[Value]) -> String {
    serde_json::to_string_pretty(values).expect("JSON values serialize")
}

pub fn format_compact_json(values: &[Value]) -> String {
    serde_json::to_string(values).expect("JSON values serialize")
}

/// One JSON value per line. A failure mid-stream is reported as a final
/// `{"error": true, "message": …}` line; the 200 status is already
/// committed by then.
pub fn ndjson_lines(
    mut values: impl Iterator<Item = Result<Value, String>>,
) -> impl Iterator<Item = String> {
    let mut terminated = false;
    std::iter::from_fn(move || {
        if terminated {
            return None;
        }
        match values.next()? {
            Ok(value) => Some(format!(
                "{}\n",
                serde_json::to_string(&value).expect("JSON values serialize")
            )),
            Err(message) => {
                terminated = true;
                let frame = serde_json::json!({ "error": true, "message": message });
                Some(format!("{frame}\n"))
            }
        }
    })
}

/// The CSV header columns, in declaration order. Only a composite of flat
/// components (field, hash, time) can be rendered as CSV; the error names
/// the first offending component.
pub fn csv_columns(projection: &Projection) -> HttpServerResult<Vec<String>> {
    let Projection::Composite { components } = projection else {
        return Err(HttpServerError::InvalidInput(
            "CSV output requires a composite projection of flat components".to_string(),
        ));
    };
    let mut columns = Vec::with_capacity(components.len());
    for component in components {
        match &component.projection {
            Projection::Field { .. } | Projection::Hash { .. } | Projection::Time { .. } => {
                columns.push(component.name.clone());
            }
            _ => {
                return Err(HttpServerError::InvalidInput(format!(
                    "CSV output cannot render component '{}': only field, hash, and time \
                     projections are flat",
                    component.name
                )));
            }
        }
    }
    Ok(columns)
}

/// The header line followed by one line per row, RFC 4180 quoting.
pub fn csv_lines<'a>(
    columns: &'a [String],
    values: impl Iterator<Item = &'a Value> + 'a,
) -> impl Iterator<Item = String> + 'a {
    let header = format!("{}\n", columns.iter().map(|c| csv_escape_str(c)).collect::<Vec<_>>().join(","));
    std::iter::once(header).chain(values.map(move |value| {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| csv_cell(value.get(column).unwrap_or(&Value::Null)))
            .collect();
        format!("{}\n", cells.join(","))
    }))
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => csv_escape_str(text),
        other => other.to_string(),
    }
}

fn csv_escape_str(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
