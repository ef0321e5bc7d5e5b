//! Serializations of a filled form: CSV, JSON, print HTML and mail-to.
//!
//! All exports are pure functions of the field list, the filled map and the
//! document name.

use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::schema::{now_iso8601, DetectedField, FieldType, FilledFieldMap};

const CSV_HEADERS: [&str; 3] = ["Field Label", "Field Type", "Value"];
const PRINT_PLACEHOLDER: &str = "-";

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Print,
    Mail,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "print" => Ok(Self::Print),
            "mail" => Ok(Self::Mail),
            other => Err(format!("Unknown export format: {}", other)),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Print => "text/html; charset=utf-8",
            ExportFormat::Mail => "text/plain; charset=utf-8",
        }
    }

    /// Download file name, for formats that are saved as files.
    pub fn file_name(&self, document_name: &str) -> Option<String> {
        match self {
            ExportFormat::Csv => Some(format!("{}-filled.csv", document_name)),
            ExportFormat::Json => Some(format!("{}-filled.json", document_name)),
            ExportFormat::Print | ExportFormat::Mail => None,
        }
    }
}

/// Render `format` at the current time.
pub fn render(
    format: ExportFormat,
    fields: &[DetectedField],
    filled: &FilledFieldMap,
    document_name: &str,
) -> Result<String> {
    let exported_at = now_iso8601();
    match format {
        ExportFormat::Csv => to_csv(fields, filled),
        ExportFormat::Json => to_json(fields, filled, document_name, &exported_at),
        ExportFormat::Print => Ok(to_print_html(fields, filled, document_name, &exported_at)),
        ExportFormat::Mail => Ok(to_mailto(filled, document_name)),
    }
}

/// Header plus one row per field in detection order. Every cell is wrapped
/// in double quotes verbatim; embedded quotes are not escaped.
pub fn to_csv(fields: &[DetectedField], filled: &FilledFieldMap) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADERS.iter().map(|h| quoted(h)))?;
    for field in fields {
        let value = filled.get(&field.id).map(String::as_str).unwrap_or("");
        writer.write_record([
            quoted(&field.label),
            quoted(field.field_type.as_str()),
            quoted(value),
        ])?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    let mut out = String::from_utf8(bytes).context("CSV output is not UTF-8")?;
    if out.ends_with('\n') {
        out.pop();
    }
    Ok(out)
}

fn quoted(cell: &str) -> String {
    format!("\"{}\"", cell)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    document_name: &'a str,
    export_date: &'a str,
    filled_fields: FilledFieldMap,
    fields_metadata: Vec<FieldMetadata<'a>>,
}

#[derive(Debug, Serialize)]
struct FieldMetadata<'a> {
    id: &'a str,
    label: &'a str,
    #[serde(rename = "type")]
    field_type: FieldType,
}

pub fn to_json(
    fields: &[DetectedField],
    filled: &FilledFieldMap,
    document_name: &str,
    export_date: &str,
) -> Result<String> {
    let export = JsonExport {
        document_name,
        export_date,
        filled_fields: filled.clone(),
        fields_metadata: fields
            .iter()
            .map(|f| FieldMetadata {
                id: &f.id,
                label: &f.label,
                field_type: f.field_type,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&export).context("Failed to serialize JSON export")
}

pub fn to_print_html(
    fields: &[DetectedField],
    filled: &FilledFieldMap,
    document_name: &str,
    exported_at: &str,
) -> String {
    let title = html_escape(&format!("{} - Filled Form", document_name));

    let mut rows = String::new();
    for field in fields {
        let value = filled
            .get(&field.id)
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .unwrap_or(PRINT_PLACEHOLDER);
        rows.push_str(&format!(
            "      <tr>\n        <td>{}</td>\n        <td>{}</td>\n      </tr>\n",
            html_escape(&field.label),
            html_escape(value)
        ));
    }

    format!(
        r#"<html>
  <head>
    <title>{title}</title>
    <style>
      body {{ font-family: Arial, sans-serif; margin: 20px; }}
      h1 {{ color: #333; }}
      table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
      th, td {{ border: 1px solid #ddd; padding: 12px; text-align: left; }}
      th {{ background-color: #3b82f6; color: white; }}
      tr:nth-child(even) {{ background-color: #f9fafb; }}
    </style>
  </head>
  <body>
    <h1>{title}</h1>
    <p><strong>Exported on:</strong> {exported_at}</p>
    <table>
      <tr>
        <th>Field Label</th>
        <th>Value</th>
      </tr>
{rows}    </table>
  </body>
</html>
"#,
        title = title,
        exported_at = html_escape(exported_at),
        rows = rows
    )
}

/// Plain-text mail body: one `field_id: value` line per filled entry.
pub fn mail_body(filled: &FilledFieldMap, document_name: &str) -> String {
    let lines = filled
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n");
    format!("I have completed the form: {}\n\n{}", document_name, lines)
}

pub fn to_mailto(filled: &FilledFieldMap, document_name: &str) -> String {
    let subject = format!("Filled Document: {}", document_name);
    format!(
        "mailto:?subject={}&body={}",
        encode_uri_component(&subject),
        encode_uri_component(&mail_body(filled, document_name))
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// `encodeURIComponent` equivalent: `urlencoding` leaves only `A-Z a-z 0-9 - _ . ~`
/// unescaped, and `! * ' ( )` are restored on top of that.
fn encode_uri_component(s: &str) -> String {
    const UNRESERVED_MARKS: [(&str, &str); 5] = [
        ("%21", "!"),
        ("%2A", "*"),
        ("%27", "'"),
        ("%28", "("),
        ("%29", ")"),
    ];
    let mut out = urlencoding::encode(s).into_owned();
    for (escaped, mark) in UNRESERVED_MARKS {
        out = out.replace(escaped, mark);
    }
    out
}
