//! InfluxDB annotated CSV: `#datatype`, `#group` and `#default` rows, a
//! header row, data rows; a blank line starts the next result block.
//! Without annotations every cell is read as text.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use replay_api::Identifier;

// ═══════════════════════════════════════════════════════════════
//  Values
// ═══════════════════════════════════════════════════════════════

/// One typed cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Time(DateTime<FixedOffset>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Bool(_) | FieldValue::Time(_) => None,
        }
    }

    pub fn as_identifier(&self) -> Option<Identifier> {
        match self {
            FieldValue::Int(v) => Some(Identifier::Int(*v)),
            FieldValue::UInt(v) => Some(match i64::try_from(*v) {
                Ok(i) => Identifier::Int(i),
                Err(_) => Identifier::Text(v.to_string()),
            }),
            FieldValue::Float(v) => Some(Identifier::from_f64(*v)),
            // Un-annotated results carry integer ids as text.
            FieldValue::Text(s) => Some(match s.parse::<i64>() {
                Ok(i) => Identifier::Int(i),
                Err(_) => Identifier::Text(s.clone()),
            }),
            FieldValue::Bool(_) | FieldValue::Time(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            FieldValue::Time(t) => Some(*t),
            FieldValue::Text(s) => DateTime::parse_from_rfc3339(s.trim()).ok(),
            _ => None,
        }
    }
}

/// Column name → value for one result row. Absent cells are not stored.
pub type Row = HashMap<String, FieldValue>;

#[derive(Debug, Default)]
pub struct Table {
    /// Value of the `table` column (empty when the result has none).
    pub id: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CsvError {
    /// The server reported a query failure inside the result.
    #[error("query error: {0}")]
    InBand(String),
    /// A cell does not match its declared datatype.
    #[error("line {line}, column {column}: {detail}")]
    Cell { line: usize, column: String, detail: String },
}

// ═══════════════════════════════════════════════════════════════
//  Parser
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Block {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    header: Option<Vec<String>>,
    is_error: bool,
}

/// Split a response body into tables of typed rows.
///
/// Rows of one block are grouped by their `table` column, so the table
/// count matches what the server reports.
pub fn parse_annotated_csv(body: &str) -> Result<Vec<Table>, CsvError> {
    let mut tables: Vec<Table> = Vec::new();
    let mut block = Block::default();
    let mut block_no = 0usize;
    let mut last_key: Option<(usize, String)> = None;

    for (line_no, line) in logical_lines(body) {
        if line.trim().is_empty() {
            if block.header.is_some() {
                block_no += 1;
            }
            block = Block::default();
            continue;
        }

        let fields = parse_fields(&line);
        let first = fields.first().map(String::as_str).unwrap_or("");

        if first.starts_with('#') {
            match first {
                "#datatype" => block.datatypes = fields,
                "#default" => block.defaults = fields,
                _ => {}
            }
            continue;
        }

        if block.header.is_none() {
            block.is_error = fields.get(1).map(String::as_str) == Some("error");
            block.header = Some(fields);
            continue;
        }
        let header = block.header.as_deref().unwrap_or_default();

        if block.is_error {
            let msg = fields.get(1).cloned().unwrap_or_default();
            return Err(CsvError::InBand(msg));
        }

        let mut row = Row::new();
        // Column 0 is the annotation column, never data.
        for (i, name) in header.iter().enumerate().skip(1) {
            let mut cell = fields.get(i).map(String::as_str).unwrap_or("");
            if cell.is_empty() {
                cell = block.defaults.get(i).map(String::as_str).unwrap_or("");
            }
            if cell.is_empty() {
                continue;
            }
            let datatype = block.datatypes.get(i).map(String::as_str).unwrap_or("string");
            let value = typed_value(datatype, cell).map_err(|detail| CsvError::Cell {
                line: line_no,
                column: name.clone(),
                detail,
            })?;
            row.insert(name.clone(), value);
        }

        let table_id = match row.get("table") {
            Some(FieldValue::Int(v)) => v.to_string(),
            Some(FieldValue::Text(s)) => s.clone(),
            _ => String::new(),
        };
        let key = (block_no, table_id);
        if last_key.as_ref() != Some(&key) {
            tables.push(Table { id: key.1.clone(), rows: Vec::new() });
            last_key = Some(key);
        }
        if let Some(table) = tables.last_mut() {
            table.rows.push(row);
        }
    }

    Ok(tables)
}

fn typed_value(datatype: &str, cell: &str) -> Result<FieldValue, String> {
    let bad = |e: &dyn std::fmt::Display| format!("{cell:?} is not {datatype}: {e}");
    match datatype {
        "long" => cell.parse().map(FieldValue::Int).map_err(|e| bad(&e)),
        "unsignedLong" => cell.parse().map(FieldValue::UInt).map_err(|e| bad(&e)),
        "double" => match cell {
            "+Inf" => Ok(FieldValue::Float(f64::INFINITY)),
            "-Inf" => Ok(FieldValue::Float(f64::NEG_INFINITY)),
            _ => cell.parse().map(FieldValue::Float).map_err(|e| bad(&e)),
        },
        "boolean" => cell.parse().map(FieldValue::Bool).map_err(|e| bad(&e)),
        "dateTime:RFC3339" | "dateTime:RFC3339Nano" => DateTime::parse_from_rfc3339(cell)
            .map(FieldValue::Time)
            .map_err(|e| bad(&e)),
        _ => Ok(FieldValue::Text(cell.to_string())),
    }
}

/// Physical lines joined while a quoted field is still open, so a field
/// may span lines. Each entry carries the 1-based number of its first line.
fn logical_lines(body: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    let mut open = false;

    for (i, raw) in body.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        if let Some((_, acc)) = pending.as_mut() {
            acc.push('\n');
            acc.push_str(raw);
        } else {
            pending = Some((i + 1, raw.to_string()));
        }
        // "" escapes keep the parity, so an odd count toggles the state.
        open ^= raw.matches('"').count() % 2 == 1;
        if !open {
            out.extend(pending.take());
        }
    }
    out.extend(pending);
    out
}

/// RFC 4180 split of one logical line.
fn parse_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    // Escaped quote: "" → "
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TABLES: &str = "\
#group,false,false,true,true,false,false,false,false,false,false,false,true\r
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,long,string,double,double,double,string\r
#default,_result,,,,,,,,,,,\r
,result,table,_start,_stop,_time,ObjectType,SourceId,TargetId,X,Y,Z,scenario\r
,,0,2023-07-01T18:05:05Z,2023-07-02T00:00:00Z,2023-07-01T18:05:06Z,Pedestrian,1,,1.5,2,0,s1\r
,,0,2023-07-01T18:05:05Z,2023-07-02T00:00:00Z,2023-07-01T18:05:07.25Z,Pedestrian,1,rsu,1.75,2,0,s1\r
,,1,2023-07-01T18:05:05Z,2023-07-02T00:00:00Z,2023-07-01T18:05:06.5Z,\"Car, red\",2,,10,20,0,s1\r
\r
";

    #[test]
    fn groups_rows_by_table() {
        let tables = parse_annotated_csv(TWO_TABLES).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].id, "0");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[1].id, "1");
        assert_eq!(tables[1].rows.len(), 1);
    }

    #[test]
    fn cells_are_typed_and_defaulted() {
        let tables = parse_annotated_csv(TWO_TABLES).unwrap();
        let row = &tables[0].rows[1];

        assert_eq!(row["result"], FieldValue::Text("_result".into()));
        assert_eq!(row["SourceId"], FieldValue::Int(1));
        assert_eq!(row["TargetId"], FieldValue::Text("rsu".into()));
        assert_eq!(row["X"], FieldValue::Float(1.75));
        let time = row["_time"].as_time().unwrap();
        assert_eq!(time.timestamp_subsec_millis(), 250);

        assert!(!tables[0].rows[0].contains_key("TargetId"));
        assert_eq!(tables[1].rows[0]["ObjectType"], FieldValue::Text("Car, red".into()));
    }

    #[test]
    fn blank_line_starts_new_block() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,double
,result,table,_time,X
,_result,0,2023-07-01T18:05:06Z,1

#datatype,string,long,dateTime:RFC3339,string
,result,table,_time,ObjectType
,_result,0,2023-07-01T18:05:06Z,Vehicle
";
        let tables = parse_annotated_csv(body).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].rows[0]["ObjectType"], FieldValue::Text("Vehicle".into()));
    }

    #[test]
    fn error_table_is_reported() {
        let body = "\
#datatype,string,string
#group,true,true
#default,,
,error,reference
,\"bucket \"\"crownet\"\" not found\",
";
        assert_eq!(
            parse_annotated_csv(body).unwrap_err(),
            CsvError::InBand("bucket \"crownet\" not found".into())
        );
    }

    #[test]
    fn mistyped_cell_is_an_error() {
        let body = "\
#datatype,string,long,double
,result,table,X
,_result,0,north
";
        let err = parse_annotated_csv(body).unwrap_err();
        assert!(matches!(err, CsvError::Cell { line: 3, ref column, .. } if column == "X"));
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let body = "\
#datatype,string,long,string,double
,result,table,ObjectType,X
,_result,0,\"Car\r
red\",1
,_result,0,Bus,north
";
        let err = parse_annotated_csv(body).unwrap_err();
        assert!(matches!(err, CsvError::Cell { line: 5, .. }));

        let tables = parse_annotated_csv(&body.replace("north", "2")).unwrap();
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0]["ObjectType"], FieldValue::Text("Car\nred".into()));
        assert_eq!(tables[0].rows[1]["X"], FieldValue::Float(2.0));
    }

    #[test]
    fn unannotated_cells_are_text() {
        let body = ",result,table,_time,SourceId,TargetId\r\n,_result,0,2023-07-01T18:05:06Z,7,rsu-2\r\n";
        let tables = parse_annotated_csv(body).unwrap();
        let row = &tables[0].rows[0];

        assert_eq!(row["SourceId"], FieldValue::Text("7".into()));
        assert_eq!(row["SourceId"].as_identifier(), Some(Identifier::Int(7)));
        assert_eq!(row["TargetId"].as_identifier(), Some(Identifier::Text("rsu-2".into())));
        assert!(row["_time"].as_time().is_some());
    }

    #[test]
    fn empty_body_has_no_tables() {
        assert!(parse_annotated_csv("").unwrap().is_empty());
        assert!(parse_annotated_csv("\r\n").unwrap().is_empty());
    }

    #[test]
    fn field_splitting() {
        assert_eq!(parse_fields(",a,,\"b,c\""), ["", "a", "", "b,c"]);
        assert_eq!(parse_fields("x,"), ["x", ""]);
    }
}
