use std::fs;
use std::mem::take;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Header row plus data rows of a comma separated export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rows = parse_rows(text.trim_start_matches('\u{feff}'), ',');
        if rows.is_empty() {
            bail!("CSV input is empty");
        }
        let headers = rows
            .remove(0)
            .into_iter()
            .map(|header| header.trim().to_string())
            .collect();
        Ok(Self { headers, rows })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_csv_string())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Case-insensitive exact header lookup.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    }

    pub fn column_where(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| predicate(&header.to_ascii_lowercase()))
    }

    pub fn lower_headers(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|header| header.to_ascii_lowercase())
            .collect()
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        write_row(&mut out, &self.headers, ',');
        for row in &self.rows {
            write_row(&mut out, row, ',');
        }
        out
    }
}

/// Cell accessor that tolerates short rows.
pub fn cell(row: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|index| row.get(index))
        .map(|value| value.trim())
        .unwrap_or("")
}

/// Quote and CRLF tolerant CSV parser. Unterminated quotes flush whatever was read.
pub fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            c if c == sep && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

pub fn write_row(out: &mut String, row: &[String], sep: char) {
    for (index, cell) in row.iter().enumerate() {
        if index > 0 {
            out.push(sep);
        }
        if needs_quotes(cell, sep) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields_with_commas_and_newlines() {
        let rows = parse_rows("a,\"b, c\",\"line\nbreak\"\r\nd,\"say \"\"hi\"\"\",f\n", ',');
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["a", "b, c", "line\nbreak"]);
        assert_eq!(rows[1], vec!["d", "say \"hi\"", "f"]);
    }

    #[test]
    fn skips_blank_lines_and_keeps_trailing_row() {
        let rows = parse_rows("a,b\n\n\nc,d", ',');
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn table_trims_headers_and_strips_bom() {
        let table = CsvTable::parse("\u{feff} Source ,Destination\nx,y\n").expect("parse");
        assert_eq!(table.headers, vec!["Source", "Destination"]);
        assert_eq!(table.column("source"), Some(0));
        assert_eq!(cell(&table.rows[0], table.column("DESTINATION")), "y");
        assert_eq!(cell(&table.rows[0], Some(9)), "");
    }

    #[test]
    fn empty_input_is_an_error() {
        let error = CsvTable::parse("").expect_err("must fail");
        assert!(error.to_string().contains("empty"));
    }

    #[test]
    fn writer_quotes_only_when_needed() {
        let mut table = CsvTable::new(vec!["url".to_string(), "notes".to_string()]);
        table.push_row(vec![
            "https://example.com/a".to_string(),
            "moved, \"maybe\"".to_string(),
        ]);
        assert_eq!(
            table.to_csv_string(),
            "url,notes\nhttps://example.com/a,\"moved, \"\"maybe\"\"\"\n"
        );
        let reparsed = CsvTable::parse(&table.to_csv_string()).expect("reparse");
        assert_eq!(reparsed, table);
    }
}
