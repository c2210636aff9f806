use std::io::Cursor;

use calamine::{Data, Reader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported input: {0}")]
    Unsupported(String),
    #[error("Empty file: {0}")]
    EmptyFile(String),
    #[error("Workbook error: {0}")]
    Workbook(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// How an input file is routed, decided from extension with MIME fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Spreadsheet,
    Csv,
    Image,
    Pdf,
}

impl SourceKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tiff" => Some(Self::Image),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("image/") {
            return Some(Self::Image);
        }
        match mime {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(Self::Spreadsheet),
            "text/csv" => Some(Self::Csv),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Route a file by its name, falling back to the declared MIME type.
    pub fn detect(file_name: &str, mime: Option<&str>) -> ParseResult<Self> {
        let by_ext = file_name
            .rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext));

        by_ext
            .or_else(|| mime.and_then(Self::from_mime))
            .ok_or_else(|| ParseError::Unsupported(file_name.to_string()))
    }

    /// MIME type sent to the extraction service.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Self::Csv => "text/csv",
            Self::Image => "image/png",
            Self::Pdf => "application/pdf",
        }
    }
}

/// Parse spreadsheet or CSV bytes into a row-major grid of strings.
pub fn parse_grid(file_name: &str, kind: SourceKind, bytes: &[u8]) -> ParseResult<Vec<Vec<String>>> {
    let rows = match kind {
        SourceKind::Spreadsheet => parse_workbook(file_name, bytes)?,
        SourceKind::Csv => parse_csv(bytes)?,
        SourceKind::Image | SourceKind::Pdf => {
            return Err(ParseError::Unsupported(file_name.to_string()))
        }
    };

    if rows.iter().all(|r| is_blank_row(r)) {
        return Err(ParseError::EmptyFile(file_name.to_string()));
    }

    Ok(rows)
}

fn parse_workbook(file_name: &str, bytes: &[u8]) -> ParseResult<Vec<Vec<String>>> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ParseError::EmptyFile(file_name.to_string()))?
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn parse_csv(bytes: &[u8]) -> ParseResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_number(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

fn format_number(f: f64) -> String {
    if (f.fract()).abs() < f64::EPSILON {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

// Excel epoch is 1899-12-30, accounting for the 1900 leap year bug.
fn excel_serial_to_date(serial: f64) -> String {
    let Some(base) = chrono::NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return String::new();
    };
    let date = base + chrono::Duration::days(serial as i64);
    date.format("%Y-%m-%d").to_string()
}

/// A body row with no content at all; filtered before chunking.
#[must_use]
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}
