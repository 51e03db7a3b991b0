//! Training label table parser.
//!
//! A CSV with a header row naming at least an image column and a `price`
//! column. The image column may be called `image_reference` or
//! `image_filename`; other columns are ignored. Fields may be quoted
//! with `"`, and `""` inside quotes is a literal quote.
//!
//! Lines with a missing reference or an unparseable price do not abort
//! the parse. They are returned as [`RejectedLine`]s so the caller can
//! report them.

use koi_metrics::TrainingRow;

use crate::ExportError;

const REFERENCE_COLUMNS: [&str; 2] = ["image_reference", "image_filename"];
const PRICE_COLUMN: &str = "price";

/// A data line that did not yield a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the input.
    pub line: usize,
    /// What was wrong with it.
    pub reason: String,
}

/// Parsed label table.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    /// Usable rows, in file order.
    pub rows: Vec<TrainingRow>,
    /// Lines that were skipped.
    pub rejected: Vec<RejectedLine>,
}

/// Parse a label table.
///
/// # Errors
///
/// Returns [`ExportError::EmptyTable`] when there is no header line, and
/// [`ExportError::MissingColumn`] when the header lacks an image or
/// `price` column.
pub fn parse_label_table(text: &str) -> Result<LabelTable, ExportError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines.next().ok_or(ExportError::EmptyTable)?;
    let header: Vec<String> = split_line(header.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let column = |names: &[&str]| header.iter().position(|h| names.contains(&h.as_str()));
    let reference_at = column(&REFERENCE_COLUMNS).ok_or(ExportError::MissingColumn("image_reference"))?;
    let price_at = column(&[PRICE_COLUMN]).ok_or(ExportError::MissingColumn(PRICE_COLUMN))?;

    let mut table = LabelTable {
        rows: Vec::new(),
        rejected: Vec::new(),
    };
    for (index, line) in lines {
        let fields = split_line(line);
        let field = |at: usize| fields.get(at).map_or("", |f| f.trim());
        match parse_row(field(reference_at), field(price_at)) {
            Ok(row) => table.rows.push(row),
            Err(reason) => table.rejected.push(RejectedLine {
                line: index + 1,
                reason,
            }),
        }
    }
    Ok(table)
}

fn parse_row(reference: &str, price: &str) -> Result<TrainingRow, String> {
    if reference.is_empty() {
        return Err("missing image reference".into());
    }
    if price.is_empty() {
        return Err(format!("{reference}: missing price"));
    }
    let value: f64 = price
        .parse()
        .map_err(|_| format!("{reference}: invalid price {price:?}"))?;
    if !value.is_finite() {
        return Err(format!("{reference}: invalid price {price:?}"));
    }
    Ok(TrainingRow::new(reference, value))
}

/// Split one CSV line into fields, honoring double quotes.
fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == ',' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}
