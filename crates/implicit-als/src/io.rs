//! I/O routines for rating files, models and dense result tables.
//!
//! Two rating formats are read:
//!
//! - **CSR**: three comma-separated lines holding 1-based row offsets,
//!   1-based column indices and values.
//! - **Triplets**: one `user item rating` entry per line, 0-based, with `#`
//!   comments.
//!
//! Models are written as a small text header followed by one `%.17g` row per
//! user and per item, so a save/load round trip is exact.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::AlsError;
use crate::table::{CsrTable, DenseTable};
use crate::types::Model;
use crate::util::{parse_one_based_index, MAX_INDEX};

// ─── C-compatible %g formatting ─────────────────────────────────────
//
// `%.Pg` strips trailing zeros and switches to scientific notation when
// the exponent is < -4 or >= P. The exponent has at least two digits.

/// Formats `f64` like C's `%.Pg`.
struct Gfmt {
    value: f64,
    precision: usize,
}

impl Gfmt {
    fn new(value: f64, precision: usize) -> Self {
        Self { value, precision }
    }
}

impl fmt::Display for Gfmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.value;
        let p = self.precision.max(1);

        if !v.is_finite() {
            return write!(f, "{}", v);
        }
        if v == 0.0 {
            return if v.is_sign_negative() {
                write!(f, "-0")
            } else {
                write!(f, "0")
            };
        }

        // the exponent of the value after rounding to `p` significant digits
        let sci = format!("{:.prec$e}", v, prec = p - 1);
        let Some((mantissa, exponent)) = sci.split_once('e') else {
            return write!(f, "{}", sci);
        };
        let exp: i32 = exponent.parse().map_err(|_| fmt::Error)?;

        if exp < -4 || exp >= p as i32 {
            let sign = if exp < 0 { '-' } else { '+' };
            write!(f, "{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
        } else {
            let decimals = (p as i32 - 1 - exp) as usize;
            write!(f, "{}", trim_fraction(&format!("{:.prec$}", v, prec = decimals)))
        }
    }
}

/// Drop trailing zeros of a fractional part, and the point if nothing is left.
fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Format a float like C's `%g` (6 significant digits).
pub fn format_g(v: f64) -> String {
    Gfmt::new(v, 6).to_string()
}

/// Format a float like C's `%.17g` (17 significant digits).
pub fn format_17g(v: f64) -> String {
    Gfmt::new(v, 17).to_string()
}

fn csv_tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn join_csv(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(",")
}

fn parse_error(line: usize, message: impl Into<String>) -> AlsError {
    AlsError::ParseError {
        line,
        message: message.into(),
    }
}

// ─── CSR rating files ────────────────────────────────────────────────

/// Load a CSR rating table from a file.
///
/// `n_cols` overrides the column count; by default it is the largest column
/// index present.
pub fn load_csr(path: &Path, n_cols: Option<usize>) -> Result<CsrTable, AlsError> {
    let file = std::fs::File::open(path)?;
    load_csr_from_reader(std::io::BufReader::new(file), n_cols)
}

/// Load a CSR rating table from any buffered reader.
pub fn load_csr_from_reader(
    reader: impl BufRead,
    n_cols: Option<usize>,
) -> Result<CsrTable, AlsError> {
    let mut sections: Vec<(usize, String)> = Vec::with_capacity(3);
    let mut last_line = 0;
    for (line_idx, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        last_line = line_idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if sections.len() == 3 {
            return Err(parse_error(last_line, "unexpected data after the values line"));
        }
        sections.push((last_line, line.to_string()));
    }
    if sections.len() < 3 {
        return Err(parse_error(
            last_line + 1,
            format!(
                "expected row offsets, column indices and values lines, found {}",
                sections.len()
            ),
        ));
    }

    let indices = |(line_num, text): &(usize, String)| {
        csv_tokens(text)
            .map(|t| parse_one_based_index(t, MAX_INDEX).map_err(|m| parse_error(*line_num, m)))
            .collect::<Result<Vec<_>, _>>()
    };
    let offsets_line = sections[0].0;
    let cols_line = sections[1].0;
    let values_line = sections[2].0;

    let row_offsets = indices(&sections[0])?;
    if row_offsets.is_empty() {
        return Err(parse_error(offsets_line, "no row offsets"));
    }
    let col_indices = indices(&sections[1])?;
    let values = csv_tokens(&sections[2].1)
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| parse_error(values_line, format!("invalid value: {}", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() != col_indices.len() {
        return Err(parse_error(
            values_line,
            format!(
                "{} values for {} column indices",
                values.len(),
                col_indices.len()
            ),
        ));
    }

    let max_col = col_indices.iter().max().map_or(0, |&c| c + 1);
    let n_cols = match n_cols {
        Some(n) if n < max_col => {
            return Err(parse_error(
                cols_line,
                format!("column index {} exceeds {} columns", max_col, n),
            ))
        }
        Some(n) => n,
        None => max_col,
    };
    let n_rows = row_offsets.len() - 1;
    CsrTable::new(n_rows, n_cols, values, col_indices, row_offsets)
}

/// Save a CSR table in the three-line format read by [`load_csr`].
pub fn save_csr(path: &Path, table: &CsrTable) -> Result<(), AlsError> {
    let file = std::fs::File::create(path)?;
    save_csr_to_writer(std::io::BufWriter::new(file), table)
}

/// Save a CSR table to any writer.
pub fn save_csr_to_writer(mut w: impl Write, table: &CsrTable) -> Result<(), AlsError> {
    let offsets = table.row_offsets().iter().map(|o| (o + 1).to_string());
    let cols = table.col_indices().iter().map(|c| (c + 1).to_string());
    let values = table.values().iter().map(|&v| format_17g(v));
    writeln!(w, "{}", join_csv(offsets))?;
    writeln!(w, "{}", join_csv(cols))?;
    writeln!(w, "{}", join_csv(values))?;
    w.flush()?;
    Ok(())
}

// ─── Triplet rating files ────────────────────────────────────────────

/// Load `user item rating` triplets from a file.
pub fn load_triplets(path: &Path) -> Result<CsrTable, AlsError> {
    let file = std::fs::File::open(path)?;
    load_triplets_from_reader(std::io::BufReader::new(file))
}

/// Load `user item rating` triplets from any buffered reader.
///
/// The table is sized by the largest user and item index seen.
pub fn load_triplets_from_reader(reader: impl BufRead) -> Result<CsrTable, AlsError> {
    let mut triplets = Vec::new();
    let mut lines_of = Vec::new();
    let (mut n_rows, mut n_cols) = (0usize, 0usize);

    for (line_idx, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line_num = line_idx + 1;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let mut field = |name: &str| {
            parts
                .next()
                .ok_or_else(|| parse_error(line_num, format!("missing {}", name)))
        };
        let user_str = field("user")?;
        let item_str = field("item")?;
        let rating_str = field("rating")?;
        if parts.next().is_some() {
            return Err(parse_error(line_num, "expected 'user item rating'"));
        }

        let index = |s: &str| {
            s.parse::<usize>()
                .ok()
                .filter(|&i| i < MAX_INDEX)
                .ok_or_else(|| parse_error(line_num, format!("invalid index: {}", s)))
        };
        let user = index(user_str)?;
        let item = index(item_str)?;
        let rating: f64 = rating_str
            .parse()
            .map_err(|_| parse_error(line_num, format!("invalid rating: {}", rating_str)))?;

        n_rows = n_rows.max(user + 1);
        n_cols = n_cols.max(item + 1);
        triplets.push((user, item, rating));
        lines_of.push(line_num);
    }

    CsrTable::from_triplets(n_rows, n_cols, &triplets).map_err(|e| {
        // point at the second occurrence of a duplicate pair
        let mut seen = std::collections::HashSet::new();
        for (&(u, i, _), &line) in triplets.iter().zip(&lines_of) {
            if !seen.insert((u, i)) {
                return parse_error(line, format!("duplicate rating for ({}, {})", u, i));
            }
        }
        e
    })
}

// ─── Model files ─────────────────────────────────────────────────────

/// Save a model to a file.
pub fn save_model(path: &Path, model: &Model) -> Result<(), AlsError> {
    let file = std::fs::File::create(path)?;
    save_model_to_writer(std::io::BufWriter::new(file), model)
}

fn write_rows(w: &mut impl Write, table: &DenseTable, fmt: fn(f64) -> String) -> Result<(), AlsError> {
    for i in 0..table.n_rows() {
        let row: Vec<String> = table.row(i).iter().map(|&v| fmt(v)).collect();
        writeln!(w, "{}", row.join(" "))?;
    }
    Ok(())
}

/// Save a model to any writer.
pub fn save_model_to_writer(mut w: impl Write, model: &Model) -> Result<(), AlsError> {
    writeln!(w, "n_factors {}", model.n_factors())?;
    writeln!(w, "n_users {}", model.n_users())?;
    writeln!(w, "n_items {}", model.n_items())?;
    writeln!(w, "users")?;
    write_rows(&mut w, model.users_factors(), format_17g)?;
    writeln!(w, "items")?;
    write_rows(&mut w, model.items_factors(), format_17g)?;
    w.flush()?;
    Ok(())
}

/// Load a model from a file.
pub fn load_model(path: &Path) -> Result<Model, AlsError> {
    let file = std::fs::File::open(path)?;
    load_model_from_reader(std::io::BufReader::new(file))
}

/// Non-empty trimmed lines with their 1-based line numbers.
struct ModelLines<L> {
    lines: L,
    line_num: usize,
}

impl<L: Iterator<Item = std::io::Result<String>>> ModelLines<L> {
    fn next_line(&mut self, what: &str) -> Result<(usize, String), AlsError> {
        loop {
            let line = self.lines.next().ok_or_else(|| {
                AlsError::ModelFormatError(format!("unexpected end of file in {}", what))
            })??;
            self.line_num += 1;
            let line = line.trim();
            if !line.is_empty() {
                return Ok((self.line_num, line.to_string()));
            }
        }
    }

    fn read_rows(&mut self, n: usize, n_factors: usize, what: &str) -> Result<DenseTable, AlsError> {
        if n.checked_mul(n_factors).is_none() {
            return Err(AlsError::ModelFormatError(format!(
                "{} of {} x {} factors is too large",
                what, n, n_factors
            )));
        }
        // grown row by row; the header sizes are not trusted for allocation
        let mut data = Vec::new();
        for _ in 0..n {
            let (num, line) = self.next_line(what)?;
            let row = line
                .split_whitespace()
                .map(|s| {
                    s.parse::<f64>().map_err(|_| {
                        AlsError::ModelFormatError(format!("line {}: invalid value: {}", num, s))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if row.len() != n_factors {
                return Err(AlsError::ModelFormatError(format!(
                    "line {}: expected {} factors, got {}",
                    num,
                    n_factors,
                    row.len()
                )));
            }
            data.extend(row);
        }
        DenseTable::from_vec(n, n_factors, data)
    }
}

/// Load a model from any buffered reader.
pub fn load_model_from_reader(reader: impl BufRead) -> Result<Model, AlsError> {
    let mut lines = ModelLines {
        lines: reader.lines(),
        line_num: 0,
    };

    let (mut n_factors, mut n_users, mut n_items) = (None, None, None);
    loop {
        let (num, line) = lines.next_line("header")?;
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };
        match cmd {
            "n_factors" => n_factors = Some(parse_single(&mut parts, num, "n_factors")?),
            "n_users" => n_users = Some(parse_single(&mut parts, num, "n_users")?),
            "n_items" => n_items = Some(parse_single(&mut parts, num, "n_items")?),
            "users" => break,
            _ => {
                return Err(AlsError::ModelFormatError(format!(
                    "line {}: unknown keyword: {}",
                    num, cmd
                )))
            }
        }
    }
    let missing = |name: &str| AlsError::ModelFormatError(format!("missing {} in header", name));
    let n_factors: usize = n_factors.ok_or_else(|| missing("n_factors"))?;
    let n_users: usize = n_users.ok_or_else(|| missing("n_users"))?;
    let n_items: usize = n_items.ok_or_else(|| missing("n_items"))?;
    if n_factors == 0 {
        return Err(AlsError::ModelFormatError("n_factors must be > 0".into()));
    }

    let users = lines.read_rows(n_users, n_factors, "users section")?;
    let (num, line) = lines.next_line("items marker")?;
    if line != "items" {
        return Err(AlsError::ModelFormatError(format!(
            "line {}: expected 'items', got: {}",
            num, line
        )));
    }
    let items = lines.read_rows(n_items, n_factors, "items section")?;
    Model::new(users, items)
}

fn parse_single<T: std::str::FromStr>(
    parts: &mut std::str::SplitWhitespace<'_>,
    line_num: usize,
    field: &str,
) -> Result<T, AlsError> {
    let val_str = parts.next().ok_or_else(|| {
        AlsError::ModelFormatError(format!("line {}: missing {} value", line_num, field))
    })?;
    val_str.parse().map_err(|_| {
        AlsError::ModelFormatError(format!(
            "line {}: invalid {} value: {}",
            line_num, field, val_str
        ))
    })
}

// ─── Dense tables ────────────────────────────────────────────────────

/// Write a dense table as rows of `%g` values.
pub fn save_dense_table(path: &Path, table: &DenseTable) -> Result<(), AlsError> {
    let file = std::fs::File::create(path)?;
    save_dense_table_to_writer(std::io::BufWriter::new(file), table)
}

/// Write a dense table to any writer.
pub fn save_dense_table_to_writer(mut w: impl Write, table: &DenseTable) -> Result<(), AlsError> {
    write_rows(&mut w, &table.to_row_major(), format_g)?;
    w.flush()?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────
