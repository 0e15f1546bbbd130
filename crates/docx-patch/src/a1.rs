//! A1 range formulas as found in chart `c:f` elements (`Sheet1!$B$2:$B$5`).
//!
//! Only single cells and contiguous one-dimensional ranges are understood. Everything else is
//! reported back as a reason string so the caller can record it and leave the formula alone.

const MAX_ROW: u32 = 1_048_576;
const MAX_COL: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellRef {
    /// 1-based column number.
    col: u32,
    /// 1-based row number.
    row: u32,
    col_abs: bool,
    row_abs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeFormula {
    /// Sheet qualifier including the trailing `!`, verbatim. Empty when unqualified.
    prefix: String,
    start: CellRef,
    end: CellRef,
    /// Written as a lone cell (`Sheet1!$B$1`) rather than a range.
    single: bool,
}

impl RangeFormula {
    pub fn parse(formula: &str) -> Result<Self, String> {
        let formula = formula.trim();
        let (prefix, rest) = split_sheet_prefix(formula)?;
        let (start, end, single) = match rest.split_once(':') {
            Some((start, end)) => (start, end, false),
            None => (rest, rest, true),
        };
        let start = parse_cell(start).ok_or_else(|| format!("invalid start cell in {formula:?}"))?;
        let end = parse_cell(end).ok_or_else(|| format!("invalid end cell in {formula:?}"))?;
        if end.row < start.row || end.col < start.col {
            return Err(format!("reversed range {formula:?}"));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            start,
            end,
            single,
        })
    }

    /// Number of cells, when the range is one row or one column.
    pub fn len(&self) -> Option<u32> {
        if self.start.col == self.end.col {
            Some(self.end.row - self.start.row + 1)
        } else if self.start.row == self.end.row {
            Some(self.end.col - self.start.col + 1)
        } else {
            None
        }
    }

    /// The same range grown or shrunk from its start so it holds exactly `n` cells.
    ///
    /// Column ranges (and single cells) move the end row; single-row ranges across columns move
    /// the end column.
    pub fn resized(&self, n: usize) -> Result<Self, String> {
        let n = u32::try_from(n)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("cannot size a range to {n} cells"))?;
        let mut out = self.clone();
        out.single = self.single && n == 1;
        if self.start.col == self.end.col {
            let row = self
                .start
                .row
                .checked_add(n - 1)
                .filter(|row| *row <= MAX_ROW)
                .ok_or_else(|| {
                    format!("{n} cells from row {} overflow the sheet", self.start.row)
                })?;
            out.end.row = row;
        } else if self.start.row == self.end.row {
            let col = self
                .start
                .col
                .checked_add(n - 1)
                .filter(|col| *col <= MAX_COL)
                .ok_or_else(|| {
                    format!("{n} cells from column {} overflow the sheet", self.start.col)
                })?;
            out.end.col = col;
        } else {
            return Err(format!("{} is a 2-D range", self));
        }
        Ok(out)
    }

    /// The same range moved `by` columns to the right.
    pub fn shifted_columns(&self, by: u32) -> Result<Self, String> {
        let mut out = self.clone();
        for cell in [&mut out.start, &mut out.end] {
            cell.col = cell
                .col
                .checked_add(by)
                .filter(|col| *col <= MAX_COL)
                .ok_or_else(|| format!("shifting {self} by {by} columns overflows the sheet"))?;
        }
        Ok(out)
    }
}

impl std::fmt::Display for RangeFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = self.prefix.clone();
        push_cell(&mut out, self.start);
        if !self.single {
            out.push(':');
            push_cell(&mut out, self.end);
        }
        f.write_str(&out)
    }
}

/// Rewrite `formula` so it covers exactly `n` cells.
pub(crate) fn resize_range(formula: &str, n: usize) -> Result<String, String> {
    Ok(RangeFormula::parse(formula)?.resized(n)?.to_string())
}

/// Move a range or single-cell `formula` `by` columns to the right.
pub(crate) fn shift_range_columns(formula: &str, by: u32) -> Result<String, String> {
    Ok(RangeFormula::parse(formula)?.shifted_columns(by)?.to_string())
}

fn split_sheet_prefix(formula: &str) -> Result<(&str, &str), String> {
    let bytes = formula.as_bytes();
    if bytes.first() == Some(&b'\'') {
        let mut i = 1usize;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    // Escaped quote in a sheet name.
                    i += 2;
                    continue;
                }
                if bytes.get(i + 1) != Some(&b'!') {
                    return Err(format!("expected ! after quoted sheet name in {formula:?}"));
                }
                return Ok((&formula[..i + 2], &formula[i + 2..]));
            }
            i += 1;
        }
        return Err(format!("unterminated quoted sheet name in {formula:?}"));
    }

    match formula.rfind('!') {
        Some(idx) => Ok((&formula[..=idx], &formula[idx + 1..])),
        None => Ok(("", formula)),
    }
}

fn parse_cell(s: &str) -> Option<CellRef> {
    let (col_abs, s) = match s.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let letters = s.bytes().take_while(u8::is_ascii_alphabetic).count();
    let col = column_number(&s[..letters])?;
    let s = &s[letters..];
    let (row_abs, digits) = match s.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row > MAX_ROW {
        return None;
    }
    Some(CellRef {
        col,
        row,
        col_abs,
        row_abs,
    })
}

fn push_cell(out: &mut String, cell: CellRef) {
    if cell.col_abs {
        out.push('$');
    }
    out.push_str(&column_letters(cell.col));
    if cell.row_abs {
        out.push('$');
    }
    out.push_str(&cell.row.to_string());
}

/// `"A"` -> 1, `"AB"` -> 28. Case-insensitive; `None` outside `A..=XFD`.
pub(crate) fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col = 0u32;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1);
    }
    (col <= MAX_COL).then_some(col)
}

/// 1 -> `"A"`, 28 -> `"AB"`.
pub(crate) fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn column_letters_round_trip_at_the_edges() {
        let edges = [
            (1, "A"),
            (26, "Z"),
            (27, "AA"),
            (702, "ZZ"),
            (703, "AAA"),
            (16_384, "XFD"),
        ];
        for (col, letters) in edges {
            assert_eq!(column_letters(col), letters);
            assert_eq!(column_number(letters), Some(col));
        }
        assert_eq!(column_number("xfd"), Some(16_384));
        assert_eq!(column_number("XFE"), None);
        assert_eq!(column_number(""), None);
    }

    #[test]
    fn column_ranges_move_the_end_row() {
        assert_eq!(resize_range("Sheet1!$B$2:$B$5", 2).unwrap(), "Sheet1!$B$2:$B$3");
        assert_eq!(resize_range("Sheet1!$B$2:$B$5", 6).unwrap(), "Sheet1!$B$2:$B$7");
        assert_eq!(resize_range("Sheet1!$B$2:$B$2", 1).unwrap(), "Sheet1!$B$2:$B$2");
        assert_eq!(resize_range("B2:B9", 3).unwrap(), "B2:B4");
    }

    #[test]
    fn single_cells_grow_into_column_ranges() {
        assert_eq!(resize_range("Sheet1!$B$2", 1).unwrap(), "Sheet1!$B$2");
        assert_eq!(resize_range("Sheet1!$B$2", 3).unwrap(), "Sheet1!$B$2:$B$4");
        assert_eq!(shift_range_columns("Sheet1!$B$1", 1).unwrap(), "Sheet1!$C$1");
    }

    #[test]
    fn single_row_ranges_move_the_end_column() {
        assert_eq!(resize_range("Sheet1!$B$1:$D$1", 5).unwrap(), "Sheet1!$B$1:$F$1");
        assert_eq!(resize_range("Sheet1!$Y$1:$Z$1", 3).unwrap(), "Sheet1!$Y$1:$AA$1");
    }

    #[test]
    fn quoted_sheet_names_are_kept_verbatim() {
        assert_eq!(
            resize_range("'Q1 ''Data''!'!$A$2:$A$4", 4).unwrap(),
            "'Q1 ''Data''!'!$A$2:$A$5"
        );
    }

    #[test]
    fn rejects_what_it_cannot_resize() {
        assert!(resize_range("Sheet1!$A$1:$B$2", 3).unwrap_err().contains("2-D"));
        assert!(resize_range("Sheet1!$A$1:$A$4", 0).is_err());
        assert!(resize_range("Sheet1!A1:", 3).is_err());
        assert!(resize_range("(Sheet1!$A$1:$A$3,Sheet1!$C$1:$C$3)", 3).is_err());
        assert!(resize_range("Sheet1!$A$5:$A$1", 3).is_err());
        assert!(resize_range("'unterminated!$A$1:$A$2", 3).is_err());
        assert!(resize_range("Sheet1!$A$1048575:$A$1048576", 3).is_err());
    }

    #[test]
    fn shifts_whole_range() {
        assert_eq!(shift_range_columns("Sheet1!$B$2:$B$5", 2).unwrap(), "Sheet1!$D$2:$D$5");
        assert_eq!(shift_range_columns("Sheet1!$Z$1:$Z$3", 1).unwrap(), "Sheet1!$AA$1:$AA$3");
        assert!(shift_range_columns("Sheet1!$XFD$1:$XFD$3", 1).is_err());
    }

    #[test]
    fn len_counts_one_dimensional_ranges() {
        assert_eq!(RangeFormula::parse("A2:A5").unwrap().len(), Some(4));
        assert_eq!(RangeFormula::parse("A1:C1").unwrap().len(), Some(3));
        assert_eq!(RangeFormula::parse("A1:C2").unwrap().len(), None);
    }
}
