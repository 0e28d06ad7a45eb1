//! Workbook export: ledger entries → multi-sheet xlsx bytes.
//!
//! One sheet carries the full history in the given order; every calendar
//! month that appears in the data gets its own additional sheet. Entries
//! whose order date does not parse appear on the full sheet only.
//!
//! Column widths are sized from content. Excel's auto-fit is a GUI feature,
//! not a file-format feature, so the file has to carry explicit widths; a
//! Hangul glyph renders roughly twice as wide as an ASCII one, which is why
//! width counting is double-byte aware.

use crate::error::{Po2LedgerError, Result};
use crate::record::{LedgerEntry, COLUMNS};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Name of the sheet holding every entry.
pub const FULL_SHEET_NAME: &str = "전체내역";

/// `수량` lives here and is written as a number so spreadsheet sums work.
const QTY_COL: usize = 3;

const HEADER_FILL: u32 = 0x4472C4;

/// Build the export workbook and return the serialized xlsx bytes.
pub fn build_workbook(entries: &[LedgerEntry]) -> Result<Vec<u8>> {
    let mut workbook = assemble_workbook(entries)?;
    let bytes = workbook.save_to_buffer()?;
    debug!("Workbook built: {} entries, {} bytes", entries.len(), bytes.len());
    Ok(bytes)
}

/// Assemble the sheets: the full history first, then one tab per month.
///
/// An empty ledger still yields a valid workbook: one bare sheet named
/// [`FULL_SHEET_NAME`] with no header row, so "export before first ingest"
/// opens cleanly instead of erroring.
fn assemble_workbook(entries: &[LedgerEntry]) -> Result<Workbook> {
    let mut workbook = Workbook::new();

    if entries.is_empty() {
        workbook.add_worksheet().set_name(FULL_SHEET_NAME)?;
        return Ok(workbook);
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(FULL_SHEET_NAME)?;
    write_sheet(sheet, entries)?;

    // BTreeMap iteration gives chronologically sorted month tabs.
    for (month, month_entries) in group_by_month(entries) {
        let tab_name = format!("{month}월");
        let sheet = workbook.add_worksheet();
        sheet.set_name(tab_name.as_str())?;
        write_sheet(sheet, &month_entries)?;
    }

    Ok(workbook)
}

/// Build the workbook and write it to `path`.
pub fn write_workbook(path: impl AsRef<Path>, entries: &[LedgerEntry]) -> Result<()> {
    let path = path.as_ref();
    let bytes = build_workbook(entries)?;
    std::fs::write(path, &bytes).map_err(|source| Po2LedgerError::ReportWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Bucket entries by `YYYY-MM` of their order date, skipping entries whose
/// date does not parse.
fn group_by_month(entries: &[LedgerEntry]) -> BTreeMap<String, Vec<LedgerEntry>> {
    let mut months: BTreeMap<String, Vec<LedgerEntry>> = BTreeMap::new();
    for entry in entries {
        if let Some(day) = entry.order_day() {
            months
                .entry(day.format("%Y-%m").to_string())
                .or_default()
                .push(entry.clone());
        }
    }
    months
}

fn write_sheet(sheet: &mut Worksheet, entries: &[LedgerEntry]) -> Result<()> {
    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_font_color(Color::RGB(0xFFFFFF));

    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &header_format)?;
    }

    let rows: Vec<[String; 11]> = entries.iter().map(LedgerEntry::to_cells).collect();

    for (col, name) in COLUMNS.iter().enumerate() {
        let widest = std::iter::once(display_width(name))
            .chain(rows.iter().map(|cells| display_width(&cells[col])))
            .max()
            .unwrap_or(0);
        sheet.set_column_width(col as u16, column_width(widest))?;
    }

    for (r, cells) in rows.iter().enumerate() {
        let row = (r + 1) as u32;
        for (col, cell) in cells.iter().enumerate() {
            if col == QTY_COL {
                sheet.write_number(row, col as u16, entries[r].row.qty as f64)?;
            } else {
                sheet.write_string(row, col as u16, cell.as_str())?;
            }
        }
    }

    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

/// Display width of a cell: ASCII counts 1, everything else (Hangul,
/// full-width punctuation) counts 2.
fn display_width(text: &str) -> usize {
    text.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

/// Content width → column width: pad by 2, scale by 1.1, clamp to 10..=100.
fn column_width(widest: usize) -> f64 {
    ((widest + 2) as f64 * 1.1).clamp(10.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FlatRow;

    fn entry(date: &str, client: &str) -> LedgerEntry {
        LedgerEntry {
            row: FlatRow {
                order_date: date.to_string(),
                client_name: client.to_string(),
                item_name_with_spec: "단열재[50T]".to_string(),
                qty: 10,
                consignee: "홍길동".to_string(),
                phone_number: "010-1234-5678".to_string(),
                address: "서울시".to_string(),
                payment_type: "월말결제".to_string(),
                remarks: String::new(),
                filename: "a.pdf".to_string(),
            },
            registered_at: "2024-06-01 09:00:00".to_string(),
        }
    }

    fn sheet_names(workbook: &mut Workbook) -> Vec<String> {
        workbook
            .worksheets_mut()
            .iter()
            .map(|sheet| sheet.name())
            .collect()
    }

    #[test]
    fn months_are_grouped_ascending_and_skip_bad_dates() {
        let entries = vec![
            entry("2024-06-02", "B"),
            entry("2024-05-20", "A"),
            entry("날짜없음", "C"),
            entry("2024-06-15", "D"),
        ];
        let months = group_by_month(&entries);
        assert_eq!(
            months.keys().cloned().collect::<Vec<_>>(),
            vec!["2024-05", "2024-06"]
        );
        assert_eq!(months["2024-05"].len(), 1);
        assert_eq!(months["2024-06"].len(), 2);
    }

    #[test]
    fn display_width_doubles_non_ascii() {
        assert_eq!(display_width("abc"), 3);
        assert_eq!(display_width("가나다"), 6);
        assert_eq!(display_width("a가1"), 4);
        assert_eq!(display_width(""), 0);
    }

    #[test]
    fn column_width_pads_scales_and_clamps() {
        assert_eq!(column_width(0), 10.0);
        assert_eq!(column_width(3), 10.0);
        assert!((column_width(20) - 24.2).abs() < 1e-9);
        assert_eq!(column_width(500), 100.0);
    }

    #[test]
    fn workbook_bytes_are_a_zip_archive() {
        let entries = vec![entry("2024-05-20", "A"), entry("2024-06-02", "B")];
        let bytes = build_workbook(&entries).unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[test]
    fn entries_spanning_two_months_get_a_full_sheet_plus_one_tab_each() {
        let entries = vec![
            entry("2024-05-20", "A"),
            entry("2024-06-02", "B"),
            entry("2024-06-15", "C"),
        ];
        let mut workbook = assemble_workbook(&entries).unwrap();
        assert_eq!(
            sheet_names(&mut workbook),
            vec!["전체내역", "2024-05월", "2024-06월"]
        );
    }

    #[test]
    fn empty_ledger_still_exports_a_valid_workbook() {
        let bytes = build_workbook(&[]).unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");

        let mut workbook = assemble_workbook(&[]).unwrap();
        assert_eq!(sheet_names(&mut workbook), vec![FULL_SHEET_NAME]);
    }

    #[test]
    fn unparseable_dates_only_reach_the_full_sheet() {
        // A bad-dated entry lands on no month, so no month tab is created.
        let only_bad = vec![entry("미상", "A")];
        assert!(group_by_month(&only_bad).is_empty());
        let mut workbook = assemble_workbook(&only_bad).unwrap();
        assert_eq!(sheet_names(&mut workbook), vec![FULL_SHEET_NAME]);
    }
}
