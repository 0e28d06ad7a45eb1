//! Shared data model: documents in, structured records out, ledger rows
//! persisted.
//!
//! The model reply is decoded with a deliberately forgiving schema: every
//! field carries `#[serde(default)]`, unknown fields are ignored, and `qty`
//! accepts integers, floats, and numeric strings. A reply that is a JSON
//! object always decodes; field-level garbage degrades to empty strings and
//! zero quantities instead of failing the document.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Canonical column order for persisted and exported rows.
///
/// The first ten columns mirror [`FlatRow`]; `등록일시` is stamped by the
/// ledger at append time.
pub const COLUMNS: [&str; 11] = [
    "일자",
    "거래처명",
    "품목명(규격)",
    "수량",
    "수화주",
    "전화번호",
    "주소지",
    "지불유형",
    "비고",
    "파일명",
    "등록일시",
];

/// One uploaded scan: raw bytes plus the name it arrived under.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl SourceDocument {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
        }
    }

    /// Read a document from disk, taking the filename from the path.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { bytes, filename })
    }
}

/// The header + line-items shape extracted from one document.
///
/// Produced exactly once per document by a successful extraction call.
/// `used_model` is not part of the model reply; the extraction client stamps
/// it with whichever model variant produced the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredRecord {
    #[serde(default)]
    pub order_date: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub consignee: String,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub used_model: String,
}

/// One ordered line item within a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub item_name: String,
    /// Optional size/grade specification; empty means absent.
    #[serde(default)]
    pub spec: String,
    #[serde(default, deserialize_with = "lenient_qty")]
    pub qty: i64,
}

/// Accept `10`, `10.0`, `"10"`, and null; anything else decodes to 0.
fn lenient_qty<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    })
}

/// One exportable/persistable table row derived from a [`StructuredRecord`].
///
/// Field order matches the first ten entries of [`COLUMNS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub order_date: String,
    pub client_name: String,
    /// `"{item_name}[{spec}]"` when spec is non-empty, else `item_name`.
    pub item_name_with_spec: String,
    pub qty: i64,
    pub consignee: String,
    pub phone_number: String,
    pub address: String,
    pub payment_type: String,
    pub remarks: String,
    pub filename: String,
}

/// A [`FlatRow`] plus the ledger-assigned registration timestamp.
///
/// `registered_at` is set at write time by the ledger, never by the caller,
/// and is formatted `%Y-%m-%d %H:%M:%S` so it sorts lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub row: FlatRow,
    pub registered_at: String,
}

impl LedgerEntry {
    /// The entry's `order_date` parsed as a calendar day, if it parses.
    ///
    /// Entries whose date does not parse never match any range filter and
    /// never join a month sheet, but stay visible in unfiltered loads.
    pub fn order_day(&self) -> Option<NaiveDate> {
        parse_order_day(&self.row.order_date)
    }

    /// Cells in [`COLUMNS`] order.
    pub fn to_cells(&self) -> [String; 11] {
        [
            self.row.order_date.clone(),
            self.row.client_name.clone(),
            self.row.item_name_with_spec.clone(),
            self.row.qty.to_string(),
            self.row.consignee.clone(),
            self.row.phone_number.clone(),
            self.row.address.clone(),
            self.row.payment_type.clone(),
            self.row.remarks.clone(),
            self.row.filename.clone(),
            self.registered_at.clone(),
        ]
    }
}

/// Inclusive calendar-day window used to filter ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Parse an order date as written on scans: `2024-05-20`, `2024.05.20`,
/// `2024/05/20`, or a datetime starting with the dashed form.
pub fn parse_order_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for format in ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"] {
        if let Ok(day) = NaiveDate::parse_from_str(text, format) {
            return Some(day);
        }
    }
    // Datetime stamps like "2024-05-20 11:32:05" keep their date prefix.
    // get() rather than a byte slice: Korean date forms put a multi-byte
    // character across the 10-byte boundary.
    if let Some(prefix) = text.get(..10) {
        if let Ok(day) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(day);
        }
    }
    None
}
