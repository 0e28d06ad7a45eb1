//! Record flattening: one structured record → ledger rows.
//!
//! Pure and infallible. Every absent field is already an empty string or
//! zero by the time the record decodes, so there is nothing left to fail on.

use crate::record::{FlatRow, LineItem, StructuredRecord};

/// Explode a record into one row per line item.
///
/// A record with no line items still produces exactly one row, with blank
/// item fields, so the document's header data (client, date, address) is
/// never silently dropped from the ledger.
///
/// Row order follows item order.
pub fn flatten_record(record: &StructuredRecord, filename: &str) -> Vec<FlatRow> {
    if record.items.is_empty() {
        return vec![row_for(record, filename, "", 0)];
    }

    record
        .items
        .iter()
        .map(|item| row_for(record, filename, &item_display(item), item.qty))
        .collect()
}

/// Merge name and spec into the single display column: `name[spec]` when a
/// spec is present, bare name otherwise.
fn item_display(item: &LineItem) -> String {
    if item.spec.is_empty() {
        item.item_name.clone()
    } else {
        format!("{}[{}]", item.item_name, item.spec)
    }
}

fn row_for(record: &StructuredRecord, filename: &str, item: &str, qty: i64) -> FlatRow {
    FlatRow {
        order_date: record.order_date.clone(),
        client_name: record.client_name.clone(),
        item_name_with_spec: item.to_string(),
        qty,
        consignee: record.consignee.clone(),
        phone_number: record.phone_number.clone(),
        address: record.address.clone(),
        payment_type: record.payment_type.clone(),
        remarks: record.remarks.clone(),
        filename: filename.to_string(),
    }
}
