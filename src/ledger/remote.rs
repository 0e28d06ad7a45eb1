//! Remote backend: a hosted spreadsheet driven over its REST API.
//!
//! The spreadsheet is addressed three ways, most-specific first: an explicit
//! URL from the config, a name search in the hosting service's file index,
//! and finally creation under the configured name. Whichever way wins, the
//! resolved document id is cached for the life of the process; resolution
//! failures are not cached, so a transient outage does not pin the backend
//! into a broken state.
//!
//! All ranges are worksheet-less A1 notation, which the service resolves to
//! the first worksheet. The ledger only ever uses one worksheet.

use super::{decode_entries, Storage};
use crate::config::LedgerConfig;
use crate::error::{Po2LedgerError, Result, StorageError};
use crate::record::{LedgerEntry, COLUMNS};
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";

/// Hosted-spreadsheet ledger backend.
pub struct RemoteLedger {
    config: LedgerConfig,
    client: reqwest::blocking::Client,
    spreadsheet_id: OnceLock<String>,
}

impl RemoteLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Po2LedgerError::Internal(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
            spreadsheet_id: OnceLock::new(),
        })
    }

    fn token(&self) -> std::result::Result<&str, StorageError> {
        self.config
            .remote_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StorageError::NotConfigured {
                reason: "no remote token configured".to_string(),
            })
    }

    /// Resolve and cache the spreadsheet id.
    fn spreadsheet_id(&self, token: &str) -> std::result::Result<String, StorageError> {
        if let Some(id) = self.spreadsheet_id.get() {
            return Ok(id.clone());
        }
        let id = self.resolve_spreadsheet_id(token)?;
        Ok(self.spreadsheet_id.get_or_init(|| id).clone())
    }

    fn resolve_spreadsheet_id(&self, token: &str) -> std::result::Result<String, StorageError> {
        if let Some(url) = &self.config.sheet_url {
            return extract_id_from_url(url).ok_or_else(|| StorageError::Malformed {
                message: format!("no document id found in '{url}'"),
            });
        }

        let name = &self.config.sheet_name;
        if let Some(id) = self.find_by_name(token, name)? {
            debug!("Found spreadsheet '{}' ({})", name, id);
            return Ok(id);
        }

        let id = self.create_spreadsheet(token, name)?;
        info!("Created spreadsheet '{}' ({})", name, id);
        self.share_with_admin(token, &id);
        Ok(id)
    }

    fn find_by_name(
        &self,
        token: &str,
        name: &str,
    ) -> std::result::Result<Option<String>, StorageError> {
        let query = format!(
            "name='{}' and mimeType='application/vnd.google-apps.spreadsheet' and trashed=false",
            name.replace('\'', "\\'")
        );
        let reply = self.execute(
            self.client
                .get(DRIVE_API)
                .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
                .bearer_auth(token),
        )?;

        Ok(reply
            .get("files")
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(|file| file.get("id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    fn create_spreadsheet(
        &self,
        token: &str,
        name: &str,
    ) -> std::result::Result<String, StorageError> {
        let reply = self.execute(
            self.client
                .post(SHEETS_API)
                .json(&json!({ "properties": { "title": name } }))
                .bearer_auth(token),
        )?;

        reply
            .get("spreadsheetId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| StorageError::Malformed {
                message: "create reply carried no spreadsheetId".to_string(),
            })
    }

    /// Grant the configured admin write access to a freshly created sheet.
    /// Best-effort, a sheet nobody can open in a browser still stores rows.
    fn share_with_admin(&self, token: &str, id: &str) {
        let Some(email) = self.config.admin_email.as_deref().filter(|e| !e.is_empty()) else {
            return;
        };
        let result = self.execute(
            self.client
                .post(format!("{DRIVE_API}/{id}/permissions"))
                .json(&json!({
                    "role": "writer",
                    "type": "user",
                    "emailAddress": email,
                }))
                .bearer_auth(token),
        );
        if let Err(e) = result {
            warn!("Sharing spreadsheet with '{}' failed: {}", email, e);
        }
    }

    /// True when the first worksheet has no content at all.
    fn sheet_is_empty(&self, token: &str, id: &str) -> std::result::Result<bool, StorageError> {
        let reply = self.execute(
            self.client
                .get(format!("{SHEETS_API}/{id}/values/A1:A1"))
                .bearer_auth(token),
        )?;
        Ok(reply
            .get("values")
            .and_then(Value::as_array)
            .is_none_or(|rows| rows.is_empty()))
    }

    fn execute(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> std::result::Result<Value, StorageError> {
        let response = request.send().map_err(|e| StorageError::Service {
            status: None,
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        let text = response.text().map_err(|e| StorageError::Service {
            status: Some(status.as_u16()),
            message: format!("reading reply body failed: {e}"),
        })?;

        if !status.is_success() {
            return Err(StorageError::Service {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), snippet(&text)),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StorageError::Malformed {
            message: format!("reply was not JSON: {e}"),
        })
    }
}

impl Storage for RemoteLedger {
    fn describe(&self) -> String {
        match &self.config.sheet_url {
            Some(url) => format!("hosted sheet at '{url}'"),
            None => format!("hosted sheet '{}'", self.config.sheet_name),
        }
    }

    fn append(&self, entries: &[LedgerEntry]) -> std::result::Result<(), StorageError> {
        let token = self.token()?;
        let id = self.spreadsheet_id(token)?;

        let mut values: Vec<Vec<String>> = Vec::with_capacity(entries.len() + 1);
        if self.sheet_is_empty(token, &id)? {
            values.push(COLUMNS.iter().map(|c| c.to_string()).collect());
        }
        values.extend(entries.iter().map(|entry| entry.to_cells().to_vec()));

        self.execute(
            self.client
                .post(format!(
                    "{SHEETS_API}/{id}/values/A1:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS"
                ))
                .json(&json!({ "values": values }))
                .bearer_auth(token),
        )?;
        Ok(())
    }

    fn load(&self) -> std::result::Result<Vec<LedgerEntry>, StorageError> {
        let token = self.token()?;
        let id = self.spreadsheet_id(token)?;

        let reply = self.execute(
            self.client
                .get(format!("{SHEETS_API}/{id}/values/A:K"))
                .bearer_auth(token),
        )?;

        let Some(rows) = reply.get("values").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut rows = rows.iter().map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_text).collect::<Vec<String>>())
                .unwrap_or_default()
        });

        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let records: Vec<Vec<String>> = rows.collect();
        Ok(decode_entries(&header, &records))
    }

    fn clear(&self) -> std::result::Result<(), StorageError> {
        let token = self.token()?;
        let id = self.spreadsheet_id(token)?;

        self.execute(
            self.client
                .post(format!("{SHEETS_API}/{id}/values/A:Z:clear"))
                .json(&json!({}))
                .bearer_auth(token),
        )?;
        Ok(())
    }
}

/// Pull the document id out of a spreadsheet URL (the segment after `/d/`).
fn extract_id_from_url(url: &str) -> Option<String> {
    let start = url.find("/d/")? + 3;
    let id: &str = url[start..]
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Cells arrive as strings under FORMATTED_VALUE rendering, but a sheet a
/// human re-typed a number into can surface bare JSON numbers.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First 200 characters of a reply body, for error messages.
fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 200 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(200).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FlatRow;

    #[test]
    fn url_id_extraction_handles_real_urls() {
        assert_eq!(
            extract_id_from_url(
                "https://docs.google.com/spreadsheets/d/1AbC-xyz_123/edit#gid=0"
            ),
            Some("1AbC-xyz_123".to_string())
        );
        assert_eq!(
            extract_id_from_url("https://docs.google.com/spreadsheets/d/1AbC?usp=sharing"),
            Some("1AbC".to_string())
        );
        assert_eq!(
            extract_id_from_url("https://docs.google.com/spreadsheets/d/1AbC"),
            Some("1AbC".to_string())
        );
        assert_eq!(extract_id_from_url("https://docs.google.com/spreadsheets/d/"), None);
        assert_eq!(extract_id_from_url("https://example.com/no-id-here"), None);
    }

    #[test]
    fn operations_without_a_token_report_not_configured() {
        let store = RemoteLedger::new(&LedgerConfig::default()).unwrap();
        let entry = LedgerEntry {
            row: FlatRow::default(),
            registered_at: String::new(),
        };

        for result in [
            store.append(std::slice::from_ref(&entry)).err(),
            store.load().err(),
            store.clear().err(),
        ] {
            assert!(
                matches!(result, Some(StorageError::NotConfigured { .. })),
                "got: {result:?}"
            );
        }
    }

    #[test]
    fn a_blank_token_is_the_same_as_no_token() {
        let config = LedgerConfig {
            remote_token: Some("   ".to_string()),
            ..LedgerConfig::default()
        };
        let store = RemoteLedger::new(&config).unwrap();
        assert!(matches!(
            store.load(),
            Err(StorageError::NotConfigured { .. })
        ));
    }

    #[test]
    fn describe_names_the_url_when_configured() {
        let by_name = RemoteLedger::new(&LedgerConfig::default()).unwrap();
        assert_eq!(by_name.describe(), "hosted sheet 'po_ledger'");

        let config = LedgerConfig {
            sheet_url: Some("https://docs.google.com/spreadsheets/d/1AbC".to_string()),
            ..LedgerConfig::default()
        };
        let by_url = RemoteLedger::new(&config).unwrap();
        assert!(by_url.describe().contains("/d/1AbC"));
    }

    #[test]
    fn cell_text_keeps_strings_and_stringifies_numbers() {
        assert_eq!(cell_text(&json!("OO건설")), "OO건설");
        assert_eq!(cell_text(&json!(10)), "10");
    }
}
