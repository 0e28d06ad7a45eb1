//! Append-only, dual-backend ledger of extracted order rows.
//!
//! Every append goes to two places: a hosted spreadsheet ([`RemoteLedger`],
//! the primary, shared with the back office) and a local CSV file
//! ([`LocalLedger`], the fallback that works offline). The backends are
//! written independently; losing one degrades the ledger, losing both loses
//! the rows and only that case is an error.
//!
//! ## Why a status receipt instead of an error?
//!
//! Remote unavailability is the normal Tuesday state of this system: the
//! token expired, the office network is down, the quota ran out. Treating it
//! as an exception would abort batches that the local CSV is perfectly able
//! to absorb. So `append` and `reset` return receipts describing what each
//! backend did, and callers decide how loudly to complain.
//!
//! All methods are synchronous and may block on network or file I/O; drive
//! them from async code via `tokio::task::spawn_blocking`.

mod local;
mod remote;

pub use local::LocalLedger;
pub use remote::RemoteLedger;

use crate::config::LedgerConfig;
use crate::error::{Po2LedgerError, Result, StorageError};
use crate::record::{DateRange, FlatRow, LedgerEntry, COLUMNS};
use chrono::Local;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// One ledger backend: a named place rows can be appended to, loaded from,
/// and cleared.
pub trait Storage {
    /// Human-readable backend name for receipts and logs.
    fn describe(&self) -> String;

    /// Append entries after any existing rows.
    fn append(&self, entries: &[LedgerEntry]) -> std::result::Result<(), StorageError>;

    /// Load every stored entry, oldest first.
    fn load(&self) -> std::result::Result<Vec<LedgerEntry>, StorageError>;

    /// Remove all stored rows.
    fn clear(&self) -> std::result::Result<(), StorageError>;
}

/// What one backend did with an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// The backend persisted (or cleared) the data.
    Ok,
    /// The backend is not configured and was not attempted.
    Skipped(String),
    /// The backend was attempted and failed.
    Failed(String),
}

impl BackendStatus {
    /// True only when data actually reached the backend.
    pub fn persisted(&self) -> bool {
        matches!(self, BackendStatus::Ok)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Ok => f.write_str("ok"),
            BackendStatus::Skipped(reason) => write!(f, "skipped: {reason}"),
            BackendStatus::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Receipt for one `append` call.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    /// Rows handed to the backends.
    pub appended: usize,
    pub remote: BackendStatus,
    pub local: BackendStatus,
}

impl AppendReceipt {
    /// True when at least one backend holds the rows.
    pub fn any_persisted(&self) -> bool {
        self.remote.persisted() || self.local.persisted()
    }

    /// True when the rows are safe but one backend missed them.
    pub fn degraded(&self) -> bool {
        self.any_persisted() && !(self.remote.persisted() && self.local.persisted())
    }
}

/// Receipt for one `reset` call.
#[derive(Debug, Clone)]
pub struct ResetReceipt {
    pub remote: BackendStatus,
    pub local: BackendStatus,
}

/// Which backend answered a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    /// Neither backend was reachable; the snapshot is empty.
    Neither,
}

/// Entries plus where they came from.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub entries: Vec<LedgerEntry>,
    pub source: LoadSource,
}

/// The dual-backend ledger.
///
/// Generic over its backends so the dual-write rules are testable with
/// in-memory stores; production code uses [`DualWriteLedger::open`] which
/// wires up [`RemoteLedger`] and [`LocalLedger`] from a [`LedgerConfig`].
pub struct DualWriteLedger<R = RemoteLedger, L = LocalLedger> {
    remote: R,
    local: L,
}

impl DualWriteLedger<RemoteLedger, LocalLedger> {
    /// Open the production ledger described by `config`.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(
            RemoteLedger::new(config)?,
            LocalLedger::new(&config.local_path),
        ))
    }
}

impl<R: Storage, L: Storage> DualWriteLedger<R, L> {
    pub fn new(remote: R, local: L) -> Self {
        Self { remote, local }
    }

    /// Stamp rows with one shared `registered_at` and write them to both
    /// backends.
    ///
    /// Each backend is attempted unconditionally; one failing never blocks
    /// or rolls back the other. Errors only when no backend persisted the
    /// rows, because then the data is gone.
    pub fn append(&self, rows: &[FlatRow]) -> Result<AppendReceipt> {
        if rows.is_empty() {
            let skipped = BackendStatus::Skipped("no rows to append".to_string());
            return Ok(AppendReceipt {
                appended: 0,
                remote: skipped.clone(),
                local: skipped,
            });
        }

        // One timestamp per call: every row of a batch shares it, and the
        // format sorts lexicographically.
        let registered_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let entries: Vec<LedgerEntry> = rows
            .iter()
            .map(|row| LedgerEntry {
                row: row.clone(),
                registered_at: registered_at.clone(),
            })
            .collect();

        let receipt = AppendReceipt {
            appended: rows.len(),
            remote: append_status(&self.remote, &entries),
            local: append_status(&self.local, &entries),
        };

        if !receipt.any_persisted() {
            return Err(Po2LedgerError::AppendLost {
                rows: rows.len(),
                remote: receipt.remote.to_string(),
                local: receipt.local.to_string(),
            });
        }
        Ok(receipt)
    }

    /// Load every entry, preferring the remote store.
    ///
    /// A reachable-but-empty remote wins over a populated local file; the
    /// remote is the shared source of truth and an empty answer from it is
    /// an answer. Local is consulted only when the remote cannot be read at
    /// all. With neither reachable the snapshot is empty.
    pub fn load_all(&self) -> LedgerSnapshot {
        match self.remote.load() {
            Ok(entries) => {
                debug!("Loaded {} entries from {}", entries.len(), self.remote.describe());
                return LedgerSnapshot {
                    entries,
                    source: LoadSource::Remote,
                };
            }
            Err(StorageError::NotConfigured { reason }) => {
                info!("{} not configured ({}), using local store", self.remote.describe(), reason);
            }
            Err(e) => {
                warn!("{} unreadable ({}), using local store", self.remote.describe(), e);
            }
        }

        match self.local.load() {
            Ok(entries) => {
                debug!("Loaded {} entries from {}", entries.len(), self.local.describe());
                LedgerSnapshot {
                    entries,
                    source: LoadSource::Local,
                }
            }
            Err(e) => {
                warn!("{} unreadable ({}), ledger is empty", self.local.describe(), e);
                LedgerSnapshot {
                    entries: Vec::new(),
                    source: LoadSource::Neither,
                }
            }
        }
    }

    /// Load entries whose order date falls inside `range`, both ends
    /// inclusive. Entries whose date cannot be parsed never match a range.
    pub fn load_range(&self, range: &DateRange) -> LedgerSnapshot {
        let mut snapshot = self.load_all();
        snapshot
            .entries
            .retain(|entry| entry.order_day().is_some_and(|day| range.contains(day)));
        snapshot
    }

    /// Clear both backends, best-effort. A failure on one never prevents
    /// attempting the other.
    pub fn reset(&self) -> ResetReceipt {
        ResetReceipt {
            remote: clear_status(&self.remote),
            local: clear_status(&self.local),
        }
    }
}

fn append_status<S: Storage>(store: &S, entries: &[LedgerEntry]) -> BackendStatus {
    match store.append(entries) {
        Ok(()) => {
            debug!("Appended {} row(s) to {}", entries.len(), store.describe());
            BackendStatus::Ok
        }
        Err(StorageError::NotConfigured { reason }) => {
            info!("Skipping {}: {}", store.describe(), reason);
            BackendStatus::Skipped(reason)
        }
        Err(e) => {
            warn!("Append to {} failed: {}", store.describe(), e);
            BackendStatus::Failed(e.to_string())
        }
    }
}

fn clear_status<S: Storage>(store: &S) -> BackendStatus {
    match store.clear() {
        Ok(()) => {
            info!("Cleared {}", store.describe());
            BackendStatus::Ok
        }
        Err(StorageError::NotConfigured { reason }) => {
            info!("Skipping {}: {}", store.describe(), reason);
            BackendStatus::Skipped(reason)
        }
        Err(e) => {
            warn!("Clear of {} failed: {}", store.describe(), e);
            BackendStatus::Failed(e.to_string())
        }
    }
}

/// Decode tabular cells into entries by header name.
///
/// Both backends store the same 11 columns but neither guarantees order
/// after a human has touched the sheet, so cells are looked up by header
/// text. Missing columns read as empty, unparseable quantities as zero.
pub(crate) fn decode_entries(header: &[String], records: &[Vec<String>]) -> Vec<LedgerEntry> {
    let index: HashMap<&str, usize> = header
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect();
    let cell = |cells: &[String], name: &str| -> String {
        index
            .get(name)
            .and_then(|&i| cells.get(i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    records
        .iter()
        .map(|cells| LedgerEntry {
            row: FlatRow {
                order_date: cell(cells, COLUMNS[0]),
                client_name: cell(cells, COLUMNS[1]),
                item_name_with_spec: cell(cells, COLUMNS[2]),
                qty: parse_qty(&cell(cells, COLUMNS[3])),
                consignee: cell(cells, COLUMNS[4]),
                phone_number: cell(cells, COLUMNS[5]),
                address: cell(cells, COLUMNS[6]),
                payment_type: cell(cells, COLUMNS[7]),
                remarks: cell(cells, COLUMNS[8]),
                filename: cell(cells, COLUMNS[9]),
            },
            registered_at: cell(cells, COLUMNS[10]),
        })
        .collect()
}

fn parse_qty(text: &str) -> i64 {
    if let Ok(n) = text.parse::<i64>() {
        return n;
    }
    text.parse::<f64>().map(|f| f as i64).unwrap_or(0)
}
