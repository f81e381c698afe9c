use crate::models::LedgerEntry;
use chrono::{Timelike, Utc};
use chrono_tz::Tz;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed column header of the trade ledger
pub const LEDGER_HEADER: [&str; 7] = [
    "Timestamp",
    "CA",
    "Type",
    "Amount (SOL)",
    "Amount (Token)",
    "Price",
    "Remaining Balance (SOL)",
];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ledger CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only CSV trade ledger
///
/// Every BUY/SELL is appended as one row and synced to disk before `append`
/// returns. The file is never rewritten, so reading it back from the top
/// reproduces the exact commit order.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    timezone: Tz,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            path: path.into(),
            timezone,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current wall-clock in the ledger's zone, truncated to seconds
    pub fn now(&self) -> chrono::NaiveDateTime {
        let local = Utc::now().with_timezone(&self.timezone).naive_local();
        local.with_nanosecond(0).unwrap_or(local)
    }

    /// Create the file with its header if it is missing or empty
    pub fn initialize(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if file.metadata()?.len() == 0 {
            let mut writer = csv::Writer::from_writer(&file);
            writer.write_record(LEDGER_HEADER)?;
            writer.flush()?;
            drop(writer);
            file.sync_all()?;
            tracing::info!("Created trade ledger at {}", self.path.display());
        }

        Ok(())
    }

    /// Durably append one entry
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.initialize()?;

        let mut file = OpenOptions::new().append(true).open(&self.path)?;

        // Serialize the whole row first so it lands in a single write
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(entry.to_record())?;
        let row = writer
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        file.write_all(&row)?;
        file.flush()?;
        file.sync_data()?;

        tracing::info!("[LEDGER] {} {} logged", entry.side, entry.asset_id);
        Ok(())
    }

    /// Read every well-formed entry in file order
    ///
    /// Each call reopens the file, so the returned iterator can be restarted
    /// by calling this again. A missing file reads as empty. Quoting is off
    /// so a stray `"` only loses its own row.
    pub fn read_all(&self) -> Result<LedgerEntries, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(f) => Some(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let records = file.map(|f| {
            csv::ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .quoting(false)
                .from_reader(f)
                .into_records()
        });

        Ok(LedgerEntries { records })
    }
}

/// Lazy iterator over ledger rows that skips anything malformed
pub struct LedgerEntries {
    records: Option<csv::StringRecordsIntoIter<File>>,
}

impl Iterator for LedgerEntries {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<LedgerEntry> {
        let records = self.records.as_mut()?;

        loop {
            match records.next()? {
                Ok(record) => {
                    if record.iter().all(|field| field.trim().is_empty()) {
                        continue;
                    }
                    match LedgerEntry::from_record(&record) {
                        Some(entry) => return Some(entry),
                        None => {
                            let line = record.position().map(|p| p.line()).unwrap_or(0);
                            tracing::warn!(
                                "Skipping malformed ledger row at line {}: {:?}",
                                line,
                                record
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable ledger row: {}", e);
                }
            }
        }
    }
}
