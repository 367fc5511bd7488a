//! Durable JSON stores: per-case filing sets, the two error logs, end-of-run
//! site state, and the seed case list. Formats match what prior runs wrote,
//! so a partial run can seed the next one.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::docket::DocketId;
use crate::error::ScrapeError;
use crate::extract::CaseFilingSet;

pub const ERRORED_CASES_FILE: &str = "errored_cases.json";
pub const ERROR_DETAILS_FILE: &str = "error_details.json";

/// One entry of the detailed error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub case_id: String,
    pub error: String,
    pub error_type: String,
}

/// All durable files live under one root directory.
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Ledger {
        Ledger { root: root.into() }
    }

    pub fn filing_path(&self, case: &str) -> PathBuf {
        self.root.join(format!("filing-{case}.json"))
    }

    /// Write a case's filing set, overwriting any previous file. Default name
    /// is `filing-<case>.json`; an explicit filename overrides it.
    pub fn save_filing_set(
        &self,
        set: &CaseFilingSet,
        filename: Option<&str>,
    ) -> Result<PathBuf, ScrapeError> {
        let path = match filename {
            Some(name) => self.root.join(name),
            None => self.filing_path(&set.case),
        };
        let json = serde_json::to_string(set)
            .map_err(|e| ScrapeError::PersistIo(format!("serialize {}: {e}", path.display())))?;
        fs::write(&path, json)
            .map_err(|e| ScrapeError::PersistIo(format!("write {}: {e}", path.display())))?;
        Ok(path)
    }

    /// Record a failed case in both error logs: the deduplicated case-id list
    /// and the append-only detail log. Each log is loaded, merged, and written
    /// back in full; a missing or corrupt log starts over empty. Failures
    /// here are fatal to the run.
    pub fn record_error(&self, case: &str, err: &ScrapeError) -> Result<()> {
        let mut cases = self.errored_cases();
        if !cases.iter().any(|c| c == case) {
            cases.push(case.to_string());
        }
        self.write_json(ERRORED_CASES_FILE, &cases)?;

        let mut details = self.error_details();
        details.push(ErrorDetail {
            case_id: case.to_string(),
            error: err.to_string(),
            error_type: err.kind().to_string(),
        });
        self.write_json(ERROR_DETAILS_FILE, &details)
    }

    pub fn errored_cases(&self) -> Vec<String> {
        self.read_json_or_default(ERRORED_CASES_FILE)
    }

    pub fn error_details(&self) -> Vec<ErrorDetail> {
        self.read_json_or_default(ERROR_DETAILS_FILE)
    }

    /// Serialize the full case-data map to one JSON file.
    pub fn save_site_state(
        &self,
        filename: &str,
        cases: &BTreeMap<String, CaseFilingSet>,
    ) -> Result<()> {
        self.write_json(filename, cases)
    }

    /// Load the seed case list, skipping the first `skip` entries. Entries
    /// that fail docket validation are dropped with a warning.
    pub fn load_case_list(&self, filename: &str, skip: usize) -> Result<Vec<DocketId>> {
        let path = self.root.join(filename);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("reading case list {}", path.display()))?;
        let raw: Vec<String> = serde_json::from_str(&json)
            .with_context(|| format!("parsing case list {}", path.display()))?;
        Ok(raw
            .into_iter()
            .skip(skip)
            .filter_map(|s| match s.parse::<DocketId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("dropping seed entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Write a bootstrap-scanned case list in the seed format.
    pub fn save_case_list(&self, filename: &str, cases: &[DocketId]) -> Result<()> {
        self.write_json(filename, cases)
    }

    fn write_json<T: Serialize + ?Sized>(&self, filename: &str, value: &T) -> Result<()> {
        let path = self.root.join(filename);
        let json = serde_json::to_string(value)
            .with_context(|| format!("serializing {}", path.display()))?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }

    fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(&self, filename: &str) -> T {
        let path = self.root.join(filename);
        match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }
}
