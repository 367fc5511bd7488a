//! Crawler for the NYPUC case-management site: discovers case pages, extracts
//! each case's filings table, checkpoints crawl and error state to JSON, and
//! hands extracted records to the downstream verification + ingestion API.

pub mod client;
pub mod docket;
pub mod driver;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ledger;
