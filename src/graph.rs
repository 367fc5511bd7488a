//! Crawl state machine: pages as nodes, one-way visitation lifecycle, and the
//! per-case extract → persist → verify → submit pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::Downstream;
use crate::docket::{docket_from_url, DocketId};
use crate::driver::{Driver, Element, Selector};
use crate::error::ScrapeError;
use crate::extract::{extract_rows, CaseFilingSet, FILINGS_TABLE_ID};
use crate::ledger::Ledger;

/// Overlay element shown while the case grid loads.
pub const LOADING_OVERLAY_ID: &str = "GridPlaceHolder_upUpdatePanelGrd";

const REQUEST_DELAY_SECS: u64 = 6;
const LOAD_POLL_ATTEMPTS: u32 = 60;
const LOAD_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Fixed delay before each navigation.
    pub request_delay: Duration,
    pub load_poll_interval: Duration,
    pub load_poll_attempts: u32,
}

impl Default for CrawlConfig {
    fn default() -> CrawlConfig {
        CrawlConfig {
            request_delay: Duration::from_secs(REQUEST_DELAY_SECS),
            load_poll_interval: Duration::from_millis(LOAD_POLL_INTERVAL_MS),
            load_poll_attempts: LOAD_POLL_ATTEMPTS,
        }
    }
}

/// Everything a page needs to do its work: the one driver session, the
/// downstream client, and the durable ledger. Owned for the lifetime of a
/// run, dropped (and with it the session) at run end.
pub struct CrawlContext<D: Driver, C: Downstream> {
    pub driver: D,
    pub client: C,
    pub ledger: Ledger,
    pub config: CrawlConfig,
}

/// How processing one page ended. Every variant leaves the page visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    AlreadyVisited,
    /// Case extracted, persisted, verified, and submitted; the set goes into
    /// the owning graph's case data.
    Extracted(CaseFilingSet),
    /// No usable docket id on the URL; nothing to extract.
    NoCase,
    /// Case failed; recorded in both error logs.
    Failed,
}

/// One visitable URL node.
#[derive(Debug)]
pub struct Page {
    pub url: String,
    pub visited: bool,
    pub links: BTreeSet<String>,
    pub assets: BTreeSet<String>,
}

impl Page {
    pub fn new(url: &str) -> Page {
        Page {
            url: url.to_string(),
            visited: false,
            links: BTreeSet::new(),
            assets: BTreeSet::new(),
        }
    }

    /// Load, wait, extract, hand off. Never fails for case-level reasons;
    /// the only errors that escape are driver session failures and error-log
    /// writes, both of which abort the run.
    pub async fn process<D: Driver, C: Downstream>(
        &mut self,
        ctx: &mut CrawlContext<D, C>,
    ) -> Result<PageOutcome> {
        if self.visited {
            return Ok(PageOutcome::AlreadyVisited);
        }

        tokio::time::sleep(ctx.config.request_delay).await;
        ctx.driver.navigate(&self.url).await?;

        if let Err(e) = wait_for_load(&ctx.driver, &self.url, &ctx.config).await {
            warn!("{}; extracting best-effort", e);
        }
        self.collect_references(&ctx.driver);

        let outcome = match docket_from_url(&self.url) {
            Ok(docket) => match run_case_pipeline(ctx, &docket, &self.url).await {
                Ok(set) => {
                    info!("case {}: {} filings extracted", docket, set.filings.len());
                    PageOutcome::Extracted(set)
                }
                Err(e) => {
                    warn!("case {} failed: {}", docket, e);
                    ctx.ledger.record_error(docket.as_str(), &e)?;
                    PageOutcome::Failed
                }
            },
            Err(e) => {
                debug!("{}: {}", self.url, e);
                PageOutcome::NoCase
            }
        };

        // Terminal state regardless of how processing went.
        self.visited = true;
        Ok(outcome)
    }

    fn collect_references<D: Driver>(&mut self, driver: &D) {
        for anchor in driver.find_elements(&Selector::tag("a")) {
            if let Some(href) = anchor.attr("href").filter(|h| !h.is_empty()) {
                self.links.insert(href);
            }
        }
        for img in driver.find_elements(&Selector::tag("img")) {
            if let Some(src) = img.attr("src").filter(|s| !s.is_empty()) {
                self.assets.insert(src);
            }
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page: {} visited: {} links: {} assets: {}",
            self.url,
            self.visited,
            self.links.len(),
            self.assets.len()
        )
    }
}

/// Poll until the loading overlay reports hidden. Timing out is not fatal:
/// the caller logs it and extracts whatever is there.
async fn wait_for_load<D: Driver>(
    driver: &D,
    url: &str,
    config: &CrawlConfig,
) -> Result<(), ScrapeError> {
    for _ in 0..config.load_poll_attempts {
        if overlay_cleared(driver) {
            return Ok(());
        }
        tokio::time::sleep(config.load_poll_interval).await;
    }
    Err(ScrapeError::LoadTimeout(url.to_string()))
}

fn overlay_cleared<D: Driver>(driver: &D) -> bool {
    match driver.find_element(&Selector::id(LOADING_OVERLAY_ID)) {
        // No overlay rendered at all counts as loaded.
        None => true,
        Some(el) => {
            let hidden_by_style = el
                .attr("style")
                .is_some_and(|s| s.to_ascii_lowercase().replace(' ', "").contains("display:none"));
            let hidden_by_aria = el.attr("aria-hidden").is_some_and(|v| v == "true");
            hidden_by_style || hidden_by_aria
        }
    }
}

/// Extract the filings table and run the combined persist/verify/submit
/// pipeline. Returns the filing set for the graph's case data on full success.
async fn run_case_pipeline<D: Driver, C: Downstream>(
    ctx: &CrawlContext<D, C>,
    docket: &DocketId,
    page_url: &str,
) -> Result<CaseFilingSet, ScrapeError> {
    let table = ctx
        .driver
        .find_element(&Selector::id(FILINGS_TABLE_ID))
        .ok_or_else(|| {
            ScrapeError::TableExtraction(format!("no #{FILINGS_TABLE_ID} table on {page_url}"))
        })?;
    let base = Url::parse(page_url)
        .map_err(|e| ScrapeError::TableExtraction(format!("bad page url {page_url:?}: {e}")))?;

    let filings = extract_rows(&table, docket, &base)?;
    let set = CaseFilingSet {
        case: docket.to_string(),
        filings,
    };
    save_verify_submit(&ctx.ledger, &ctx.client, &set, None).await?;
    Ok(set)
}

/// The three-step hand-off: persist the filing set, verify the docket
/// downstream, submit the filings. First failure aborts the rest; the
/// step-1 file is deliberately left on disk (no rollback).
pub async fn save_verify_submit<C: Downstream>(
    ledger: &Ledger,
    client: &C,
    set: &CaseFilingSet,
    filename: Option<&str>,
) -> Result<(), ScrapeError> {
    let docket: DocketId = set.case.parse()?;
    ledger.save_filing_set(set, filename)?;
    client.verify_docket(&docket).await?;
    client.submit_filings(&docket, &set.filings).await?;
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    pub total: usize,
    pub extracted: usize,
    pub no_case: usize,
    pub errored: usize,
    pub skipped: usize,
}

/// Owns every page node, keyed by URL, plus the aggregate case data.
#[derive(Default)]
pub struct SiteGraph {
    pages: BTreeMap<String, Page>,
    case_data: BTreeMap<String, CaseFilingSet>,
}

impl SiteGraph {
    pub fn new() -> SiteGraph {
        SiteGraph::default()
    }

    /// Insert a new unvisited page unless the URL is already known.
    /// First-seen wins. Returns whether a page was inserted.
    pub fn add_link(&mut self, url: &str) -> bool {
        if self.pages.contains_key(url) {
            return false;
        }
        debug!("adding page: {}", url);
        self.pages.insert(url.to_string(), Page::new(url));
        true
    }

    pub fn seed<I>(&mut self, urls: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for url in urls {
            self.add_link(url.as_ref());
        }
    }

    pub fn page(&self, url: &str) -> Option<&Page> {
        self.pages.get(url)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn add_case(&mut self, case: &str, data: CaseFilingSet) {
        self.case_data.insert(case.to_string(), data);
    }

    pub fn case_data(&self) -> &BTreeMap<String, CaseFilingSet> {
        &self.case_data
    }

    /// One full pass over all currently-known unvisited pages, strictly
    /// sequentially. Iterates a snapshot of the key set, so pages added while
    /// crawling are neither skipped silently nor an iteration hazard.
    pub async fn crawl<D: Driver, C: Downstream>(
        &mut self,
        ctx: &mut CrawlContext<D, C>,
    ) -> Result<CrawlStats> {
        let urls: Vec<String> = self.pages.keys().cloned().collect();

        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let mut stats = CrawlStats {
            total: urls.len(),
            ..CrawlStats::default()
        };
        for url in urls {
            let Some(page) = self.pages.get_mut(&url) else {
                continue;
            };
            let outcome = page.process(ctx).await?;
            debug!("{}", page);
            match outcome {
                PageOutcome::AlreadyVisited => stats.skipped += 1,
                PageOutcome::Extracted(set) => {
                    let case = set.case.clone();
                    self.add_case(&case, set);
                    stats.extracted += 1;
                }
                PageOutcome::NoCase => stats.no_case += 1,
                PageOutcome::Failed => stats.errored += 1,
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "crawl complete: {} pages ({} extracted, {} no-case, {} errored, {} skipped)",
            stats.total, stats.extracted, stats.no_case, stats.errored, stats.skipped
        );
        Ok(stats)
    }

    /// Persist the aggregate case-data map at end of run.
    pub fn save_site_state(&self, ledger: &Ledger, filename: &str) -> Result<()> {
        ledger.save_site_state(filename, &self.case_data)
    }
}
