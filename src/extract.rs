use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::docket::DocketId;
use crate::driver::{Element, Selector};
use crate::error::ScrapeError;

/// Fixed element id of the public-documents grid on a case page.
pub const FILINGS_TABLE_ID: &str = "tblPubDoc";

/// One row of a case's filings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRecord {
    pub serial: String,
    pub date_filed: String,
    pub doc_type: String,
    pub docket_id: String,
    pub name: String,
    pub url: String,
    pub organization: String,
    pub item_no: String,
    pub file_name: String,
}

/// All filings extracted from one case page, in rendered row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFilingSet {
    pub case: String,
    pub filings: Vec<FilingRecord>,
}

/// Extract every well-formed row of the filings table.
///
/// A single bad row is skipped with a warning; only a missing `tbody` fails
/// the table as a whole. `case` stamps `docket_id` on every record and `base`
/// resolves relative document hrefs.
pub fn extract_rows<E: Element>(
    table: &E,
    case: &DocketId,
    base: &Url,
) -> Result<Vec<FilingRecord>, ScrapeError> {
    let body = table
        .find_element(&Selector::tag("tbody"))
        .ok_or_else(|| ScrapeError::TableExtraction("filings table has no tbody".into()))?;
    let rows = body.find_elements(&Selector::tag("tr"));

    let mut filings = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        match extract_row(row, case, base) {
            Ok(filing) => filings.push(filing),
            Err(e) => warn!("skipping row {} of case {}: {}", idx, case, e),
        }
    }
    Ok(filings)
}

// Cell layout of the grid:
//   0 serial | 1 date filed | 2 doc type | 3 document link | 4 organization
//   5 item no | 6 file name
fn extract_row<E: Element>(
    row: &E,
    case: &DocketId,
    base: &Url,
) -> Result<FilingRecord, ScrapeError> {
    let cells = row.find_elements(&Selector::tag("td"));
    if cells.len() < 7 {
        return Err(ScrapeError::RowExtraction(format!(
            "expected 7 cells, found {}",
            cells.len()
        )));
    }

    let link = cells[3]
        .find_element(&Selector::tag("a"))
        .ok_or_else(|| ScrapeError::RowExtraction("link cell has no anchor".into()))?;
    let href = link
        .attr("href")
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| ScrapeError::RowExtraction("document anchor has no href".into()))?;
    let url = absolutize(&href, base)?;

    Ok(FilingRecord {
        serial: cells[0].text(),
        date_filed: cells[1].text(),
        doc_type: cells[2].text(),
        docket_id: case.to_string(),
        name: link.text(),
        url,
        organization: cells[4].text(),
        item_no: cells[5].text(),
        file_name: cells[6].text(),
    })
}

fn absolutize(href: &str, base: &Url) -> Result<String, ScrapeError> {
    match Url::parse(href) {
        Ok(abs) => Ok(abs.to_string()),
        Err(_) => base
            .join(href)
            .map(|u| u.to_string())
            .map_err(|e| ScrapeError::RowExtraction(format!("unresolvable href {href:?}: {e}"))),
    }
}
