//! Browser-automation boundary.
//!
//! The crawl core only ever talks to [`Driver`] and [`Element`], so the thing
//! that loads pages is swappable. The production [`HttpDriver`] does a plain
//! GET and parses the response into a lenient DOM; the case site renders its
//! grid server-side inside the response, which is good enough for extraction,
//! and anything smarter (a real WebDriver session) plugs in behind the same
//! trait.

use std::rc::Rc;

use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info, warn};

/// Element lookup, selenium-shaped: by id, by class, or by tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Class(String),
    Tag(String),
}

impl Selector {
    pub fn id(v: &str) -> Selector {
        Selector::Id(v.to_string())
    }

    pub fn tag(v: &str) -> Selector {
        Selector::Tag(v.to_string())
    }

    fn matches(&self, node: &NodeData) -> bool {
        match self {
            Selector::Id(id) => node.attr("id").is_some_and(|v| v == *id),
            Selector::Class(class) => node
                .attr("class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class)),
            Selector::Tag(tag) => node.tag.eq_ignore_ascii_case(tag),
        }
    }
}

/// A handle onto one rendered element.
pub trait Element: Clone {
    /// Visible text of this element and its descendants.
    fn text(&self) -> String;
    /// Attribute value, if present.
    fn attr(&self, name: &str) -> Option<String>;
    /// First matching descendant.
    fn find_element(&self, selector: &Selector) -> Option<Self>;
    /// All matching descendants, document order.
    fn find_elements(&self, selector: &Selector) -> Vec<Self>;
}

/// One page-loading session. Exactly one page is "current" at a time.
#[allow(async_fn_in_trait)]
pub trait Driver {
    type Elem: Element;

    /// Load `url` and make it the current page. Failures here are session
    /// failures and abort the run; an HTTP error status is not a navigation
    /// failure, the error page is still the current page.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// First matching element on the current page.
    fn find_element(&self, selector: &Selector) -> Option<Self::Elem>;

    /// All matching elements on the current page, document order.
    fn find_elements(&self, selector: &Selector) -> Vec<Self::Elem>;
}

// ── Lenient DOM ──

#[derive(Debug)]
enum NodeChild {
    Text(String),
    Elem(Rc<NodeData>),
}

#[derive(Debug)]
struct NodeData {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<NodeChild>,
}

impl NodeData {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed element; cheap to clone, shares the underlying tree.
#[derive(Debug, Clone)]
pub struct HtmlElement(Rc<NodeData>);

impl HtmlElement {
    fn collect(&self, selector: &Selector, first_only: bool, out: &mut Vec<HtmlElement>) {
        for child in &self.0.children {
            if let NodeChild::Elem(node) = child {
                if selector.matches(node) {
                    out.push(HtmlElement(Rc::clone(node)));
                    if first_only {
                        return;
                    }
                }
                HtmlElement(Rc::clone(node)).collect(selector, first_only, out);
                if first_only && !out.is_empty() {
                    return;
                }
            }
        }
    }
}

impl Element for HtmlElement {
    fn text(&self) -> String {
        fn walk(node: &NodeData, out: &mut String) {
            for child in &node.children {
                match child {
                    NodeChild::Text(t) => {
                        if !out.is_empty() && !out.ends_with(' ') {
                            out.push(' ');
                        }
                        out.push_str(t);
                    }
                    NodeChild::Elem(e) => walk(e, out),
                }
            }
        }
        let mut out = String::new();
        walk(&self.0, &mut out);
        out.trim().to_string()
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.0.attr(name).map(str::to_string)
    }

    fn find_element(&self, selector: &Selector) -> Option<HtmlElement> {
        let mut out = Vec::with_capacity(1);
        self.collect(selector, true, &mut out);
        out.pop()
    }

    fn find_elements(&self, selector: &Selector) -> Vec<HtmlElement> {
        let mut out = Vec::new();
        self.collect(selector, false, &mut out);
        out
    }
}

// Elements that never carry a closing tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

struct BuildNode {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<NodeChild>,
}

impl BuildNode {
    fn new(tag: String, attrs: Vec<(String, String)>) -> BuildNode {
        BuildNode {
            tag,
            attrs,
            children: Vec::new(),
        }
    }

    fn freeze(self) -> Rc<NodeData> {
        Rc::new(NodeData {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        })
    }
}

fn read_attrs(e: &quick_xml::events::BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect()
}

/// Parse real-world HTML into a navigable tree. Best-effort: unmatched end
/// tags are dropped, void elements close themselves, and a malformed tail
/// truncates the document instead of failing it.
pub fn parse_document(html: &str) -> HtmlElement {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    // Stack bottom is a synthetic document node.
    let mut stack = vec![BuildNode::new("#document".into(), Vec::new())];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                let attrs = read_attrs(&e);
                if VOID_TAGS.contains(&tag.as_str()) {
                    let node = BuildNode::new(tag, attrs).freeze();
                    stack.last_mut().unwrap().children.push(NodeChild::Elem(node));
                } else {
                    stack.push(BuildNode::new(tag, attrs));
                }
            }
            Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                let node = BuildNode::new(tag, read_attrs(&e)).freeze();
                stack.last_mut().unwrap().children.push(NodeChild::Elem(node));
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                // Close the nearest open element with this tag; anything above
                // it was left unclosed and folds into its parent.
                if let Some(open_at) = stack.iter().rposition(|n| n.tag == tag) {
                    if open_at > 0 {
                        while stack.len() > open_at {
                            let done = stack.pop().unwrap().freeze();
                            stack.last_mut().unwrap().children.push(NodeChild::Elem(done));
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(e.as_ref()).into_owned());
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    stack
                        .last_mut()
                        .unwrap()
                        .children
                        .push(NodeChild::Text(trimmed.to_string()));
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                if !text.is_empty() {
                    stack.last_mut().unwrap().children.push(NodeChild::Text(text));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("stopping html parse early: {}", e);
                break;
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    // Fold any still-open elements back into the root.
    while stack.len() > 1 {
        let done = stack.pop().unwrap().freeze();
        stack.last_mut().unwrap().children.push(NodeChild::Elem(done));
    }
    HtmlElement(stack.pop().unwrap().freeze())
}

// ── Production driver ──

/// Fetch-and-parse driver over reqwest.
pub struct HttpDriver {
    http: reqwest::Client,
    dom: Option<HtmlElement>,
}

impl HttpDriver {
    pub fn new() -> HttpDriver {
        HttpDriver {
            http: reqwest::Client::new(),
            dom: None,
        }
    }
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HttpDriver {
    type Elem = HtmlElement;

    async fn navigate(&mut self, url: &str) -> Result<()> {
        info!("fetching {}", url);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            // Still a loaded page; a missing filings grid surfaces later as a
            // recoverable per-case error instead of killing the session.
            warn!("{} returned {}, parsing body anyway", url, status);
        }
        let body = resp.text().await?;
        self.dom = Some(parse_document(&body));
        Ok(())
    }

    fn find_element(&self, selector: &Selector) -> Option<HtmlElement> {
        self.dom.as_ref()?.find_element(selector)
    }

    fn find_elements(&self, selector: &Selector) -> Vec<HtmlElement> {
        self.dom
            .as_ref()
            .map(|dom| dom.find_elements(selector))
            .unwrap_or_default()
    }
}

// ── Test driver ──

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;

    use anyhow::{anyhow, Result};

    use super::{parse_document, Driver, Element, HtmlElement, Selector};

    /// Serves canned HTML per URL and records every navigation.
    pub struct FixtureDriver {
        pages: HashMap<String, String>,
        pub navigations: Vec<String>,
        dom: Option<HtmlElement>,
    }

    impl FixtureDriver {
        pub fn new() -> FixtureDriver {
            FixtureDriver {
                pages: HashMap::new(),
                navigations: Vec::new(),
                dom: None,
            }
        }

        pub fn with_page(mut self, url: &str, html: &str) -> FixtureDriver {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl Driver for FixtureDriver {
        type Elem = HtmlElement;

        async fn navigate(&mut self, url: &str) -> Result<()> {
            self.navigations.push(url.to_string());
            let html = self
                .pages
                .get(url)
                .ok_or_else(|| anyhow!("no fixture registered for {}", url))?;
            self.dom = Some(parse_document(html));
            Ok(())
        }

        fn find_element(&self, selector: &Selector) -> Option<HtmlElement> {
            self.dom.as_ref()?.find_element(selector)
        }

        fn find_elements(&self, selector: &Selector) -> Vec<HtmlElement> {
            self.dom
                .as_ref()
                .map(|dom| dom.find_elements(selector))
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_by_id_and_tag() {
        let doc = parse_document(
            r#"<html><body><table id="tblPubDoc"><tbody>
                 <tr><td>a</td></tr><tr><td>b</td></tr>
               </tbody></table></body></html>"#,
        );
        let table = doc.find_element(&Selector::id("tblPubDoc")).unwrap();
        let rows = table.find_elements(&Selector::tag("tr"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].text(), "b");
    }

    #[test]
    fn finds_by_class() {
        let doc = parse_document(r#"<div><span class="x big">one</span><span class="y">two</span></div>"#);
        let hits = doc.find_elements(&Selector::Class("big".into()));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text(), "one");
    }

    #[test]
    fn attr_and_entity_unescape() {
        let doc = parse_document(r#"<a href="ViewDoc.aspx?DocRefId=%7Babc%7D&amp;x=1">AT&amp;T filing</a>"#);
        let link = doc.find_element(&Selector::tag("a")).unwrap();
        assert_eq!(
            link.attr("href").unwrap(),
            "ViewDoc.aspx?DocRefId=%7Babc%7D&x=1"
        );
        assert_eq!(link.text(), "AT&T filing");
    }

    #[test]
    fn void_and_unclosed_tags_do_not_break_structure() {
        let doc = parse_document(
            r#"<table id="t"><tbody>
                 <tr><td>first<br>line</td><td><img src="x.png"></td></tr>
               </tbody></table>"#,
        );
        let table = doc.find_element(&Selector::id("t")).unwrap();
        let cells = table.find_elements(&Selector::tag("td"));
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].text(), "first line");
    }

    #[test]
    fn stray_end_tag_is_ignored() {
        let doc = parse_document("<div><p>text</div></p><span>after</span>");
        assert!(doc.find_element(&Selector::tag("span")).is_some());
        assert_eq!(doc.find_element(&Selector::tag("p")).unwrap().text(), "text");
    }

    #[test]
    fn nested_text_concatenates() {
        let doc = parse_document("<td><a href='#'>Public Service Commission</a> (Staff)</td>");
        let cell = doc.find_element(&Selector::tag("td")).unwrap();
        assert_eq!(cell.text(), "Public Service Commission (Staff)");
    }

    #[tokio::test]
    async fn navigate_keeps_going_on_error_status() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string("<html><body><p>case not found</p></body></html>"),
            )
            .mount(&server)
            .await;

        // The error page still becomes the current page; whatever is missing
        // from it (the filings grid) is the caller's problem, not a session
        // failure.
        let mut driver = HttpDriver::new();
        driver.navigate(&server.uri()).await.unwrap();
        let p = driver.find_element(&Selector::tag("p")).unwrap();
        assert_eq!(p.text(), "case not found");
    }
}
