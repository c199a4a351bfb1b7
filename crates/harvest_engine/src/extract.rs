//! Text and field extraction from SRU responses and fetched documents.
//!
//! Markup goes through the lenient `scraper` parser, so broken documents
//! still yield their text. Elements are matched by local name, lowercased,
//! with any namespace prefix removed (`gzd:preferredUrl` -> `preferredurl`).
use std::borrow::Cow;

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node};

/// SRU diagnostic for a start position past the end of the result set.
const FIRST_RECORD_OUT_OF_RANGE: &str = "/61";
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SruResponse {
    pub records: Vec<SruRecord>,
    pub number_of_records: Option<u64>,
    pub next_record_position: Option<u64>,
}

/// Fields of one `recordData` block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SruRecord {
    pub identifier: Option<String>,
    pub preferred_url: Option<String>,
    pub url: Option<String>,
    /// `itemUrl` whose `manifestation` attribute is `xml`.
    pub xml_item_url: Option<String>,
    /// First `itemUrl` of any manifestation.
    pub item_url: Option<String>,
    pub location_uri: Option<String>,
    /// Whitespace-normalised text of the whole record.
    pub text: String,
}

impl SruRecord {
    /// Public URL: preferred URL, URL, XML manifestation, location URI,
    /// then the identifier itself.
    pub fn best_url(&self) -> Option<&str> {
        self.preferred_url
            .as_deref()
            .or(self.url.as_deref())
            .or(self.xml_item_url.as_deref())
            .or(self.location_uri.as_deref())
            .or(self.identifier.as_deref())
    }

    /// Identifier, falling back to the public URL.
    pub fn key(&self) -> Option<&str> {
        self.identifier.as_deref().or_else(|| self.best_url())
    }

    /// Where the full document can be downloaded from.
    pub fn document_url(&self) -> Option<&str> {
        self.xml_item_url
            .as_deref()
            .or(self.preferred_url.as_deref())
            .or(self.url.as_deref())
            .or(self.item_url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("response is not an SRU searchRetrieve response")]
    NotSru,
    #[error("SRU diagnostic {uri}: {message}")]
    Diagnostic { uri: String, message: String },
}

pub fn parse_search_response(markup: &str) -> Result<SruResponse, ExtractError> {
    let prepared = prepare_markup(markup);
    let doc = Html::parse_document(&prepared);
    let root = doc.tree.root();

    if find_element(root, "searchretrieveresponse").is_none() {
        return Err(ExtractError::NotSru);
    }

    let records: Vec<SruRecord> = elements(root)
        .filter(|el| local_name(el) == "recorddata")
        .map(parse_record)
        .collect();

    if records.is_empty() {
        if let Some(diagnostic) = find_element(root, "diagnostic") {
            let uri = child_text(*diagnostic, "uri").unwrap_or_default();
            if !uri.ends_with(FIRST_RECORD_OUT_OF_RANGE) {
                let message = child_text(*diagnostic, "message")
                    .or_else(|| child_text(*diagnostic, "details"))
                    .unwrap_or_else(|| normalized_text(diagnostic));
                return Err(ExtractError::Diagnostic { uri, message });
            }
        }
    }

    Ok(SruResponse {
        records,
        number_of_records: child_text(root, "numberofrecords").and_then(|t| t.parse().ok()),
        next_record_position: child_text(root, "nextrecordposition").and_then(|t| t.parse().ok()),
    })
}

fn parse_record(data: ElementRef<'_>) -> SruRecord {
    let mut record = SruRecord {
        text: normalized_text(data),
        ..SruRecord::default()
    };
    for el in elements(*data) {
        let slot = match local_name(&el).as_str() {
            "identifier" => &mut record.identifier,
            "preferredurl" => &mut record.preferred_url,
            "url" => &mut record.url,
            "locationuri" => &mut record.location_uri,
            "itemurl" => {
                let is_xml = el
                    .value()
                    .attr("manifestation")
                    .is_some_and(|m| m.trim().eq_ignore_ascii_case("xml"));
                if is_xml && record.xml_item_url.is_none() {
                    record.xml_item_url = own_text(el);
                }
                &mut record.item_url
            }
            _ => continue,
        };
        if slot.is_none() {
            *slot = own_text(el);
        }
    }
    record
}

/// Readable text of a fetched document, scripts and styles excluded.
pub fn plain_text(markup: &str) -> String {
    let prepared = prepare_markup(markup);
    let doc = Html::parse_document(&prepared);
    let pieces = doc.tree.root().descendants().filter_map(|node| match node.value() {
        Node::Text(text) if !inside_skipped(node) => Some(&**text),
        _ => None,
    });
    normalize_whitespace(pieces)
}

fn inside_skipped(node: NodeRef<'_, Node>) -> bool {
    node.ancestors().any(|ancestor| {
        ancestor
            .value()
            .as_element()
            .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
    })
}

fn elements<'a>(node: NodeRef<'a, Node>) -> impl Iterator<Item = ElementRef<'a>> {
    node.descendants().filter_map(ElementRef::wrap)
}

fn find_element<'a>(node: NodeRef<'a, Node>, name: &str) -> Option<ElementRef<'a>> {
    elements(node).find(|el| local_name(el) == name)
}

fn child_text(node: NodeRef<'_, Node>, name: &str) -> Option<String> {
    find_element(node, name).and_then(own_text)
}

fn own_text(el: ElementRef<'_>) -> Option<String> {
    Some(normalized_text(el)).filter(|text| !text.is_empty())
}

fn local_name(el: &ElementRef<'_>) -> String {
    let name = el.value().name();
    let local = match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    };
    local.to_ascii_lowercase()
}

fn normalized_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(el.text())
}

fn normalize_whitespace<'a>(pieces: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in pieces.flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Makes XML digestible for the HTML parser: CDATA sections become plain
/// content and empty-element tags (`<a/>`) get an explicit end tag.
fn prepare_markup(markup: &str) -> Cow<'_, str> {
    if !markup.contains("<![CDATA[") && !markup.contains("/>") {
        return Cow::Borrowed(markup);
    }
    let markup = markup.replace("<![CDATA[", "").replace("]]>", "");
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup.as_str();
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let tag = &rest[open..];
        let Some(close) = tag.find('>') else {
            out.push_str(tag);
            return Cow::Owned(out);
        };
        let (tag, tail) = tag.split_at(close + 1);
        match tag.strip_suffix("/>") {
            Some(inner) if !tag.starts_with("<!") && !tag.starts_with("<?") => {
                let name: String = inner[1..]
                    .chars()
                    .take_while(|c| !c.is_whitespace())
                    .collect();
                out.push_str(inner);
                out.push('>');
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            }
            _ => out.push_str(tag),
        }
        rest = tail;
    }
    out.push_str(rest);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_elements_get_closed() {
        assert_eq!(
            prepare_markup("<a><dc:identifier/><b x=\"1\" />t</a>"),
            "<a><dc:identifier></dc:identifier><b x=\"1\" ></b>t</a>"
        );
        assert_eq!(prepare_markup("<a>plain</a>"), "<a>plain</a>");
    }

    #[test]
    fn cdata_content_is_kept() {
        assert_eq!(plain_text("<a><![CDATA[<p>Hallo</p> wereld]]></a>"), "Hallo wereld");
    }

    #[test]
    fn plain_text_skips_scripts() {
        let html = "<html><head><style>p{}</style></head><body><p>Een</p>\n<script>x()</script><p>twee</p></body></html>";
        assert_eq!(plain_text(html), "Een twee");
    }
}
