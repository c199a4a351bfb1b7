use std::time::Duration;

use harvest_core::{PageEntry, SourceLabel};
use harvest_engine::{
    FetchSettings, RecordSource, RetryPolicy, RetryingFetcher, SourceError, SruRecordSource,
    SruSettings,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY: &str = "c.product-area==officielepublicaties";

fn source(server: &MockServer, fetch_documents: bool) -> SruRecordSource {
    harvest_logging::initialize_for_tests();
    let policy = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_jitter: Duration::ZERO,
    };
    let fetcher = RetryingFetcher::new(&FetchSettings::default(), policy).unwrap();
    let mut settings = SruSettings::new(
        format!("{}/sru/Search", server.uri()),
        QUERY,
        SourceLabel::OfficielePublicaties,
    );
    settings.record_schema = Some("gzd".to_string());
    settings.fetch_documents = fetch_documents;
    settings.document_interval = Duration::ZERO;
    SruRecordSource::new(settings, fetcher).unwrap()
}

fn record_xml(
    identifier: Option<&str>,
    preferred_url: Option<&str>,
    xml_url: Option<&str>,
) -> String {
    let identifier = identifier
        .map(|id| format!("<dcterms:identifier>{id}</dcterms:identifier>"))
        .unwrap_or_default();
    let preferred_url = preferred_url
        .map(|url| format!("<gzd:preferredUrl>{url}</gzd:preferredUrl>"))
        .unwrap_or_default();
    let xml_url = xml_url
        .map(|url| format!("<gzd:itemUrl manifestation=\"xml\">{url}</gzd:itemUrl>"))
        .unwrap_or_default();
    format!(
        r#"<sru:record>
  <sru:recordSchema>gzd</sru:recordSchema>
  <sru:recordData>
    <gzd:gzd>
      <gzd:originalData><overheidwetgeving:meta><owmskern>{identifier}<dcterms:title>Besluit  van
        de raad</dcterms:title></owmskern></overheidwetgeving:meta></gzd:originalData>
      <gzd:enrichedData>{preferred_url}<gzd:itemUrl manifestation="pdf">https://example.org/x.pdf</gzd:itemUrl>{xml_url}</gzd:enrichedData>
    </gzd:gzd>
  </sru:recordData>
</sru:record>"#
    )
}

fn response_xml(total: u64, next: Option<u64>, records: &[String]) -> String {
    let next = next
        .map(|n| format!("<sru:nextRecordPosition>{n}</sru:nextRecordPosition>"))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<sru:searchRetrieveResponse xmlns:sru="http://docs.oasis-open.org/ns/search-ws/sruResponse">
  <sru:version>2.0</sru:version>
  <sru:numberOfRecords>{total}</sru:numberOfRecords>
  <sru:records>{}</sru:records>
  {next}
</sru:searchRetrieveResponse>"#,
        records.concat()
    )
}

fn xml_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/xml; charset=utf-8")
}

fn records(entries: &[PageEntry]) -> Vec<(&str, &str)> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            PageEntry::Record(record) => Some((record.key(), record.url())),
            PageEntry::Dropped { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn lists_a_page_with_paging_parameters() {
    let server = MockServer::start().await;
    let body = response_xml(
        3,
        Some(3),
        &[
            record_xml(Some("stb-2024-1"), Some("https://example.org/stb-2024-1.html"), None),
            record_xml(Some("stb-2024-2"), None, Some("https://example.org/stb-2024-2.xml")),
        ],
    );
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .and(query_param("version", "2.0"))
        .and(query_param("operation", "searchRetrieve"))
        .and(query_param("query", QUERY))
        .and(query_param("startRecord", "1"))
        .and(query_param("maximumRecords", "2"))
        .and(query_param("recordSchema", "gzd"))
        .respond_with(xml_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let page = source(&server, false).list(1, 2).await.unwrap();

    assert!(page.has_more);
    assert_eq!(
        records(&page.entries),
        vec![
            ("stb-2024-1", "https://example.org/stb-2024-1.html"),
            ("stb-2024-2", "https://example.org/stb-2024-2.xml"),
        ]
    );
    let PageEntry::Record(first) = &page.entries[0] else {
        panic!("expected a record");
    };
    assert!(first.content().contains("Besluit van de raad"));
    assert_eq!(first.source(), SourceLabel::OfficielePublicaties);
}

#[tokio::test]
async fn key_falls_back_to_url_and_keyless_records_are_dropped() {
    let server = MockServer::start().await;
    let body = response_xml(
        2,
        None,
        &[
            record_xml(None, Some("https://example.org/gmb-9.html"), None),
            record_xml(None, None, None),
        ],
    );
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;

    let page = source(&server, false).list(1, 10).await.unwrap();

    assert!(!page.has_more);
    assert_eq!(page.entries.len(), 2);
    assert_eq!(
        records(&page.entries),
        vec![("https://example.org/gmb-9.html", "https://example.org/gmb-9.html")]
    );
    assert!(matches!(page.entries[1], PageEntry::Dropped { .. }));
}

#[tokio::test]
async fn document_mode_uses_document_text_and_drops_failed_downloads() {
    let server = MockServer::start().await;
    let base = server.uri();
    let body = response_xml(
        2,
        None,
        &[
            record_xml(Some("a"), None, Some(&format!("{base}/docs/a.xml"))),
            record_xml(Some("b"), None, Some(&format!("{base}/docs/b.xml"))),
        ],
    );
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(xml_response(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/a.xml"))
        .respond_with(xml_response(
            "<?xml version=\"1.0\"?><officiele-publicatie><al>Artikel 1</al>\n<al>Dit besluit treedt in werking.</al></officiele-publicatie>".to_string(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/b.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let page = source(&server, true).list(1, 2).await.unwrap();

    let PageEntry::Record(first) = &page.entries[0] else {
        panic!("expected a record, got {:?}", page.entries[0]);
    };
    assert_eq!(first.content(), "Artikel 1 Dit besluit treedt in werking.");
    assert_eq!(first.url(), format!("{base}/docs/a.xml"));
    assert!(matches!(page.entries[1], PageEntry::Dropped { .. }));
}

#[tokio::test]
async fn out_of_range_diagnostic_is_an_empty_page() {
    let server = MockServer::start().await;
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<sru:searchRetrieveResponse xmlns:sru="http://docs.oasis-open.org/ns/search-ws/sruResponse">
  <sru:numberOfRecords>40</sru:numberOfRecords>
  <sru:diagnostics>
    <diag:diagnostic xmlns:diag="http://docs.oasis-open.org/ns/search-ws/diagnostic">
      <diag:uri>info:srw/diagnostic/1/61</diag:uri>
      <diag:message>First record position out of range</diag:message>
    </diag:diagnostic>
  </sru:diagnostics>
</sru:searchRetrieveResponse>"#;
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(xml_response(body.to_string()))
        .mount(&server)
        .await;

    let page = source(&server, false).list(41, 10).await.unwrap();
    assert!(page.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn other_diagnostics_fail_the_listing() {
    let server = MockServer::start().await;
    let body = r#"<sru:searchRetrieveResponse>
  <sru:diagnostics><diag:diagnostic>
    <diag:uri>info:srw/diagnostic/1/10</diag:uri>
    <diag:message>Query syntax error</diag:message>
  </diag:diagnostic></sru:diagnostics>
</sru:searchRetrieveResponse>"#;
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(xml_response(body.to_string()))
        .mount(&server)
        .await;

    let err = source(&server, false).list(1, 10).await.unwrap_err();
    match err {
        SourceError::Malformed(message) => assert!(message.contains("Query syntax error")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_surface_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let err = source(&server, false).list(1, 10).await.unwrap_err();
    assert!(matches!(err, SourceError::Fetch(ref fetch) if fetch.is_transient()));
}

#[tokio::test]
async fn non_sru_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sru/Search"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>Maintenance</body></html>"),
        )
        .mount(&server)
        .await;

    let err = source(&server, false).list(1, 10).await.unwrap_err();
    assert!(matches!(err, SourceError::Malformed(_)));
}
