//! Crawl, scope, robots, and target discovery against mock servers.

use probely::{Method, ScannerBuilder};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_scanner(max_depth: usize) -> probely::Scanner {
    ScannerBuilder::new()
        .with_max_depth(max_depth)
        .with_delay(0.0)
        .with_max_retries(0)
        .with_quiet(true)
        .build()
        .expect("scanner")
}

#[tokio::test]
async fn seed_query_string_becomes_the_only_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello"))
        .mount(&server)
        .await;

    let scanner = quick_scanner(2);
    let report = scanner
        .crawl(&format!("{}/?id=1", server.uri()))
        .await
        .expect("crawl");

    assert_eq!(report.targets.len(), 1);
    let target = &report.targets[0];
    assert_eq!(target.method, Method::Get);
    assert_eq!(target.url, format!("{}/", server.uri()));
    assert_eq!(target.params.get("id").map(String::as_str), Some("1"));

    let findings = scanner.probe(&report.targets).await;
    assert!(findings.is_empty());
}

#[tokio::test]
async fn depth_one_visits_direct_links_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/a?x=1">a</a> <a href="/b">b</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="/deeper">more</a>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("leaf"))
        .mount(&server)
        .await;

    let scanner = quick_scanner(1);
    let report = scanner.crawl(&server.uri()).await.expect("crawl");

    let uri = server.uri();
    assert_eq!(report.visited.len(), 3);
    assert!(report.visited.contains(&format!("{uri}/")));
    assert!(report.visited.contains(&format!("{uri}/a?x=1")));
    assert!(report.visited.contains(&format!("{uri}/b")));
    assert!(!report.visited.contains(&format!("{uri}/deeper")));

    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].url, format!("{uri}/a"));
    assert_eq!(
        report.targets[0].params.get("x").map(String::as_str),
        Some("1")
    );
}

#[tokio::test]
async fn foreign_hosts_stay_out_of_the_visited_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="http://example.invalid/next">out</a> <a href="/in">in</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/in"))
        .respond_with(ResponseTemplate::new(200).set_body_string("leaf"))
        .mount(&server)
        .await;

    let scanner = quick_scanner(2);
    let report = scanner.crawl(&server.uri()).await.expect("crawl");

    let host = server.address().to_string();
    for visited in &report.visited {
        let url = reqwest::Url::parse(visited).expect("visited url");
        let netloc = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap()),
            None => url.host_str().unwrap().to_string(),
        };
        assert_eq!(netloc, host);
    }
    assert_eq!(report.visited.len(), 2);
}

#[tokio::test]
async fn robots_disallow_rules_prune_the_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin/\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/admin/secret">hidden</a> <a href="/ok">open</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let scanner = quick_scanner(2);
    let report = scanner.crawl(&server.uri()).await.expect("crawl");

    assert!(report.visited.iter().all(|url| !url.contains("/admin/")));
    assert!(report.visited.contains(&format!("{}/ok", server.uri())));
}

#[tokio::test]
async fn forms_become_targets_and_their_actions_are_crawled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form method="post" action="/login">
                 <input name="user" value="alice">
                 <input name="pass">
               </form>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("login page"))
        .mount(&server)
        .await;

    let scanner = quick_scanner(2);
    let report = scanner.crawl(&server.uri()).await.expect("crawl");

    assert!(report.visited.contains(&format!("{}/login", server.uri())));
    assert_eq!(report.targets.len(), 1);
    let target = &report.targets[0];
    assert_eq!(target.method, Method::Post);
    assert_eq!(target.url, format!("{}/login", server.uri()));
    assert_eq!(target.params.get("user").map(String::as_str), Some("alice"));
    assert_eq!(target.params.get("pass").map(String::as_str), Some("test"));
}
