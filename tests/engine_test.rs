use mockito::{Matcher, Mock, Server, ServerGuard};
use proxied_extract::{
    article::{article_schema, ArticleRecord, EXTRACTION_INSTRUCTION},
    config::ScraperConfig,
    engine::{EngineError, ExtractionEngine, LlmExtractor, ProxyFailure},
    pool::{ProxyEndpoint, ProxyPool},
    store::JsonFileSink,
    types::ExtractionResult,
    RetryPipeline,
};
use serde_json::json;

/// Page requested through the proxy; only the proxy ever sees the request.
const PAGE_URL: &str = "http://news.test/story";

const PAGE: &str = r#"
    <html>
        <head><title>Launch day</title></head>
        <body>
            <article>
                <p>The rocket lifted off at dawn.</p>
                <img src="https://news.test/rocket.jpg" alt="Rocket on the pad">
            </article>
        </body>
    </html>
"#;

/// Starts a proxy that answers every forwarded request with the article page.
async fn page_proxy(status: usize) -> (ServerGuard, Mock) {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .with_status(status)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(PAGE)
        .create_async()
        .await;
    (server, mock)
}

fn config_for(llm: &ServerGuard) -> ScraperConfig {
    let mut config = ScraperConfig::default();
    config.llm_config.endpoint = format!("{}/api/generate", llm.url());
    config.llm_config.model = "test-model".to_string();
    config.llm_config.page_timeout_secs = 5;
    config.llm_config.request_timeout_secs = 5;
    config
}

fn proxy(server: &ServerGuard) -> ProxyEndpoint {
    ProxyEndpoint::normalize(&server.host_with_port()).unwrap()
}

#[tokio::test]
async fn test_extracts_through_proxy() {
    let (proxy_server, _page) = page_proxy(200).await;
    let mut llm = Server::new_async().await;
    let generate = llm
        .mock("POST", "/api/generate")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"model": "test-model", "stream": false})),
            Matcher::Regex("The rocket lifted off at dawn".to_string()),
            Matcher::Regex("rocket.jpg".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"response": r#"{"title":"Launch day","content":"The rocket lifted off at dawn."}"#}).to_string())
        .expect(1)
        .create_async()
        .await;

    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let raw = extractor
        .extract(PAGE_URL, Some(&proxy(&proxy_server)), &article_schema(), EXTRACTION_INSTRUCTION)
        .await
        .unwrap();

    assert!(raw.contains("Launch day"));
    generate.assert_async().await;
}

#[tokio::test]
async fn test_proxy_auth_required_is_structured() {
    let (proxy_server, _page) = page_proxy(407).await;
    let llm = Server::new_async().await;

    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let err = extractor
        .extract(PAGE_URL, Some(&proxy(&proxy_server)), &article_schema(), EXTRACTION_INSTRUCTION)
        .await
        .unwrap_err();

    match err {
        EngineError::Proxy { kind, .. } => assert_eq!(kind, ProxyFailure::AuthRequired),
        other => panic!("expected proxy failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refused_proxy_is_connect_failure() {
    let llm = Server::new_async().await;
    // nothing listens on port 1
    let refused = ProxyEndpoint::normalize("127.0.0.1:1").unwrap();

    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let err = extractor
        .extract(PAGE_URL, Some(&refused), &article_schema(), EXTRACTION_INSTRUCTION)
        .await
        .unwrap_err();

    match err {
        EngineError::Proxy { kind, message } => {
            assert_eq!(kind, ProxyFailure::ConnectFailed);
            assert!(!message.contains(PAGE_URL), "target URL leaked: {}", message);
        }
        other => panic!("expected proxy failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pipeline_evicts_refusing_proxy() {
    let llm = Server::new_async().await;
    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let dir = std::env::temp_dir().join(format!("proxied-refused-{}", std::process::id()));
    let pipeline = RetryPipeline::new(extractor, JsonFileSink::new(&dir));
    let mut pool = ProxyPool::from_candidates(["127.0.0.1:1"]);

    let result = pipeline.run(PAGE_URL, &mut pool, 1).await;

    assert!(!result.is_success());
    assert_eq!(result.attempts().len(), 1);
    assert!(result.attempts()[0].evicted);
    assert_eq!(result.evictions(), 1);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_llm_failure_is_unexpected() {
    let (proxy_server, _page) = page_proxy(200).await;
    let mut llm = Server::new_async().await;
    let _generate = llm
        .mock("POST", "/api/generate")
        .with_status(500)
        .with_body("model not loaded")
        .create_async()
        .await;

    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let err = extractor
        .extract(PAGE_URL, Some(&proxy(&proxy_server)), &article_schema(), EXTRACTION_INSTRUCTION)
        .await
        .unwrap_err();

    match err {
        EngineError::Other(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("model not loaded"));
        }
        other => panic!("expected unexpected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pipeline_saves_article_from_working_proxy() {
    let (proxy_server, _page) = page_proxy(200).await;
    let mut llm = Server::new_async().await;
    let _generate = llm
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"response": r#"[{"title":"Launch day","content":"Lift off."}]"#}).to_string())
        .create_async()
        .await;

    let dir = std::env::temp_dir().join(format!("proxied-articles-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();

    let extractor = LlmExtractor::new(&config_for(&llm)).unwrap();
    let pipeline = RetryPipeline::new(extractor, JsonFileSink::new(&dir));
    let mut pool = ProxyPool::from_candidates([proxy_server.host_with_port()]);

    let result = pipeline.run(PAGE_URL, &mut pool, 3).await;

    match result {
        ExtractionResult::Success {
            record,
            saved_to,
            attempts,
        } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(record.metadata.proxy_used, proxy(&proxy_server).to_string());

            let saved: ArticleRecord =
                serde_json::from_str(&std::fs::read_to_string(&saved_to).unwrap()).unwrap();
            assert_eq!(saved.article.title, "Launch day");
            assert!(saved.article.images.is_empty());
        }
        other => panic!("expected success, got {:?}", other),
    }

    std::fs::remove_dir_all(&dir).ok();
}
