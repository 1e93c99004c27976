//! End-to-end runs over fake and mock-HTTP transports

mod common;

use chromafeed::{Pipeline, PipelineError};
use common::{
    BLUE, FakeFetcher, GREEN, RED, create_test_dir, solid_png, sorted_lines, source, spill_files,
    test_config, three_red_one_blue_png,
};
use image::ImageFormat;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

#[tokio::test]
async fn test_three_images_three_lines() {
    let mut server = mockito::Server::new_async().await;
    let png = three_red_one_blue_png();
    let mut mocks = vec![];
    for name in ["a", "b", "c"] {
        mocks.push(
            server
                .mock("GET", format!("/{name}.png").as_str())
                .with_status(200)
                .with_body(&png)
                .create_async()
                .await,
        );
    }
    let urls: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|n| format!("{}/{n}.png", server.url()))
        .collect();

    let dir = create_test_dir();
    let config = test_config(dir.path()).hot_capacity(5).build().unwrap();
    let pipeline = Pipeline::with_http(config).unwrap();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let (summary, output) = pipeline.run_into(source(&refs), Vec::new()).await.unwrap();

    let mut expected: Vec<String> = urls
        .iter()
        .map(|u| format!("{u} #ff0000 #0000ff"))
        .collect();
    expected.sort();
    assert_eq!(sorted_lines(&output), expected);
    assert_eq!(summary.analysis.analyzed, 3);
    assert_eq!(summary.feeder.admitted_cold, 0);
}

#[tokio::test]
async fn test_duplicate_identity_yields_one_line() {
    let dir = create_test_dir();
    let fetcher = FakeFetcher::new().with("img", solid_png(1, 1, GREEN));
    let pipeline = Pipeline::new(test_config(dir.path()).build().unwrap(), Arc::new(fetcher)).unwrap();

    let (summary, output) = pipeline
        .run_into(source(&["img", "img"]), Vec::new())
        .await
        .unwrap();
    assert_eq!(sorted_lines(&output), vec!["img #00ff00"]);
    assert_eq!(summary.feeder.duplicates, 1);
}

#[tokio::test]
async fn test_spilled_item_is_analyzed_and_removed() {
    let dir = create_test_dir();
    let config = test_config(dir.path())
        .hot_capacity(1)
        .max_concurrent_fetches(2)
        .build()
        .unwrap();
    let cache = config.cache_dir().clone();
    let fetcher = FakeFetcher::new()
        .with("red", solid_png(3, 3, RED))
        .with("blue", solid_png(2, 2, BLUE));
    let pipeline = Pipeline::new(config, Arc::new(fetcher)).unwrap();

    let (summary, output) = pipeline
        .run_into(source(&["red", "blue"]), Vec::new())
        .await
        .unwrap();

    assert_eq!(sorted_lines(&output), vec!["blue #0000ff", "red #ff0000"]);
    assert_eq!(summary.feeder.admitted_hot + summary.feeder.admitted_cold, 2);
    assert_eq!(spill_files(&cache), 0);
}

#[tokio::test]
async fn test_not_found_is_skipped() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("GET", "/ok.png")
        .with_status(200)
        .with_body(solid_png(1, 1, RED))
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/missing.png")
        .with_status(404)
        .create_async()
        .await;

    let ok = format!("{}/ok.png", server.url());
    let missing = format!("{}/missing.png", server.url());
    let dir = create_test_dir();
    let pipeline = Pipeline::with_http(test_config(dir.path()).build().unwrap()).unwrap();
    let (summary, output) = pipeline
        .run_into(source(&[missing.as_str(), ok.as_str()]), Vec::new())
        .await
        .unwrap();

    assert_eq!(sorted_lines(&output), vec![format!("{ok} #ff0000")]);
    assert_eq!(summary.feeder.fetch_failures, 1);
}

#[tokio::test]
async fn test_undecodable_and_unsupported_are_skipped() {
    let dir = create_test_dir();
    let bmp = common::encode(&image::ImageBuffer::from_pixel(1, 1, RED), ImageFormat::Bmp);
    let fetcher = FakeFetcher::new()
        .with("garbage", b"this is not an image".to_vec())
        .with("bmp", bmp)
        .with("good", solid_png(1, 1, BLUE));
    let pipeline = Pipeline::new(test_config(dir.path()).build().unwrap(), Arc::new(fetcher)).unwrap();

    let (summary, output) = pipeline
        .run_into(source(&["garbage", "bmp", "good"]), Vec::new())
        .await
        .unwrap();
    assert_eq!(sorted_lines(&output), vec!["good #0000ff"]);
    assert_eq!(summary.analysis.analyzed, 1);
    assert_eq!(summary.analysis.skipped, 2);
}

#[tokio::test]
async fn test_many_items_under_tight_memory() {
    let dir = create_test_dir();
    let mut fetcher = FakeFetcher::new();
    let ids: Vec<String> = (0..25).map(|i| format!("img-{i:02}")).collect();
    for id in &ids {
        fetcher = fetcher.with(id, solid_png(4, 4, GREEN));
    }
    let config = test_config(dir.path())
        .hot_capacity(2)
        .cold_capacity(5)
        .max_concurrent_analyses(3)
        .memory_ceiling_bytes(1024)
        .decode_placeholder_bytes(512)
        .build()
        .unwrap();
    let cache = config.cache_dir().clone();
    let pipeline = Pipeline::new(config, Arc::new(fetcher)).unwrap();

    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (summary, output) = pipeline.run_into(source(&refs), Vec::new()).await.unwrap();

    assert_eq!(sorted_lines(&output).len(), 25);
    assert_eq!(summary.analysis.analyzed, 25);
    assert_eq!(spill_files(&cache), 0);
}

#[tokio::test]
async fn test_empty_input_finishes() {
    let dir = create_test_dir();
    let pipeline = Pipeline::new(
        test_config(dir.path()).build().unwrap(),
        Arc::new(FakeFetcher::new()),
    )
    .unwrap();
    let (summary, output) = pipeline
        .run_into(source(&["", "   "]), Vec::new())
        .await
        .unwrap();
    assert!(output.is_empty());
    assert_eq!(summary.feeder.dispatched, 0);
}

/// Sink that rejects every write
struct BrokenSink;

impl AsyncWrite for BrokenSink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_sink_failure_is_fatal() {
    let dir = create_test_dir();
    let config = test_config(dir.path()).hot_capacity(1).build().unwrap();
    let cache = config.cache_dir().clone();
    let mut fetcher = FakeFetcher::new();
    for id in ["a", "b", "c", "d"] {
        fetcher = fetcher.with(id, solid_png(1, 1, RED));
    }
    let pipeline = Pipeline::new(config, Arc::new(fetcher)).unwrap();

    let result = pipeline.run(source(&["a", "b", "c", "d"]), BrokenSink).await;
    assert!(matches!(result, Err(PipelineError::Sink(_))));
    assert_eq!(spill_files(&cache), 0);
}

#[tokio::test]
async fn test_cache_dir_that_is_a_file_fails() {
    let dir = create_test_dir();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file").unwrap();
    let config = chromafeed::PipelineConfig::builder()
        .cache_dir(&blocker)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, Arc::new(FakeFetcher::new())).unwrap();

    let result = pipeline.run(source(&["a"]), Vec::new()).await;
    assert!(matches!(result, Err(PipelineError::CacheDir { .. })));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = create_test_dir();
    let mut config = test_config(dir.path()).build().unwrap();
    config = serde_json::from_str(
        &serde_json::to_string(&config)
            .unwrap()
            .replace("\"hot_capacity\":100", "\"hot_capacity\":0"),
    )
    .unwrap();
    let result = Pipeline::new(config, Arc::new(FakeFetcher::new()));
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[tokio::test]
async fn test_run_files_writes_results() {
    let dir = create_test_dir();
    let input = dir.path().join("input.txt");
    let results = dir.path().join("results.txt");
    std::fs::write(&input, "one\n\none\ntwo\n").unwrap();

    let fetcher = FakeFetcher::new()
        .with("one", three_red_one_blue_png())
        .with("two", solid_png(2, 1, GREEN));
    let pipeline = Pipeline::new(test_config(dir.path()).build().unwrap(), Arc::new(fetcher)).unwrap();
    let summary = pipeline.run_files(&input, &results).await.unwrap();

    let written = std::fs::read(&results).unwrap();
    assert_eq!(
        sorted_lines(&written),
        vec!["one #ff0000 #0000ff", "two #00ff00"]
    );
    assert_eq!(summary.analysis.analyzed, 2);

    let missing = pipeline
        .run_files(&dir.path().join("nope.txt"), &results)
        .await;
    assert!(matches!(missing, Err(PipelineError::Io { .. })));
}
