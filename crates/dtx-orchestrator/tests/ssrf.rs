//! Unsafe image sources are refused before any download or analysis call

mod common;

use common::coordinator_with_resolver;
use dtx_core::{FailureKind, PipelineConfig, RetryPolicy, Task, TokenCategory};
use dtx_orchestrator::TaskError;
use dtx_test_utils::{color_response, Reply, ScriptedAnalysisService, StaticResolver};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with_host("intranet.example", &[IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))])
        .with_host("rebind.example", &[IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))])
        .with_host(
            "mixed.example",
            &[
                IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
        )
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.extraction.retry = RetryPolicy::no_retry();
    config.download.retry = RetryPolicy::no_retry();
    config
}

async fn assert_refused(source: &str) {
    let service = ScriptedAnalysisService::new().respond(
        TokenCategory::Color,
        Reply::Json(color_response(&[("primary", "#0B57D0", 0.9)])),
    );
    let (coordinator, service) = coordinator_with_resolver(config(), Arc::new(resolver()), service);
    let task = Task::new(source, vec![TokenCategory::Color]);

    let err = coordinator.execute_task(&task).await.unwrap_err();

    assert!(
        matches!(err, TaskError::Preprocess { stage: "validate", .. }),
        "{source}: {err}"
    );
    assert_eq!(err.kind(), FailureKind::Rejected);
    assert_eq!(service.calls(), 0, "{source} reached the analysis service");
    assert_eq!(coordinator.cache_stats().entry_count, 0);
}

#[tokio::test]
async fn private_and_metadata_literals_are_refused() {
    for source in [
        "http://127.0.0.1/a.png",
        "http://10.0.0.8/a.png",
        "http://172.16.4.4/a.png",
        "http://192.168.0.1/a.png",
        "http://169.254.169.254/latest/meta-data/",
        "http://[::1]/a.png",
        "http://[fe80::1]/a.png",
        "http://[::ffff:10.0.0.1]/a.png",
        "http://100.64.0.1/a.png",
        "http://0.0.0.0/a.png",
    ] {
        assert_refused(source).await;
    }
}

#[tokio::test]
async fn hostnames_resolving_inward_are_refused() {
    for source in [
        "https://intranet.example/logo.png",
        "https://rebind.example/logo.png",
        "https://mixed.example/logo.png",
        "http://metadata.google.internal/computeMetadata/v1/",
    ] {
        assert_refused(source).await;
    }
}

#[tokio::test]
async fn non_http_schemes_are_refused() {
    for source in ["file:///etc/passwd", "ftp://example.com/a.png", "gopher://example.com/"] {
        assert_refused(source).await;
    }
}

#[tokio::test]
async fn refusals_never_trip_the_download_breaker() {
    let (coordinator, _) =
        coordinator_with_resolver(config(), Arc::new(resolver()), ScriptedAnalysisService::new());
    for _ in 0..10 {
        let task = Task::new("https://intranet.example/logo.png", vec![TokenCategory::Color]);
        let err = coordinator.execute_task(&task).await.unwrap_err();
        assert!(matches!(err, TaskError::Preprocess { .. }));
    }
    assert!(coordinator.health_check().await.open_breakers.is_empty());
}
