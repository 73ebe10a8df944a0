//! Shared setup for coordinator integration tests

#![allow(dead_code)]

use dtx_core::{PipelineConfig, RetryPolicy, ValidatorConfig};
use dtx_extract::ExtractionAgent;
use dtx_orchestrator::PipelineCoordinator;
use dtx_preprocess::{PreprocessingAgent, Resolver};
use dtx_test_utils::{fixtures, ScriptedAnalysisService};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

/// Config admitting the loopback test server, one short extraction attempt
pub fn loopback_config() -> PipelineConfig {
    let mut config = PipelineConfig {
        validator: ValidatorConfig::default().with_allowed_host("127.0.0.1"),
        ..PipelineConfig::default()
    };
    config.extraction.retry = RetryPolicy::no_retry();
    config.extraction.timeout_secs = 1;
    config
}

/// Serve the same small PNG under every path
pub fn serve_png() -> SocketAddr {
    let body = fixtures::png_bytes(32, 32, [200, 30, 30]);
    let route = warp::path::tail()
        .map(move |_| warp::reply::with_header(body.clone(), "content-type", "image/png"));
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

pub fn coordinator(
    config: PipelineConfig,
    service: ScriptedAnalysisService,
) -> (PipelineCoordinator, Arc<ScriptedAnalysisService>) {
    let preprocess = PreprocessingAgent::new(&config);
    build(config, preprocess, service)
}

pub fn coordinator_with_resolver(
    config: PipelineConfig,
    resolver: Arc<dyn Resolver>,
    service: ScriptedAnalysisService,
) -> (PipelineCoordinator, Arc<ScriptedAnalysisService>) {
    let preprocess = PreprocessingAgent::with_resolver(&config, resolver);
    build(config, preprocess, service)
}

fn build(
    config: PipelineConfig,
    preprocess: PreprocessingAgent,
    service: ScriptedAnalysisService,
) -> (PipelineCoordinator, Arc<ScriptedAnalysisService>) {
    let service = Arc::new(service);
    let extract = ExtractionAgent::with_service(config.extraction.clone(), service.clone()).unwrap();
    let coordinator = PipelineCoordinator::with_agents(config, preprocess, extract).unwrap();
    (coordinator, service)
}
