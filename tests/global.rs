use std::{convert::Infallible, sync::OnceLock};

use http::{Request, Response};
use pretty_assertions::assert_eq;
use request_logger::{FutureExt, LogContext, RequestLoggingLayer};
use serde_json::json;
use tower::{Layer, ServiceExt, service_fn};

use crate::common::{CaptureSink, CapturedRecord};

pub mod common;

fn sink() -> &'static CaptureSink {
    static SINK: OnceLock<CaptureSink> = OnceLock::new();
    SINK.get_or_init(|| {
        let sink = CaptureSink::default();
        sink.logger()
            .default_record("service", "global")
            .extra_field("tenant")
            .install();
        sink
    })
}

fn find(message: &str) -> CapturedRecord {
    sink()
        .records()
        .into_iter()
        .find(|record| record.message == message)
        .unwrap()
}

#[test]
fn test_log_macros_use_entered_context() {
    let sink = sink();

    let _guard = LogContext::new()
        .with_request_id("req-sync")
        .with_field("tenant", "acme")
        .enter();
    log::info!(answer = 42; "Smoke on the water, fire in the sky");
    log::debug!("Production mode drops this one");

    let record = find("Smoke on the water, fire in the sky");
    assert_eq!(
        record.attributes,
        vec![
            ("service".to_owned(), json!("global")),
            ("request_id".to_owned(), json!("req-sync")),
            ("tenant".to_owned(), json!("acme")),
            ("answer".to_owned(), json!(42)),
        ]
    );
    assert!(
        !sink
            .messages()
            .iter()
            .any(|message| message == "Production mode drops this one")
    );
}

#[test]
fn test_log_macros_without_context() {
    sink();

    log::warn!("No context here");

    let record = find("No context here");
    assert_eq!(record.keys(), ["service"]);
}

#[tokio::test]
async fn test_log_macros_inside_async_context() {
    sink();

    async {
        tokio::task::yield_now().await;
        log::info!("Inside async context");
    }
    .in_log_context(LogContext::new().with_request_id("req-async"))
    .await;

    assert_eq!(find("Inside async context").request_id(), Some("req-async"));
}

#[tokio::test]
async fn test_log_macros_inside_handler() {
    sink();

    let layer = RequestLoggingLayer::new(sink().logger())
        .log_request_details(false)
        .log_completion(false);
    let service = layer.layer(service_fn(|_req: Request<()>| async {
        log::info!("Handler called through the log facade");
        Ok::<_, Infallible>(Response::new(()))
    }));
    service
        .oneshot(Request::get("/").body(()).unwrap())
        .await
        .unwrap();

    let record = find("Handler called through the log facade");
    assert!(record.request_id().is_some());
}
