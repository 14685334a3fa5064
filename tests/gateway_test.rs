//! Integration tests for the gateway: caching, in-flight dedup,
//! cancellation handoff and shutdown.

mod common;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::join_all;

use common::{MockTransport, builder, deepseek_ok, error_status, gemini_ok};
use huginn::{
    Attachment, CompletionRequest, FinishReason, HuginnError, ProviderErrorKind, ProviderKind,
};

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn gemini_with_jpeg_attachment_is_cached() {
    let gemini = MockTransport::always(gemini_ok("a cat on a windowsill"));
    let deepseek = MockTransport::always(deepseek_ok("unused"));
    let gateway = builder(gemini.clone(), deepseek.clone()).build().unwrap();

    let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe0];
    jpeg.resize(5 * 1024, 0x42);
    let request = CompletionRequest::new("describe image")
        .attachment(Attachment::new("image/jpeg", jpeg.clone()));

    let first = gateway.submit(request.clone()).await.unwrap();
    assert_eq!(first.text, "a cat on a windowsill");
    assert_eq!(first.provider, ProviderKind::Gemini);
    assert_eq!(first.model, "gemini-1.5-flash-latest");
    assert_eq!(first.finish_reason, FinishReason::Completed);
    assert_eq!(gemini.calls(), 1);

    let wire = &gemini.requests()[0];
    assert!(
        wire.url
            .ends_with("/v1beta/models/gemini-1.5-flash-latest:generateContent")
    );
    assert_eq!(wire.header("x-goog-api-key"), Some("gemini-test-key"));
    let body: serde_json::Value = serde_json::from_slice(&wire.body).unwrap();
    let parts = &body["contents"][0]["parts"];
    assert_eq!(parts[0]["text"], "describe image");
    assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
    assert_eq!(parts[1]["inline_data"]["data"], STANDARD.encode(&jpeg));

    let second = gateway.submit(request).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(gemini.calls(), 1);
    assert_eq!(deepseek.calls(), 0);
}

#[tokio::test]
async fn different_params_are_different_requests() {
    let gemini = MockTransport::always(gemini_ok("ok"));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();

    let base = CompletionRequest::new("describe image");
    gateway.submit(base.clone()).await.unwrap();
    gateway
        .submit(base.clone().params(huginn::GenerationParams::default().temperature(0.3)))
        .await
        .unwrap();
    gateway
        .submit(base.idempotency_key("retake-2"))
        .await
        .unwrap();
    assert_eq!(gemini.calls(), 3);
}

#[tokio::test]
async fn naming_the_default_model_is_the_same_request() {
    let gemini = MockTransport::always(gemini_ok("ok"));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();

    let implicit = CompletionRequest::new("describe image");
    let explicit = implicit.clone().model("gemini-1.5-flash-latest");
    assert_eq!(gateway.fingerprint(&implicit), gateway.fingerprint(&explicit));

    gateway.submit(implicit).await.unwrap();
    gateway.submit(explicit).await.unwrap();
    assert_eq!(gemini.calls(), 1);

    gateway
        .submit(CompletionRequest::new("describe image").model("gemini-1.5-pro"))
        .await
        .unwrap();
    assert_eq!(gemini.calls(), 2);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let gemini = MockTransport::new(|n, _| {
        Ok(if n == 1 {
            error_status(400)
        } else {
            gemini_ok("second time lucky")
        })
    });
    let deepseek = MockTransport::always(deepseek_ok("unused"));
    let gateway = builder(gemini.clone(), deepseek.clone()).build().unwrap();
    let request = CompletionRequest::new("describe image");

    let err = gateway.submit(request.clone()).await.unwrap_err();
    assert_eq!(err.kind(), Some(ProviderErrorKind::InvalidRequest));
    assert!(gateway.cache().is_empty().await);

    let ok = gateway.submit(request.clone()).await.unwrap();
    assert_eq!(ok.text, "second time lucky");
    gateway.submit(request).await.unwrap();

    assert_eq!(gemini.calls(), 2);
    assert_eq!(deepseek.calls(), 0);
}

// ============================================================================
// In-flight dedup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_identical_submits_make_one_call() {
    let gemini = MockTransport::with_delay(Duration::from_millis(100), |_, _| {
        Ok(gemini_ok("shared answer"))
    });
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();
    let request = CompletionRequest::new("describe image");

    let results = join_all((0..10).map(|_| gateway.submit(request.clone()))).await;

    assert_eq!(gemini.calls(), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert!(gateway.in_flight().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_submits_share_the_owner_failure() {
    let gemini =
        MockTransport::with_delay(Duration::from_millis(100), |_, _| Ok(error_status(400)));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();
    let request = CompletionRequest::new("describe image");

    let results = join_all((0..5).map(|_| gateway.submit(request.clone()))).await;

    assert_eq!(gemini.calls(), 1);
    let first = results[0].as_ref().unwrap_err();
    assert_eq!(first.kind(), Some(ProviderErrorKind::InvalidRequest));
    for result in &results {
        assert_eq!(result.as_ref().unwrap_err(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn distinct_requests_run_in_parallel() {
    let gemini = MockTransport::with_delay(Duration::from_secs(1), |_, _| Ok(gemini_ok("ok")));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();

    let start = tokio::time::Instant::now();
    let results = join_all(
        (0..4).map(|i| gateway.submit(CompletionRequest::new(format!("prompt {i}")))),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(gemini.calls(), 4);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn cancelled_owner_hands_off_to_joiner() {
    let gemini =
        MockTransport::with_delay(Duration::from_millis(200), |_, _| Ok(gemini_ok("recovered")));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();
    let request = CompletionRequest::new("describe image");

    let owner = {
        let gateway = gateway.clone();
        let request = request.clone();
        tokio::spawn(async move { gateway.submit(request).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.in_flight().len(), 1);

    let joiner = {
        let gateway = gateway.clone();
        let request = request.clone();
        tokio::spawn(async move { gateway.submit(request).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());

    let result = joiner.await.unwrap().unwrap();
    assert_eq!(result.text, "recovered");
    assert_eq!(gemini.calls(), 2);
    assert!(gateway.in_flight().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_joiner_does_not_disturb_owner() {
    let gemini = MockTransport::with_delay(Duration::from_millis(200), |_, _| Ok(gemini_ok("ok")));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();
    let request = CompletionRequest::new("describe image");

    let owner = {
        let gateway = gateway.clone();
        let request = request.clone();
        tokio::spawn(async move { gateway.submit(request).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let joined = tokio::time::timeout(Duration::from_millis(10), gateway.submit(request)).await;
    assert!(joined.is_err());

    assert_eq!(owner.await.unwrap().unwrap().text, "ok");
    assert_eq!(gemini.calls(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_work_and_drains_in_flight() {
    let gemini = MockTransport::with_delay(Duration::from_millis(100), |_, _| Ok(gemini_ok("ok")));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .build()
        .unwrap();

    let in_flight = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.submit(CompletionRequest::new("first")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let shutdown = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(gateway.is_shutting_down());
    assert!(!shutdown.is_finished());

    assert_eq!(
        gateway.submit(CompletionRequest::new("second")).await,
        Err(HuginnError::ShuttingDown)
    );

    assert!(in_flight.await.unwrap().is_ok());
    shutdown.await.unwrap();
    assert!(gateway.in_flight().is_empty());
    assert_eq!(gemini.calls(), 1);
}

#[tokio::test]
async fn shutdown_when_idle_returns_immediately() {
    let gateway = builder(
        MockTransport::always(gemini_ok("ok")),
        MockTransport::always(deepseek_ok("ok")),
    )
    .build()
    .unwrap();
    gateway.shutdown().await;
    assert!(gateway.is_shutting_down());
}
