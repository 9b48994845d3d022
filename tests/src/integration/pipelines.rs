//! # Pipeline Semantics
//!
//! Ordering, continuation, leading/trailing middlewares and failure handling,
//! observed from the caller's side of the wire.

#[cfg(test)]
mod tests {
    use crate::support::{connect, ChannelId, EventType};
    use crab_channel::ChannelError;
    use crab_kernel::{from_fn, KernelBuilder, Middleware, MiddlewareResult, Next, Responder};
    use crab_telemetry::init_test_logging;
    use crab_types::{RawResponse, Request};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    /// Middleware that records `label` and passes the request on.
    fn step(trace: &Trace, label: &'static str) -> Arc<dyn Middleware<EventType>> {
        let trace = Arc::clone(trace);
        Arc::new(from_fn(
            move |request: Request<EventType>, _respond: Responder, next: Option<Next<EventType>>| {
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().push(label);
                    if let Some(next) = next {
                        next.run(request).await;
                    }
                    Ok(())
                }
            },
        ))
    }

    /// Terminal middleware that records `label` and answers.
    fn answer(trace: &Trace, label: &'static str) -> Arc<dyn Middleware<EventType>> {
        let trace = Arc::clone(trace);
        Arc::new(from_fn(
            move |request: Request<EventType>, respond: Responder, next: Option<Next<EventType>>| {
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().push(label);
                    respond.respond(RawResponse::ok(json!({ "answered_by": label })))?;
                    if let Some(next) = next {
                        next.run(request).await;
                    }
                    Ok(())
                }
            },
        ))
    }

    async fn mark_checked(
        request: Request<EventType>,
        _respond: Responder,
        next: Option<Next<EventType>>,
    ) -> MiddlewareResult {
        if let Some(next) = next {
            next.run(request.with("checked", true)).await;
        }
        Ok(())
    }

    async fn greet_if_checked(
        request: Request<EventType>,
        respond: Responder,
        _next: Option<Next<EventType>>,
    ) -> MiddlewareResult {
        anyhow::ensure!(
            request.get("checked") == Some(&json!(true)),
            "request was not checked"
        );
        respond.respond(RawResponse::ok(json!({ "message": "hello" })))?;
        Ok(())
    }

    // =============================================================================
    // CONTINUATION
    // =============================================================================

    #[tokio::test]
    async fn test_next_carries_modified_request() {
        init_test_logging();
        let kernel = KernelBuilder::new()
            .channel(ChannelId::Sdk)
            .handle(EventType::Greeting)
            .with(mark_checked)
            .with(greet_if_checked)
            .run()
            .unwrap();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let response = sdk.channel.request(json!({ "type": "Greeting" })).await.unwrap();

        assert_eq!(response.get("message"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn test_leading_route_and_trailing_run_in_order() {
        let trace: Trace = Arc::default();
        let kernel = KernelBuilder::new()
            .with_shared(step(&trace, "leading"))
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with_shared(step(&trace, "decrypt"))
            .with_shared(answer(&trace, "log"))
            .channel(ChannelId::Sdk)
            .handle(EventType::Greeting)
            .with_shared(answer(&trace, "greet"))
            .all_routes()
            .with_shared(step(&trace, "audit"))
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let logged = app.channel.request(json!({ "type": "Logging" })).await.unwrap();
        // The trailing step runs after the answer has gone out
        tokio::task::yield_now().await;
        let logged_trace = std::mem::take(&mut *trace.lock());

        let greeted = sdk.channel.request(json!({ "type": "Greeting" })).await.unwrap();
        tokio::task::yield_now().await;
        let greeted_trace = std::mem::take(&mut *trace.lock());

        assert_eq!(logged.get("answered_by"), Some(&json!("log")));
        assert_eq!(greeted.get("answered_by"), Some(&json!("greet")));
        assert_eq!(logged_trace, vec!["leading", "decrypt", "log", "audit"]);
        assert_eq!(greeted_trace, vec!["leading", "greet", "audit"]);
    }

    #[tokio::test]
    async fn test_chain_stops_without_next() {
        async fn stop_here(
            _request: Request<EventType>,
            respond: Responder,
            _next: Option<Next<EventType>>,
        ) -> MiddlewareResult {
            respond.reject("blocked")?;
            Ok(())
        }

        let trace: Trace = Arc::default();
        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with(stop_here)
            .with_shared(answer(&trace, "never"))
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "type": "Logging" }))
            .await
            .unwrap_err();

        assert_eq!(err, ChannelError::Remote("blocked".into()));
        assert!(trace.lock().is_empty());
    }

    // =============================================================================
    // FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_middleware_error_reaches_caller_verbatim() {
        async fn deny(
            _request: Request<EventType>,
            _respond: Responder,
            _next: Option<Next<EventType>>,
        ) -> MiddlewareResult {
            anyhow::bail!("signature mismatch")
        }

        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with(deny)
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "type": "Logging" }))
            .await
            .unwrap_err();

        assert_eq!(err, ChannelError::Remote("signature mismatch".into()));
        assert_eq!(kernel.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_middleware_is_answered() {
        async fn explode(
            _request: Request<EventType>,
            _respond: Responder,
            _next: Option<Next<EventType>>,
        ) -> MiddlewareResult {
            panic!("index out of range")
        }

        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with(explode)
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "type": "Logging" }))
            .await
            .unwrap_err();

        assert_eq!(err, ChannelError::Remote("index out of range".into()));
    }

    #[tokio::test]
    async fn test_silent_pipeline_is_unresolved() {
        let trace: Trace = Arc::default();
        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with_shared(step(&trace, "only"))
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "id": "quiet", "type": "Logging" }))
            .await
            .unwrap_err();

        match err {
            ChannelError::Remote(message) => {
                assert!(message.contains("unresolved request quiet"), "{message}")
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_answer_is_dropped() {
        let trace: Trace = Arc::default();
        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with_shared(answer(&trace, "first"))
            .with_shared(answer(&trace, "second"))
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let response = app.channel.request(json!({ "type": "Logging" })).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(response.get("answered_by"), Some(&json!("first")));
        assert_eq!(*trace.lock(), vec!["first", "second"]);
        assert_eq!(app.channel.stats().total_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_empty_route_is_answered() {
        let kernel = KernelBuilder::new()
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .run()
            .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "type": "Logging" }))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Remote(ref m) if m.contains("no middleware registered")));
    }
}
