//! # Round Trips
//!
//! A correlator request crosses the loopback wire, runs through a kernel
//! pipeline and comes back as the caller's response.

#[cfg(test)]
mod tests {
    use crate::support::{connect, ChannelId, EventType};
    use crab_channel::ChannelError;
    use crab_kernel::{Kernel, KernelBuilder, MiddlewareResult, Next, Responder};
    use crab_telemetry::init_test_logging;
    use crab_types::{RawResponse, Request};
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::task::JoinSet;

    async fn say_hello(
        _request: Request<EventType>,
        respond: Responder,
        _next: Option<Next<EventType>>,
    ) -> MiddlewareResult {
        respond.respond(RawResponse::ok(json!({ "message": "hello" })))?;
        Ok(())
    }

    /// Answers with what it saw, so callers can check what crossed the wire.
    async fn echo(
        request: Request<EventType>,
        respond: Responder,
        _next: Option<Next<EventType>>,
    ) -> MiddlewareResult {
        respond.respond(RawResponse::ok(json!({
            "seen_id": request.id.as_str(),
            "seen_timeout": request.timeout,
            "seen_context": request.context,
            "seen_payload": request.payload,
        })))?;
        Ok(())
    }

    fn kernel() -> Kernel<ChannelId, EventType> {
        KernelBuilder::new()
            .channel(ChannelId::Sdk)
            .handle(EventType::Greeting)
            .with(say_hello)
            .channel(ChannelId::App)
            .handle(EventType::Logging)
            .with(echo)
            .run()
            .unwrap()
    }

    // =============================================================================
    // SINGLE MIDDLEWARE
    // =============================================================================

    #[tokio::test]
    async fn test_single_middleware_greeting() {
        init_test_logging();
        let kernel = kernel();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let response = sdk.channel.request(json!({ "type": "Greeting" })).await.unwrap();

        assert!(!response.request_id.as_str().is_empty());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "requestId": response.request_id.as_str(), "message": "hello" })
        );
        assert_eq!(sdk.channel.pending_count(), 0);
        assert_eq!(kernel.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_typed_decode_of_response() {
        #[derive(Debug, Deserialize)]
        struct Greeting {
            message: String,
        }

        let kernel = kernel();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let response = sdk.channel.request(json!({ "type": "Greeting" })).await.unwrap();
        let greeting: Greeting = response.decode().unwrap();

        assert_eq!(greeting.message, "hello");
    }

    #[tokio::test]
    async fn test_request_fields_cross_the_wire() {
        let kernel = kernel();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let response = app
            .channel
            .request_with_timeout(
                json!({
                    "id": "log-1",
                    "type": "Logging",
                    "context": { "tab": 7 },
                    "level": "info",
                }),
                Duration::from_millis(750),
            )
            .await
            .unwrap();

        assert_eq!(response.request_id.as_str(), "log-1");
        assert_eq!(response.get("seen_id"), Some(&json!("log-1")));
        assert_eq!(response.get("seen_timeout"), Some(&json!(750)));
        assert_eq!(response.get("seen_context"), Some(&json!({ "tab": 7 })));
        assert_eq!(response.get("seen_payload"), Some(&json!({ "level": "info" })));
    }

    // =============================================================================
    // ROUTING MISSES
    // =============================================================================

    #[tokio::test]
    async fn test_unknown_event_rejects_caller() {
        let kernel = kernel();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let err = sdk
            .channel
            .request(json!({ "type": "Logging" }))
            .await
            .unwrap_err();

        match err {
            ChannelError::Remote(message) => {
                assert!(message.contains("unsupported event"), "{message}");
                assert!(message.contains("Sdk"), "{message}");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_event_type_rejects_caller() {
        let kernel = kernel();
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();

        let err = sdk
            .channel
            .request(json!({ "type": "Shutdown" }))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Remote(ref m) if m.starts_with("invalid request")));
        assert_eq!(sdk.channel.pending_count(), 0);
    }

    // =============================================================================
    // CONCURRENCY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_get_their_own_answers() {
        let kernel = kernel();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let mut requests = JoinSet::new();
        for n in 0..64 {
            let channel = app.channel.clone();
            requests.spawn(async move {
                let response = channel
                    .request(json!({ "type": "Logging", "n": n }))
                    .await
                    .unwrap();
                (n, response)
            });
        }

        let mut answered = 0;
        while let Some(result) = requests.join_next().await {
            let (n, response) = result.unwrap();
            assert_eq!(response.get("seen_payload"), Some(&json!({ "n": n })));
            assert_eq!(
                response.get("seen_id"),
                Some(&Value::String(response.request_id.to_string()))
            );
            answered += 1;
        }

        assert_eq!(answered, 64);
        assert_eq!(app.channel.pending_count(), 0);
        assert_eq!(kernel.in_flight_count(), 0);
    }
}
