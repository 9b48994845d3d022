//! # Cross-Resolving
//!
//! An SDK greeting that waits for the App side to approve it:
//!
//! ```text
//! SDK ──Greeting──▶ ask_for_approval ── prompt(resolveId) ──▶ test (as the user)
//!                        │ resolve().await                         │
//!                        ▼                                         ▼
//!                   say_hello ◀── approved ── CrossResolver ◀── App: ApproveGreeting
//! ```

#[cfg(test)]
mod tests {
    use crate::support::{connect, connect_with_config, ChannelId, EventType};
    use crab_channel::{ChannelConfig, ChannelError};
    use crab_kernel::{
        from_fn, CrossResolver, Kernel, KernelBuilder, KernelConfig, Middleware,
        MiddlewareResult, Next, Responder, RESOLVE_ID_FIELD,
    };
    use crab_telemetry::init_test_logging;
    use crab_types::{RawResponse, Request, RequestId};
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Deserialize)]
    struct Approval {
        approved: bool,
    }

    /// Suspends the greeting until the App side approves it. Each prompt is
    /// reported on `prompts` as the user interface would show it.
    fn ask_for_approval(
        cross: CrossResolver,
        prompts: mpsc::UnboundedSender<RequestId>,
    ) -> impl Middleware<EventType> {
        from_fn(
            move |request: Request<EventType>, respond: Responder, next: Option<Next<EventType>>| {
                let cross = cross.clone();
                let prompts = prompts.clone();
                async move {
                    let pending = cross.create_default(request.id.clone());
                    let _ = prompts.send(pending.resolve_id().clone());

                    let approval: Approval = pending.resolve().await?;
                    match (approval.approved, next) {
                        (true, Some(next)) => next.run(request).await,
                        _ => respond.reject("greeting was not approved")?,
                    }
                    Ok(())
                }
            },
        )
    }

    async fn say_hello(
        _request: Request<EventType>,
        respond: Responder,
        _next: Option<Next<EventType>>,
    ) -> MiddlewareResult {
        respond.respond(RawResponse::ok(json!({ "message": "hello from kernel" })))?;
        Ok(())
    }

    fn kernel(
        config: KernelConfig,
    ) -> (Kernel<ChannelId, EventType>, mpsc::UnboundedReceiver<RequestId>) {
        let (prompts, prompted) = mpsc::unbounded_channel();
        let builder = KernelBuilder::with_config(config);
        let cross = builder.cross_resolver();

        let kernel = builder
            .channel(ChannelId::Sdk)
            .handle(EventType::Greeting)
            .with(ask_for_approval(cross.clone(), prompts))
            .with(say_hello)
            .channel(ChannelId::App)
            .handle(EventType::ApproveGreeting)
            .with(cross.middleware::<EventType>())
            .run()
            .unwrap();
        (kernel, prompted)
    }

    fn approval(resolve_id: &RequestId, approved: bool) -> serde_json::Value {
        json!({
            "type": "ApproveGreeting",
            RESOLVE_ID_FIELD: resolve_id.as_str(),
            "approved": approved,
        })
    }

    #[tokio::test]
    async fn test_approved_greeting_resumes_pipeline() {
        init_test_logging();
        let (kernel, mut prompted) = kernel(KernelConfig::default());
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let greeting = {
            let channel = sdk.channel.clone();
            tokio::spawn(async move { channel.request(json!({ "type": "Greeting" })).await })
        };

        let resolve_id = prompted.recv().await.unwrap();
        assert!(kernel.cross_resolver().is_pending(&resolve_id));

        let ack = app.channel.request(approval(&resolve_id, true)).await.unwrap();
        assert!(ack.payload.is_empty());

        let response = greeting.await.unwrap().unwrap();
        assert_eq!(response.get("message"), Some(&json!("hello from kernel")));
        assert_eq!(kernel.cross_resolver().pending_count(), 0);
        assert_eq!(kernel.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_declined_greeting_is_rejected() {
        let (kernel, mut prompted) = kernel(KernelConfig::default());
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let greeting = {
            let channel = sdk.channel.clone();
            tokio::spawn(async move { channel.request(json!({ "type": "Greeting" })).await })
        };
        let resolve_id = prompted.recv().await.unwrap();
        app.channel.request(approval(&resolve_id, false)).await.unwrap();

        let err = greeting.await.unwrap().unwrap_err();
        assert_eq!(err, ChannelError::Remote("greeting was not approved".into()));
    }

    #[tokio::test]
    async fn test_unanswered_approval_times_out() {
        let (kernel, mut prompted) = kernel(KernelConfig {
            default_cross_resolving_timeout_ms: 50,
            ..Default::default()
        });
        let sdk = connect_with_config(
            &kernel,
            ChannelId::Sdk,
            ChannelConfig {
                default_timeout_ms: 2000,
                ..Default::default()
            },
        )
        .unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let greeting = {
            let channel = sdk.channel.clone();
            tokio::spawn(async move { channel.request(json!({ "type": "Greeting" })).await })
        };
        let resolve_id = prompted.recv().await.unwrap();

        match greeting.await.unwrap().unwrap_err() {
            ChannelError::Remote(message) => assert_eq!(
                message,
                format!("cross-resolving request {resolve_id} timed out after 50ms")
            ),
            other => panic!("expected remote error, got {other:?}"),
        }

        let late = app.channel.request(approval(&resolve_id, true)).await.unwrap_err();
        assert_eq!(
            late,
            ChannelError::Remote(format!("can not find context for cross-resolving {resolve_id}"))
        );
    }

    #[tokio::test]
    async fn test_expired_greeting_cancels_its_approval() {
        let (kernel, mut prompted) = kernel(KernelConfig {
            sweep_interval_ms: 10,
            ..Default::default()
        });
        let sdk = connect(&kernel, ChannelId::Sdk).unwrap();
        let app = connect(&kernel, ChannelId::App).unwrap();

        let greeting = {
            let channel = sdk.channel.clone();
            tokio::spawn(async move {
                channel
                    .request_with_timeout(
                        json!({ "id": "impatient", "type": "Greeting" }),
                        Duration::from_millis(30),
                    )
                    .await
            })
        };
        let resolve_id = prompted.recv().await.unwrap();

        let err = greeting.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ChannelError::Remote("request impatient timed out after 30ms".into())
        );
        assert!(!kernel.cross_resolver().is_pending(&resolve_id));

        let late = app.channel.request(approval(&resolve_id, true)).await.unwrap_err();
        assert!(matches!(late, ChannelError::Remote(ref m) if m.starts_with("can not find context")));
    }

    #[tokio::test]
    async fn test_resolution_without_id_is_rejected() {
        let (kernel, _prompted) = kernel(KernelConfig::default());
        let app = connect(&kernel, ChannelId::App).unwrap();

        let err = app
            .channel
            .request(json!({ "type": "ApproveGreeting", "approved": true }))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ChannelError::Remote("cross-resolving request is missing 'resolveId'".into())
        );
    }
}
