//! Integration tests against a running idea endpoint.
//! These tests require IDEAGEN_ENDPOINT and IDEAGEN_TOKEN in the environment to run.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ideagen::{EnvToken, HttpTransport, IdeaStream, Outcome, ReconnectPolicy, View};

    #[tokio::test]
    async fn test_live_idea_stream() {
        let endpoint = std::env::var("IDEAGEN_ENDPOINT").ok();
        if endpoint.is_none() || std::env::var("IDEAGEN_TOKEN").is_err() {
            eprintln!("Skipping test: IDEAGEN_ENDPOINT or IDEAGEN_TOKEN not set");
            return;
        }

        let transport =
            HttpTransport::new(&endpoint.unwrap()).expect("Failed to create transport");
        let stream = IdeaStream::mount(
            Arc::new(transport),
            Arc::new(EnvToken::new("IDEAGEN_TOKEN")),
            ReconnectPolicy {
                max_retries: Some(2),
                ..ReconnectPolicy::default()
            },
        );

        let outcome = tokio::time::timeout(Duration::from_secs(120), stream.wait_settled())
            .await
            .expect("Stream should settle within two minutes");
        assert_eq!(outcome, Outcome::Closed, "Stream should close normally");
        assert!(
            matches!(stream.current_view(), View::Content(ref idea) if !idea.is_empty()),
            "Stream should produce an idea"
        );
        stream.unmount().await;
    }
}
