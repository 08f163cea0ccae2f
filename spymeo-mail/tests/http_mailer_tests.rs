//! `HttpMailer` against a local stand-in for the provider API

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use pretty_assertions::assert_eq;
use spymeo_mail::{
    EmailMessage, HttpMailer, HttpMailerConfig, JobStatus, MailConfig, MailError, MailQueue,
    Mailer,
};
use support::mock_provider::MockProvider;

fn mailer_for(provider: &MockProvider) -> HttpMailer {
    HttpMailer::from_config(&HttpMailerConfig {
        endpoint: provider.endpoint(),
        api_key: Some("re_test_key".to_string()),
        timeout_secs: Some(5),
    })
    .unwrap()
}

#[tokio::test]
async fn accepted_send_returns_provider_id() {
    let provider = MockProvider::start(200, r#"{"id":"4ef9a417-02e9-4d39-ad75-9611e0fcc33c"}"#)
        .await
        .unwrap();
    let mailer = mailer_for(&provider);

    let message = EmailMessage::builder()
        .to("praticien@example.com")
        .from("SPYMEO <noreply@spymeo.fr>")
        .subject("Nouvelle demande")
        .html("<p>Nouvelle demande de rendez-vous</p>")
        .tag("category", "booking")
        .build()
        .unwrap();

    let receipt = mailer.send(&message).await.unwrap();
    assert_eq!(receipt.provider_id, "4ef9a417-02e9-4d39-ad75-9611e0fcc33c");

    let received = provider.received();
    assert_eq!(received.len(), 1);

    let request = &received[0];
    assert_eq!(request.request_line, "POST /emails HTTP/1.1");
    assert_eq!(request.header("authorization"), Some("Bearer re_test_key"));
    assert_eq!(
        request.json(),
        serde_json::json!({
            "from": "SPYMEO <noreply@spymeo.fr>",
            "to": ["praticien@example.com"],
            "subject": "Nouvelle demande",
            "html": "<p>Nouvelle demande de rendez-vous</p>",
            "tags": [{"name": "category", "value": "booking"}],
        })
    );
}

#[tokio::test]
async fn rejected_send_carries_status_and_message() {
    let provider = MockProvider::start(
        422,
        r#"{"statusCode":422,"message":"Invalid `to` field.","name":"validation_error"}"#,
    )
    .await
    .unwrap();
    let mailer = mailer_for(&provider);

    let message = EmailMessage::builder()
        .to("not-an-address")
        .from("noreply@spymeo.fr")
        .subject("Test")
        .html("<p>Test</p>")
        .build()
        .unwrap();

    match mailer.send(&message).await {
        Err(MailError::Rejected { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "Invalid `to` field.");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mailer = HttpMailer::from_config(&HttpMailerConfig {
        endpoint: format!("http://{addr}/emails"),
        api_key: Some("re_test_key".to_string()),
        timeout_secs: Some(2),
    })
    .unwrap();

    let result = mailer.send(&support::message("client@example.com")).await;
    assert!(matches!(result, Err(MailError::Transport(_))));
}

#[tokio::test]
async fn rejected_messages_are_retried_then_failed() {
    let provider = MockProvider::start(500, r#"{"message":"internal"}"#)
        .await
        .unwrap();
    let config = MailConfig {
        enabled: true,
        retry: spymeo_mail::RetryPolicy {
            max_attempts: 2,
            base_backoff_ms: 10,
            max_backoff_ms: 10,
            jitter_ms: 0,
        },
        ..MailConfig::default()
    };
    let queue = MailQueue::new(config, std::sync::Arc::new(mailer_for(&provider))).unwrap();

    let id = queue.enqueue(support::message("client@example.com"));
    queue.wait_idle().await;

    let (status, job) = queue.job(&id).unwrap();
    assert_eq!(status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(
        job.last_error.as_deref(),
        Some("Rejected by provider (500): internal")
    );
    assert_eq!(provider.received().len(), 2);
}
