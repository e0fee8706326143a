//! Composition and immediate send scenarios.

use std::sync::Arc;

use integrations_mail_dispatch::mocks::{
    InMemoryQueueStore, MemoryLogSink, MockTransportFactory, StaticDefaults, StaticTemplateRenderer,
};
use integrations_mail_dispatch::{
    html_to_text, normalize, normalize_one, AddressInput, MailConfig, MailError, MailErrorKind,
    Mailer, RecipientKind, TransportConfig,
};
use rstest::rstest;
use serde_json::json;

struct Harness {
    defaults: Arc<StaticDefaults>,
    transports: Arc<MockTransportFactory>,
    logs: Arc<MemoryLogSink>,
    mailer: Mailer,
}

fn harness_with(defaults: StaticDefaults) -> Harness {
    let defaults = Arc::new(defaults);
    let transports = Arc::new(MockTransportFactory::new());
    let logs = Arc::new(MemoryLogSink::new());
    let templates = StaticTemplateRenderer::new()
        .with_template("welcome", "<h1>Welcome, {{name}}!</h1><style>h1{}</style>");
    let mailer = Mailer::builder()
        .defaults(defaults.clone())
        .templates(Arc::new(templates))
        .transports(transports.clone())
        .log_sink(logs.clone())
        .persistence(Arc::new(InMemoryQueueStore::new()))
        .build()
        .unwrap();
    Harness {
        defaults,
        transports,
        logs,
        mailer,
    }
}

fn harness() -> Harness {
    harness_with(StaticDefaults::new("Support <support@example.com>"))
}

#[rstest]
#[case("user@example.com")]
#[case("first.last+tag@sub.example.org")]
#[case("x@y.io")]
fn bare_string_normalizes_to_nameless_address(#[case] email: &str) {
    let address = normalize_one(email).unwrap();
    assert_eq!(address.email(), email);
    assert_eq!(address.name(), None);
}

#[rstest]
#[case(json!(""))]
#[case(json!(null))]
#[case(json!(17))]
#[case(json!(false))]
#[case(json!("not-an-address"))]
#[case(json!([{"email": "ok@example.com"}, "broken"]))]
fn invalid_inputs_fail_loudly(#[case] value: serde_json::Value) {
    let result = AddressInput::from_json(&value).and_then(|input| normalize(input));
    assert_eq!(result.unwrap_err().kind(), MailErrorKind::InvalidAddress);
}

#[test]
fn record_shape_is_single_and_collections_keep_order() {
    let single = AddressInput::from_json(&json!({"email": "a@example.com", "name": "A"})).unwrap();
    assert_eq!(normalize(single).unwrap().len(), 1);

    let many = AddressInput::from_json(&json!([
        {"email": "c@example.com"},
        "b@example.com",
        "Ann <a@example.com>"
    ]))
    .unwrap();
    let emails: Vec<String> = normalize(many)
        .unwrap()
        .into_iter()
        .map(|a| a.email)
        .collect();
    assert_eq!(emails, ["c@example.com", "b@example.com", "a@example.com"]);
}

#[test]
fn from_is_resolved_once() {
    let h = harness();
    let message = h.mailer.compose();

    let first = message.from().unwrap().clone();
    h.defaults.set_from("other@example.com");
    let second = message.from().unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(second.email(), "support@example.com");
    assert_eq!(h.mailer.compose().from().unwrap().email(), "other@example.com");
}

#[test]
fn html_to_text_reference_example() {
    let html = "<p>Hi<br>there</p><script>evil()</script>";
    assert_eq!(html_to_text(html), "Hi\nthere\n");
    assert_eq!(html_to_text(&html_to_text(html)), "Hi\nthere\n");
}

#[tokio::test]
async fn template_message_is_sent_as_alternative() {
    let h = harness_with(StaticDefaults::new("support@example.com").with_reply_to("help@example.com"));
    let mut message = h.mailer.compose();
    message.set_to("ada@example.com").unwrap().set_subject("Welcome");
    message.set_template_id("welcome");
    message.set_template_data(json!({"name": "Ada"})).unwrap();

    let result = h.mailer.send(&message).await.unwrap();
    assert!(result.success);

    let sent = h.transports.sent();
    let body = sent[0].body.as_ref().unwrap();
    assert_eq!(body.html, "<h1>Welcome, Ada!</h1><style>h1{}</style>");
    assert_eq!(body.text, "Welcome, Ada!\n");
    assert_eq!(sent[0].recipients_of(RecipientKind::ReplyTo), ["help@example.com"]);
    assert_eq!(h.logs.records()[0].message_id, result.transport_message_id);
}

#[tokio::test]
async fn best_effort_send_reports_failure() {
    let h = harness();
    h.transports
        .fail_next_with(MailError::from_smtp_reply(554, None, "Transaction failed"));

    let mut message = h.mailer.compose();
    message.set_to("a@example.com").unwrap().set_html_body("<p>x</p>");

    let result = h.mailer.send(&message).await.unwrap();
    assert!(!result.success);
    assert!(!result.retryable);
    assert_eq!(result.error_code.as_deref(), Some("554"));
    assert_eq!(h.mailer.metrics().snapshot().messages_failed, 1);
}

#[tokio::test]
async fn missing_template_is_a_composition_error() {
    let h = harness();
    let mut message = h.mailer.compose();
    message.set_to("a@example.com").unwrap();
    message.set_template_id("unknown");

    let err = h.mailer.send(&message).await.unwrap_err();
    assert_eq!(err.kind(), MailErrorKind::Template);
    assert_eq!(h.transports.created(), 0);
}

#[tokio::test]
async fn smtp_settings_come_from_configuration() {
    let config = MailConfig::from_json(
        r#"{
            "default_from": "noreply@example.com",
            "default_log": false,
            "smtp": {"enabled": true, "host": "mail.example.com", "port": 2525}
        }"#,
    )
    .unwrap();
    let transports = Arc::new(MockTransportFactory::new());
    let logs = Arc::new(MemoryLogSink::new());
    let mailer = Mailer::builder()
        .defaults(Arc::new(config))
        .transports(transports.clone())
        .log_sink(logs.clone())
        .persistence(Arc::new(InMemoryQueueStore::new()))
        .build()
        .unwrap();

    let mut message = mailer.compose();
    message.set_to("a@example.com").unwrap();
    mailer.send(&message).await.unwrap();

    let sent = transports.sent();
    let applied: &TransportConfig = sent[0].config.as_ref().unwrap();
    assert_eq!(applied.address(), "mail.example.com:2525");
    assert!(logs.records().is_empty());
}
