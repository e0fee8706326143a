//! End-to-end queue processing scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use integrations_mail_dispatch::mocks::{
    InMemoryQueueStore, MemoryLogSink, MockTransportFactory, StaticDefaults,
};
use integrations_mail_dispatch::{
    Address, DeliveryStatus, MailError, Mailer, ProcessHooks, ProcessOutcome, QueueItem,
    QueuePersistence,
};
use rstest::rstest;

struct Harness {
    transports: Arc<MockTransportFactory>,
    store: Arc<InMemoryQueueStore>,
    logs: Arc<MemoryLogSink>,
    mailer: Mailer,
}

fn harness() -> Harness {
    let transports = Arc::new(MockTransportFactory::new());
    let store = Arc::new(InMemoryQueueStore::new());
    let logs = Arc::new(MemoryLogSink::new());
    let mailer = Mailer::builder()
        .defaults(Arc::new(StaticDefaults::new("system@example.com")))
        .transports(transports.clone())
        .log_sink(logs.clone())
        .persistence(store.clone())
        .build()
        .unwrap();
    Harness {
        transports,
        store,
        logs,
        mailer,
    }
}

async fn hi_item(h: &Harness) -> QueueItem {
    let item = QueueItem::new(
        "queue-1",
        "campaign-1",
        Address::new("b@example.com").unwrap(),
        Address::new("a@example.com").unwrap(),
        "Hi",
    )
    .with_html_body("<b>Hi</b>");
    h.store.save(&item).await.unwrap();
    item
}

#[tokio::test]
async fn delivered_item_is_cleared_and_logged_once() {
    let h = harness();
    let mut item = hi_item(&h).await;

    let outcome = h.mailer.process(&mut item, ProcessHooks::new()).await.unwrap();

    assert_eq!(outcome.succeeded(), Some(true));
    assert_eq!(item.status, DeliveryStatus::Success);
    assert_eq!(item.html_body, None);
    assert_eq!(item.text_body, None);

    let stored = h.store.get(&item.id).unwrap();
    assert_eq!(stored.status, DeliveryStatus::Success);
    assert_eq!(stored.html_body, None);
    assert_eq!(stored.text_body, None);

    let records = h.logs.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].to, "a@example.com");
    assert_eq!(records[0].from, "b@example.com");
    assert_eq!(records[0].queue_id.as_deref(), Some("queue-1"));
    assert_eq!(records[0].campaign_id, "campaign-1");
    assert!(records[0].message_id.is_some());

    let sent = h.transports.sent();
    assert_eq!(sent[0].body.as_ref().unwrap().text, "Hi\n");
}

#[tokio::test]
async fn transient_failure_moves_item_to_retry() {
    let h = harness();
    let mut item = hi_item(&h).await;
    h.transports
        .fail_next_with(MailError::from_smtp_reply(421, Some("4.7.0"), "Try again later"));

    let failures = AtomicUsize::new(0);
    let successes = AtomicUsize::new(0);
    let hooks = ProcessHooks::new()
        .on_failure(|_| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
        .on_success(|_| {
            successes.fetch_add(1, Ordering::SeqCst);
        });
    let outcome = h.mailer.process(&mut item, hooks).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Retry);
    assert_eq!(item.status, DeliveryStatus::Retry);
    assert_eq!(item.html_body.as_deref(), Some("<b>Hi</b>"));
    assert_eq!(item.text_body, None);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 0);

    let stored = h.store.get(&item.id).unwrap();
    assert_eq!(stored.status, DeliveryStatus::Retry);
    assert_eq!(stored.html_body.as_deref(), Some("<b>Hi</b>"));
    assert_eq!(h.logs.records()[0].error_code.as_deref(), Some("421"));
}

#[rstest]
#[case(421, None)]
#[case(454, None)]
#[case(471, None)]
#[case(554, Some("4.7.1"))]
#[case(550, Some("4.2.2"))]
#[tokio::test]
async fn transient_replies_move_item_to_retry(#[case] code: u16, #[case] enhanced: Option<&str>) {
    let h = harness();
    let mut item = hi_item(&h).await;
    h.transports
        .fail_next_with(MailError::from_smtp_reply(code, enhanced, "Temporary failure"));

    let outcome = h.mailer.process(&mut item, ProcessHooks::new()).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Retry);
    assert_eq!(item.status, DeliveryStatus::Retry);
    assert_eq!(h.store.get(&item.id).unwrap().status, DeliveryStatus::Retry);
}

#[tokio::test]
async fn terminal_items_are_never_resent() {
    let h = harness();
    let mut delivered = hi_item(&h).await;
    h.mailer.process(&mut delivered, ProcessHooks::new()).await.unwrap();

    let mut failed = hi_item(&h).await;
    h.transports
        .fail_next_with(MailError::from_smtp_reply(550, Some("5.1.1"), "No such user"));
    h.mailer.process(&mut failed, ProcessHooks::new()).await.unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);

    for item in [&mut delivered, &mut failed] {
        let before = item.clone();
        let calls = AtomicUsize::new(0);
        let hooks = ProcessHooks::new()
            .on_always(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .on_failure(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });

        let outcome = h.mailer.process(item, hooks).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);
        assert_eq!(outcome.succeeded(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*item, before);
    }

    assert_eq!(h.transports.attempts(), 2);
    assert_eq!(h.logs.records().len(), 2);
}

#[tokio::test]
async fn queued_message_round_trip() {
    let h = harness();
    let mut message = h.mailer.compose();
    message
        .set_to(vec!["a@example.com", "Bee <b@example.com>"])
        .unwrap()
        .add_bcc("audit@example.com")
        .unwrap()
        .set_subject("Digest")
        .set_html_body("<h1>Digest</h1>\n<p>Line one<br>Line two</p>");

    let items = h.mailer.queue(&mut message, None).await.unwrap();
    assert_eq!(items.len(), 2);

    let pending = h.store.load_pending(10).await.unwrap();
    assert_eq!(pending.len(), 2);

    for mut item in pending {
        let outcome = h.mailer.process(&mut item, ProcessHooks::new()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Delivered);
    }

    let sent = h.transports.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].recipients_of(integrations_mail_dispatch::RecipientKind::To), ["b@example.com"]);
    assert_eq!(sent[0].body.as_ref().unwrap().text, "Digest\nLine one\nLine two\n");
    assert!(h.store.items().iter().all(|item| item.status == DeliveryStatus::Success));
    assert_eq!(h.mailer.metrics().snapshot().items_queued, 2);
}
