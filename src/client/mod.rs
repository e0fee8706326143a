//! High-level mail client.
//!
//! [`Mailer`] wires the collaborators together and provides:
//! - message composition with system defaults
//! - immediate, best-effort sends
//! - fan-out of a message into persisted per-recipient queue items
//! - processing of queued items

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{DefaultsProvider, TransportConfig};
use crate::delivery_log::{LogSink, NullLogSink};
use crate::errors::{MailError, MailResult};
use crate::gateway::{DispatchGateway, DispatchResult};
use crate::message::{generate_id, Message, MessageComposer};
use crate::observability::DispatchMetrics;
use crate::queue::{ProcessHooks, ProcessOutcome, QueueItem, QueuePersistence};
use crate::template::{NoTemplates, TemplateRenderer};
use crate::transport::TransportFactory;

/// Entry point for composing, sending and queueing mail.
pub struct Mailer {
    composer: MessageComposer,
    gateway: DispatchGateway,
    persistence: Arc<dyn QueuePersistence>,
    item_ttl: Option<chrono::Duration>,
}

impl Mailer {
    /// Creates a builder.
    pub fn builder() -> MailerBuilder {
        MailerBuilder::default()
    }

    /// Starts a new message bound to this mailer's defaults and templates.
    pub fn compose(&self) -> Message {
        self.composer.compose()
    }

    /// Sends a message immediately.
    ///
    /// Transport failures are reported in the returned [`DispatchResult`];
    /// only composition errors are returned as `Err`.
    pub async fn send(&self, message: &Message) -> MailResult<DispatchResult> {
        self.gateway.send(message, &self.transport_config()).await
    }

    /// Fans a message out into one pending queue item per `to` recipient.
    ///
    /// Bodies, sender and campaign are resolved once and shared by every
    /// item. A queue id is generated and stored on the message when it has
    /// none. `cc` and `bcc` recipients are not queued. Nothing is saved when
    /// the message has no `to` recipient or fails to resolve.
    pub async fn queue(
        &self,
        message: &mut Message,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> MailResult<Vec<QueueItem>> {
        message.ensure_sendable()?;
        let from = message.from()?.clone();
        let html_body = message.html_body()?.to_string();
        let text_body = message.text_body()?.to_string();
        let campaign_id = message.campaign_id().to_string();

        let queue_id = match message.queue_id() {
            Some(queue_id) => queue_id.to_string(),
            None => {
                let queue_id = generate_id();
                message.set_queue_id(queue_id.clone());
                queue_id
            }
        };

        let queued_at = Utc::now();
        let items: Vec<QueueItem> = message
            .to()
            .iter()
            .map(|to| QueueItem {
                id: generate_id(),
                to: to.clone(),
                from: from.clone(),
                subject: message.subject().to_string(),
                html_body: Some(html_body.clone()),
                text_body: Some(text_body.clone()),
                campaign_id: campaign_id.clone(),
                queue_id: queue_id.clone(),
                scheduled_at,
                status: Default::default(),
                queued_at,
                processed_at: None,
                expires_at: self.item_ttl.map(|ttl| queued_at + ttl),
            })
            .collect();

        for item in &items {
            self.persistence.save(item).await?;
        }

        self.metrics().record_queued(items.len());
        debug!(queue_id = %queue_id, campaign_id = %campaign_id, items = items.len(), "Message queued");
        Ok(items)
    }

    /// Processes a queued item. See [`QueueItem::process`].
    pub async fn process(&self, item: &mut QueueItem, hooks: ProcessHooks<'_>) -> MailResult<ProcessOutcome> {
        item.process(self, hooks).await
    }

    /// Returns the transport settings currently provided by the defaults.
    pub fn transport_config(&self) -> TransportConfig {
        self.composer.defaults().smtp_config()
    }

    /// Returns the message composer.
    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    /// Returns the dispatch gateway.
    pub fn gateway(&self) -> &DispatchGateway {
        &self.gateway
    }

    /// Returns the queue persistence.
    pub fn persistence(&self) -> &dyn QueuePersistence {
        self.persistence.as_ref()
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &DispatchMetrics {
        self.gateway.metrics()
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("gateway", &self.gateway)
            .field("item_ttl", &self.item_ttl)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Mailer`].
#[derive(Default)]
pub struct MailerBuilder {
    defaults: Option<Arc<dyn DefaultsProvider>>,
    templates: Option<Arc<dyn TemplateRenderer>>,
    transports: Option<Arc<dyn TransportFactory>>,
    log_sink: Option<Arc<dyn LogSink>>,
    persistence: Option<Arc<dyn QueuePersistence>>,
    metrics: Option<Arc<DispatchMetrics>>,
    item_ttl: Option<Duration>,
}

impl MailerBuilder {
    /// Sets the defaults provider (required).
    pub fn defaults(mut self, defaults: Arc<dyn DefaultsProvider>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Sets the template renderer. Without one, template rendering fails.
    pub fn templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Sets the transport factory (required).
    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Sets the delivery log sink. Without one, records are discarded.
    pub fn log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(log_sink);
        self
    }

    /// Sets the queue persistence (required).
    pub fn persistence(mut self, persistence: Arc<dyn QueuePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Shares a metrics collector.
    pub fn metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Expires queued items `ttl` after they are queued.
    pub fn item_ttl(mut self, ttl: Duration) -> Self {
        self.item_ttl = Some(ttl);
        self
    }

    /// Builds the mailer.
    pub fn build(self) -> MailResult<Mailer> {
        let defaults = self
            .defaults
            .ok_or_else(|| MailError::configuration("A defaults provider is required"))?;
        let transports = self
            .transports
            .ok_or_else(|| MailError::configuration("A transport factory is required"))?;
        let persistence = self
            .persistence
            .ok_or_else(|| MailError::configuration("Queue persistence is required"))?;
        let item_ttl = self
            .item_ttl
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| MailError::configuration("Queue item TTL is out of range").with_cause(e))?;

        defaults.smtp_config().validate()?;

        let templates = self.templates.unwrap_or_else(|| Arc::new(NoTemplates));
        let log_sink = self.log_sink.unwrap_or_else(|| Arc::new(NullLogSink));
        let mut gateway = DispatchGateway::new(transports, log_sink);
        if let Some(metrics) = self.metrics {
            gateway = gateway.with_metrics(metrics);
        }

        Ok(Mailer {
            composer: MessageComposer::new(defaults, templates),
            gateway,
            persistence,
            item_ttl,
        })
    }
}

impl std::fmt::Debug for MailerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailerBuilder")
            .field("defaults", &self.defaults.is_some())
            .field("templates", &self.templates.is_some())
            .field("transports", &self.transports.is_some())
            .field("log_sink", &self.log_sink.is_some())
            .field("persistence", &self.persistence.is_some())
            .field("item_ttl", &self.item_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;
    use crate::mocks::{InMemoryQueueStore, MockTransportFactory, StaticDefaults};
    use crate::queue::DeliveryStatus;

    fn mailer(store: Arc<InMemoryQueueStore>) -> Mailer {
        Mailer::builder()
            .defaults(Arc::new(StaticDefaults::new("sender@example.com")))
            .transports(Arc::new(MockTransportFactory::new()))
            .persistence(store)
            .item_ttl(Duration::from_secs(3600))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = Mailer::builder().build().unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);

        let err = Mailer::builder()
            .defaults(Arc::new(StaticDefaults::new("sender@example.com")))
            .transports(Arc::new(MockTransportFactory::new()))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_queue_fans_out_per_to_recipient() {
        let store = Arc::new(InMemoryQueueStore::new());
        let mailer = mailer(store.clone());

        let mut message = mailer.compose();
        message
            .set_to(vec!["a@example.com", "b@example.com"])
            .unwrap()
            .set_cc("c@example.com")
            .unwrap()
            .set_subject("Weekly")
            .set_html_body("<h1>News</h1>");

        let items = mailer.queue(&mut message, None).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(store.len(), 2);

        let queue_id = message.queue_id().unwrap().to_string();
        for item in &items {
            assert_eq!(item.queue_id, queue_id);
            assert_eq!(item.campaign_id, message.campaign_id());
            assert_eq!(item.from.email(), "sender@example.com");
            assert_eq!(item.status, DeliveryStatus::Pending);
            assert_eq!(item.html_body.as_deref(), Some("<h1>News</h1>"));
            assert_eq!(item.text_body.as_deref(), Some("News\n"));
            assert!(item.expires_at.is_some());
        }
        assert_ne!(items[0].id, items[1].id);
        assert_eq!(items[1].to.email(), "b@example.com");
    }

    #[tokio::test]
    async fn test_queue_keeps_explicit_queue_id() {
        let store = Arc::new(InMemoryQueueStore::new());
        let mailer = mailer(store);

        let mut message = mailer.compose();
        message.set_to("a@example.com").unwrap().set_queue_id("newsletter-42");

        let items = mailer.queue(&mut message, None).await.unwrap();
        assert_eq!(items[0].queue_id, "newsletter-42");
    }

    #[tokio::test]
    async fn test_queue_without_to_saves_nothing() {
        let store = Arc::new(InMemoryQueueStore::new());
        let mailer = mailer(store.clone());

        let mut message = mailer.compose();
        message.set_bcc("hidden@example.com").unwrap();

        let err = mailer.queue(&mut message, None).await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Composition);
        assert_eq!(store.len(), 0);
        assert!(message.queue_id().is_none());
    }
}
