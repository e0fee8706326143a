//! Mock implementations for testing.
//!
//! In-memory stand-ins for every collaborator the dispatch pipeline
//! consumes: transports, queue storage, log sinks, defaults and templates.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::address::Address;
use crate::config::{DefaultsProvider, TransportConfig};
use crate::delivery_log::{DeliveryLogRecord, LogSink};
use crate::errors::{MailError, MailResult};
use crate::message::Attachment;
use crate::queue::{DeliveryStatus, QueueField, QueueItem, QueuePersistence};
use crate::template::{TemplateData, TemplateRenderer};
use crate::transport::{MessageBody, RecipientKind, Transport, TransportFactory};

/// Everything a mock transport was given for one send.
#[derive(Debug, Clone, Default)]
pub struct SentEnvelope {
    /// SMTP settings, if `configure` was called.
    pub config: Option<TransportConfig>,
    /// Envelope sender.
    pub from: Option<Address>,
    /// Recipients in the order they were added.
    pub recipients: Vec<(RecipientKind, Address)>,
    /// Attachments.
    pub attachments: Vec<Attachment>,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub body: Option<MessageBody>,
    /// Message id returned by the transport.
    pub message_id: Option<String>,
}

impl SentEnvelope {
    /// Returns the addresses added with the given role.
    pub fn recipients_of(&self, kind: RecipientKind) -> Vec<&str> {
        self.recipients
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, address)| address.email())
            .collect()
    }
}

#[derive(Debug, Default)]
struct TransportState {
    sent: Mutex<Vec<SentEnvelope>>,
    failures: Mutex<VecDeque<MailError>>,
    delay: Mutex<Option<Duration>>,
    created: AtomicU64,
    attempts: AtomicU64,
}

/// Factory for [`MockTransport`]s sharing one record of sent envelopes.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    state: Arc<TransportState>,
}

impl MockTransportFactory {
    /// Creates a factory whose transports accept everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next send fail with `error`. Calls queue up.
    pub fn fail_next_with(&self, error: MailError) -> &Self {
        self.state.failures.lock().unwrap().push_back(error);
        self
    }

    /// Delays every send.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.state.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Returns the envelopes accepted so far.
    pub fn sent(&self) -> Vec<SentEnvelope> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Returns the number of send attempts, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of transports created.
    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockTransport {
            state: self.state.clone(),
            envelope: SentEnvelope::default(),
            last_error: None,
        })
    }
}

/// Transport that records the envelope instead of sending it.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<TransportState>,
    envelope: SentEnvelope,
    last_error: Option<String>,
}

#[async_trait]
impl Transport for MockTransport {
    fn configure(&mut self, config: &TransportConfig) -> MailResult<()> {
        config.validate()?;
        self.envelope.config = Some(config.clone());
        Ok(())
    }

    fn set_sender(&mut self, from: &Address) -> MailResult<()> {
        self.envelope.from = Some(from.clone());
        Ok(())
    }

    fn add_recipient(&mut self, kind: RecipientKind, address: &Address) -> MailResult<()> {
        self.envelope.recipients.push((kind, address.clone()));
        Ok(())
    }

    fn add_attachment(&mut self, attachment: &Attachment) -> MailResult<()> {
        self.envelope.attachments.push(attachment.clone());
        Ok(())
    }

    fn set_subject(&mut self, subject: &str) {
        self.envelope.subject = subject.to_string();
    }

    fn set_body(&mut self, body: &MessageBody) {
        self.envelope.body = Some(body.clone());
    }

    async fn send(&mut self) -> MailResult<String> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.state.failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            self.last_error = error.error_code();
            return Err(error);
        }

        let message_id = format!("<mock-{}@example.com>", attempt);
        self.envelope.message_id = Some(message_id.clone());
        self.state.sent.lock().unwrap().push(self.envelope.clone());
        Ok(message_id)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

/// Queue storage kept in memory, with compare-and-swap updates.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    items: Mutex<Vec<QueueItem>>,
    failing_updates: AtomicBool,
}

impl InMemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored item.
    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items.lock().unwrap().iter().find(|item| item.id == id).cloned()
    }

    /// Returns a copy of every stored item, in insertion order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.lock().unwrap().clone()
    }

    /// Returns the number of stored items.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every update fail with a persistence error.
    pub fn set_failing_updates(&self, failing: bool) {
        self.failing_updates.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueuePersistence for InMemoryQueueStore {
    async fn save(&self, item: &QueueItem) -> MailResult<()> {
        let mut items = self.items.lock().unwrap();
        if items.iter().any(|stored| stored.id == item.id) {
            return Err(MailError::persistence(format!("Queue item {} already exists", item.id)));
        }
        items.push(item.clone());
        Ok(())
    }

    async fn update(&self, item: &QueueItem, fields: &[QueueField], expected: DeliveryStatus) -> MailResult<()> {
        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(MailError::persistence("Mock update failure"));
        }

        let mut items = self.items.lock().unwrap();
        let stored = items
            .iter_mut()
            .find(|stored| stored.id == item.id)
            .ok_or_else(|| MailError::persistence(format!("Queue item {} not found", item.id)))?;

        if stored.status != expected {
            let message = format!(
                "Queue item {} is {}, expected {}",
                item.id, stored.status, expected
            );
            return Err(if stored.status.is_terminal() {
                MailError::already_processed(message)
            } else {
                MailError::state_conflict(message)
            });
        }

        for field in fields {
            match field {
                QueueField::Status => stored.status = item.status,
                QueueField::HtmlBody => stored.html_body = item.html_body.clone(),
                QueueField::TextBody => stored.text_body = item.text_body.clone(),
                QueueField::ProcessedAt => stored.processed_at = item.processed_at,
            }
        }
        Ok(())
    }

    async fn load_pending(&self, limit: usize) -> MailResult<Vec<QueueItem>> {
        let now = Utc::now();
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| matches!(item.status, DeliveryStatus::Pending | DeliveryStatus::Retry))
            .filter(|item| item.is_due(now))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Log sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<DeliveryLogRecord>>,
    failing: AtomicBool,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the appended records.
    pub fn records(&self) -> Vec<DeliveryLogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Makes every append fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, record: &DeliveryLogRecord) -> MailResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::persistence("Mock log sink failure"));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Defaults provider with fixed values. The sender can be changed at runtime.
#[derive(Debug)]
pub struct StaticDefaults {
    from: Mutex<String>,
    reply_to: Option<String>,
    log_enabled: bool,
    track_enabled: bool,
    smtp: TransportConfig,
}

impl StaticDefaults {
    /// Creates defaults with the given sender, logging on and tracking off.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: Mutex::new(from.into()),
            reply_to: None,
            log_enabled: true,
            track_enabled: false,
            smtp: TransportConfig::default(),
        }
    }

    /// Sets the default reply-to.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the logging default.
    pub fn with_log_enabled(mut self, enabled: bool) -> Self {
        self.log_enabled = enabled;
        self
    }

    /// Sets the SMTP settings.
    pub fn with_smtp(mut self, smtp: TransportConfig) -> Self {
        self.smtp = smtp;
        self
    }

    /// Changes the default sender.
    pub fn set_from(&self, from: impl Into<String>) {
        *self.from.lock().unwrap() = from.into();
    }
}

impl DefaultsProvider for StaticDefaults {
    fn default_from(&self) -> MailResult<Address> {
        Address::parse(&self.from.lock().unwrap())
    }

    fn default_reply_to(&self) -> MailResult<Option<Address>> {
        self.reply_to.as_deref().map(Address::parse).transpose()
    }

    fn default_log_enabled(&self) -> bool {
        self.log_enabled
    }

    fn default_track_enabled(&self) -> bool {
        self.track_enabled
    }

    fn smtp_config(&self) -> TransportConfig {
        self.smtp.clone()
    }
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder pattern"));

/// Template renderer substituting `{{key}}` placeholders from the data.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateRenderer {
    templates: HashMap<String, String>,
}

impl StaticTemplateRenderer {
    /// Creates a renderer without templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template.
    pub fn with_template(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(id.into(), source.into());
        self
    }
}

impl TemplateRenderer for StaticTemplateRenderer {
    fn render(&self, template_id: &str, data: &TemplateData) -> MailResult<String> {
        let source = self
            .templates
            .get(template_id)
            .ok_or_else(|| MailError::template(format!("Unknown template \"{}\"", template_id)))?;

        Ok(PLACEHOLDER
            .replace_all(source, |caps: &Captures<'_>| match data.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .into_owned())
    }
}
