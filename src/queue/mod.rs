//! Deferred delivery.
//!
//! A [`QueueItem`] carries one recipient's worth of a composed message and a
//! delivery state machine:
//!
//! ```text
//! Pending ──► Success   (terminal, bodies cleared)
//!    │  └───► Failed    (terminal)
//!    └──────► Retry ──► Success | Failed | Retry
//! ```
//!
//! Every transition is persisted with a compare-and-swap on the previous
//! status, so two workers racing on the same item are detected instead of
//! both sending.

pub mod manager;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::address::Address;
use crate::client::Mailer;
use crate::errors::MailResult;
use crate::gateway::DispatchResult;
use crate::message::{Message, MessageComposer};

pub use manager::{BatchReport, QueueManager, QueueManagerConfig};

/// Delivery status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first attempt.
    #[default]
    Pending,
    /// Delivered.
    Success,
    /// Permanently failed.
    Failed,
    /// Failed transiently; eligible for another attempt.
    Retry,
}

impl DeliveryStatus {
    /// Returns true for statuses that are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Success => write!(f, "success"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Retry => write!(f, "retry"),
        }
    }
}

/// Persisted fields a transition may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueField {
    /// `status`.
    Status,
    /// `html_body`.
    HtmlBody,
    /// `text_body`.
    TextBody,
    /// `processed_at`.
    ProcessedAt,
}

/// Fields written when an item is delivered; bodies are cleared with the status.
const DELIVERED_FIELDS: &[QueueField] = &[
    QueueField::Status,
    QueueField::HtmlBody,
    QueueField::TextBody,
    QueueField::ProcessedAt,
];

const FAILED_FIELDS: &[QueueField] = &[QueueField::Status, QueueField::ProcessedAt];

/// Storage for queue items.
#[async_trait]
pub trait QueuePersistence: Send + Sync {
    /// Stores a new item.
    async fn save(&self, item: &QueueItem) -> MailResult<()>;

    /// Writes `fields` of `item` in one atomic operation, provided the stored
    /// status still equals `expected`.
    ///
    /// Fails with `AlreadyProcessed` when the stored item is terminal and with
    /// `StateConflict` on any other status mismatch.
    async fn update(&self, item: &QueueItem, fields: &[QueueField], expected: DeliveryStatus) -> MailResult<()>;

    /// Loads up to `limit` items in `Pending` or `Retry` whose schedule is due.
    async fn load_pending(&self, limit: usize) -> MailResult<Vec<QueueItem>>;
}

/// One recipient's worth of a queued message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Item identifier.
    pub id: String,
    /// Recipient.
    pub to: Address,
    /// Sender.
    pub from: Address,
    /// Subject line.
    pub subject: String,
    /// HTML body; cleared once delivered.
    pub html_body: Option<String>,
    /// Plain-text body; cleared once delivered.
    pub text_body: Option<String>,
    /// Campaign identifier.
    pub campaign_id: String,
    /// Identifier shared by all items fanned out from one message.
    pub queue_id: String,
    /// Earliest time the item may be sent.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Delivery status.
    pub status: DeliveryStatus,
    /// When the item was created.
    pub queued_at: DateTime<Utc>,
    /// When the item last changed status.
    pub processed_at: Option<DateTime<Utc>>,
    /// After this time the item is failed without an attempt.
    pub expires_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Creates a pending item.
    pub fn new(
        queue_id: impl Into<String>,
        campaign_id: impl Into<String>,
        from: Address,
        to: Address,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::message::generate_id(),
            to,
            from,
            subject: subject.into(),
            html_body: None,
            text_body: None,
            campaign_id: campaign_id.into(),
            queue_id: queue_id.into(),
            scheduled_at: None,
            status: DeliveryStatus::Pending,
            queued_at: Utc::now(),
            processed_at: None,
            expires_at: None,
        }
    }

    /// Sets both bodies.
    pub fn with_bodies(mut self, html: impl Into<String>, text: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self.text_body = Some(text.into());
        self
    }

    /// Sets the HTML body only; the text body is derived when sent.
    pub fn with_html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    /// Defers the item until `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Expires the item at `at`.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Returns true when the schedule allows sending at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Returns true when the item expired at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Rebuilds the message this item was fanned out from.
    pub fn to_message(&self, composer: &MessageComposer) -> MailResult<Message> {
        let mut message = composer.compose();
        message.set_to(&self.to)?.set_from(&self.from)?;
        message
            .set_subject(self.subject.as_str())
            .set_campaign_id(self.campaign_id.as_str())
            .set_queue_id(self.queue_id.as_str());
        if let Some(html) = &self.html_body {
            message.set_html_body(html.as_str());
        }
        if let Some(text) = &self.text_body {
            message.set_text_body(text.as_str());
        }
        Ok(message)
    }

    async fn dispatch(&self, mailer: &Mailer) -> MailResult<DispatchResult> {
        let message = self.to_message(mailer.composer())?;
        mailer.gateway().send(&message, &mailer.transport_config()).await
    }

    /// Attempts delivery and records the transition.
    ///
    /// A terminal item is left untouched and yields
    /// [`ProcessOutcome::AlreadyProcessed`] without running any hook.
    /// Otherwise the new status (and, on success, the cleared bodies) is
    /// persisted atomically before hooks run: `on_success` or `on_failure`
    /// first, then `on_always`. If persisting fails the item keeps its
    /// previous state, no hook runs and the error is returned.
    ///
    /// Delivery failures never surface as `Err`. Transport failures become
    /// `Retry` or `Failed`; an item whose message cannot be composed (for
    /// example a malformed default sender) becomes `Failed`. Only
    /// persistence errors are returned.
    pub async fn process(&mut self, mailer: &Mailer, hooks: ProcessHooks<'_>) -> MailResult<ProcessOutcome> {
        if self.status.is_terminal() {
            debug!(item_id = %self.id, status = %self.status, "Queue item already processed");
            mailer.metrics().record_already_processed();
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let result = match self.dispatch(mailer).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    item_id = %self.id,
                    queue_id = %self.queue_id,
                    error = %err,
                    "Queue item could not be composed, failing it"
                );
                DispatchResult {
                    success: false,
                    transport_message_id: None,
                    error_code: err.error_code(),
                    retryable: false,
                }
            }
        };

        let mut next = self.clone();
        next.processed_at = Some(Utc::now());
        let (outcome, fields) = if result.success {
            next.status = DeliveryStatus::Success;
            next.html_body = None;
            next.text_body = None;
            (ProcessOutcome::Delivered, DELIVERED_FIELDS)
        } else if result.retryable {
            next.status = DeliveryStatus::Retry;
            (ProcessOutcome::Retry, FAILED_FIELDS)
        } else {
            next.status = DeliveryStatus::Failed;
            (ProcessOutcome::Failed, FAILED_FIELDS)
        };

        if let Err(err) = mailer.persistence().update(&next, fields, self.status).await {
            error!(
                item_id = %self.id,
                queue_id = %self.queue_id,
                from_status = %self.status,
                to_status = %next.status,
                error = %err,
                "Failed to persist queue item transition"
            );
            return Err(err);
        }

        debug!(
            item_id = %self.id,
            queue_id = %self.queue_id,
            from_status = %self.status,
            to_status = %next.status,
            "Queue item processed"
        );
        *self = next;
        mailer.metrics().record_processed();
        hooks.run(outcome, self);
        Ok(outcome)
    }
}

/// Result of [`QueueItem::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Delivered; the item is now `Success`.
    Delivered,
    /// Permanently failed; the item is now `Failed`.
    Failed,
    /// Transiently failed; the item is now `Retry`.
    Retry,
    /// The item was already terminal; nothing happened.
    AlreadyProcessed,
}

impl ProcessOutcome {
    /// `Some(true)` on delivery, `Some(false)` on failure, `None` for a no-op.
    pub fn succeeded(&self) -> Option<bool> {
        match self {
            ProcessOutcome::Delivered => Some(true),
            ProcessOutcome::Failed | ProcessOutcome::Retry => Some(false),
            ProcessOutcome::AlreadyProcessed => None,
        }
    }
}

type Hook<'a> = Box<dyn FnOnce(&QueueItem) + Send + 'a>;

/// Callbacks run after a transition has been persisted.
#[derive(Default)]
pub struct ProcessHooks<'a> {
    on_always: Option<Hook<'a>>,
    on_success: Option<Hook<'a>>,
    on_failure: Option<Hook<'a>>,
}

impl<'a> ProcessHooks<'a> {
    /// Creates an empty set of hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs after every transition, last.
    pub fn on_always(mut self, hook: impl FnOnce(&QueueItem) + Send + 'a) -> Self {
        self.on_always = Some(Box::new(hook));
        self
    }

    /// Runs after a delivery.
    pub fn on_success(mut self, hook: impl FnOnce(&QueueItem) + Send + 'a) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Runs after a transition to `Retry` or `Failed`.
    pub fn on_failure(mut self, hook: impl FnOnce(&QueueItem) + Send + 'a) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    fn run(self, outcome: ProcessOutcome, item: &QueueItem) {
        let specific = match outcome.succeeded() {
            Some(true) => self.on_success,
            Some(false) => self.on_failure,
            None => return,
        };
        if let Some(hook) = specific {
            hook(item);
        }
        if let Some(hook) = self.on_always {
            hook(item);
        }
    }
}

impl fmt::Debug for ProcessHooks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHooks")
            .field("on_always", &self.on_always.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
