//! Single send attempts against a transport.
//!
//! [`DispatchGateway::send`] is best-effort: once a message is composed, any
//! failure raised by the transport is caught, logged and reported through
//! [`DispatchResult`]. Only composition problems (no recipient, unresolvable
//! sender, template failure) come back as `Err`, and they do so before a
//! transport is created.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::address::Address;
use crate::config::TransportConfig;
use crate::delivery_log::{DeliveryLogRecord, LogSink};
use crate::errors::{ErrorSeverity, MailError, MailResult};
use crate::message::Message;
use crate::observability::{DispatchMetrics, Timer};
use crate::transport::{MessageBody, RecipientKind, Transport, TransportFactory};

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Whether the transport accepted the message.
    pub success: bool,
    /// Message id assigned by the transport.
    pub transport_message_id: Option<String>,
    /// Transport error code, for failed attempts.
    pub error_code: Option<String>,
    /// Whether the failure is worth retrying later.
    pub retryable: bool,
}

impl DispatchResult {
    fn delivered(message_id: String) -> Self {
        Self {
            success: true,
            transport_message_id: Some(message_id),
            error_code: None,
            retryable: false,
        }
    }

    fn failed(error: &MailError, last_error: Option<String>) -> Self {
        Self {
            success: false,
            transport_message_id: None,
            error_code: error.error_code().or(last_error),
            retryable: error.is_retryable(),
        }
    }
}

/// Fully resolved envelope fields, computed before any transport exists.
struct Envelope<'a> {
    from: &'a Address,
    reply_to: Option<&'a Address>,
    body: MessageBody,
}

impl<'a> Envelope<'a> {
    fn resolve(message: &'a Message) -> MailResult<Self> {
        message.ensure_sendable()?;
        Ok(Self {
            from: message.from()?,
            reply_to: message.reply_to()?,
            body: MessageBody::alternative(message.html_body()?, message.text_body()?),
        })
    }
}

/// Orchestrates send attempts and delivery logging.
pub struct DispatchGateway {
    transports: Arc<dyn TransportFactory>,
    log_sink: Arc<dyn LogSink>,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchGateway {
    /// Creates a gateway.
    pub fn new(transports: Arc<dyn TransportFactory>, log_sink: Arc<dyn LogSink>) -> Self {
        Self {
            transports,
            log_sink,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Shares a metrics collector with the gateway.
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Sends a message.
    ///
    /// SMTP settings are applied only when `config.enabled` is set; otherwise
    /// the transport keeps its local submission path. When the message has
    /// logging enabled, one delivery log record is appended per `to`, `cc`
    /// and `bcc` recipient, whether the attempt succeeded or not.
    pub async fn send(&self, message: &Message, config: &TransportConfig) -> MailResult<DispatchResult> {
        let envelope = Envelope::resolve(message)?;
        let timer = Timer::start("dispatch_send");

        debug!(
            campaign_id = message.campaign_id(),
            recipients = message.recipients().count(),
            attachments = message.attachments().len(),
            track = message.track_enabled(),
            "Sending message"
        );

        let mut transport = self.transports.create();
        let outcome = Self::deliver(transport.as_mut(), message, &envelope, config).await;
        let result = match outcome {
            Ok(message_id) => {
                debug!(campaign_id = message.campaign_id(), message_id = %message_id, "Message delivered");
                self.metrics.record_send_success();
                DispatchResult::delivered(message_id)
            }
            Err(err) => {
                let result = DispatchResult::failed(&err, transport.last_error());
                if err.severity() <= ErrorSeverity::Warning {
                    warn!(
                        campaign_id = message.campaign_id(),
                        error_code = result.error_code.as_deref(),
                        error = %err,
                        "Transient delivery failure"
                    );
                } else {
                    error!(
                        campaign_id = message.campaign_id(),
                        error_code = result.error_code.as_deref(),
                        error = %err,
                        "Delivery failed"
                    );
                }
                self.metrics.record_send_failure(result.retryable);
                result
            }
        };

        if message.log_enabled() {
            self.append_log(message, &envelope, &result).await;
        }

        timer.stop();
        Ok(result)
    }

    async fn deliver(
        transport: &mut dyn Transport,
        message: &Message,
        envelope: &Envelope<'_>,
        config: &TransportConfig,
    ) -> MailResult<String> {
        if config.enabled {
            debug!(server = %config.address(), security = ?config.security, "Using SMTP transport");
            transport.configure(config)?;
        } else {
            debug!("SMTP disabled, using local submission");
        }

        if let Some(reply_to) = envelope.reply_to {
            transport.add_recipient(RecipientKind::ReplyTo, reply_to)?;
        }
        transport.set_sender(envelope.from)?;

        for address in message.to() {
            transport.add_recipient(RecipientKind::To, address)?;
        }
        for address in message.cc() {
            transport.add_recipient(RecipientKind::Cc, address)?;
        }
        for address in message.bcc() {
            transport.add_recipient(RecipientKind::Bcc, address)?;
        }
        for attachment in message.attachments() {
            transport.add_attachment(attachment)?;
        }

        transport.set_subject(message.subject());
        transport.set_body(&envelope.body);
        transport.send().await
    }

    async fn append_log(&self, message: &Message, envelope: &Envelope<'_>, result: &DispatchResult) {
        let sent_at = Utc::now();

        for recipient in message.recipients() {
            let record = DeliveryLogRecord {
                queue_id: message.queue_id().map(str::to_string),
                message_id: result.transport_message_id.clone(),
                campaign_id: message.campaign_id().to_string(),
                sent_at,
                from: envelope.from.email().to_string(),
                to: recipient.email().to_string(),
                subject: message.subject().to_string(),
                error_code: result.error_code.clone(),
            };

            match self.log_sink.append(&record).await {
                Ok(()) => self.metrics.record_log_append(true),
                Err(err) => {
                    warn!(to = %record.to, error = %err, "Failed to append delivery log record");
                    self.metrics.record_log_append(false);
                }
            }
        }
    }
}

impl std::fmt::Debug for DispatchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGateway")
            .field("transports", &self.transports)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
