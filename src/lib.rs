//! # Mail Dispatch
//!
//! Queue-backed email dispatch:
//! - Recipient normalization from strings, records and collections
//! - Message composition with lazily resolved defaults, template-rendered
//!   HTML bodies and a derived plain-text alternative
//! - Best-effort sends through a pluggable transport, with one delivery log
//!   record per recipient
//! - Per-recipient queue items with an idempotent, compare-and-swap
//!   persisted delivery state machine
//! - A batch scheduler for queued items
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_mail_dispatch::{Mailer, MailConfig, ProcessHooks};
//! use integrations_mail_dispatch::mocks::{InMemoryQueueStore, MemoryLogSink, MockTransportFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MailConfig::from_json(r#"{"default_from": "News <news@example.com>"}"#)?;
//!
//!     let mailer = Mailer::builder()
//!         .defaults(Arc::new(config))
//!         .transports(Arc::new(MockTransportFactory::new()))
//!         .log_sink(Arc::new(MemoryLogSink::new()))
//!         .persistence(Arc::new(InMemoryQueueStore::new()))
//!         .build()?;
//!
//!     let mut message = mailer.compose();
//!     message
//!         .set_to(vec!["a@example.com", "Bob <b@example.com>"])?
//!         .set_subject("Hello")
//!         .set_html_body("<p>Hello<br>world</p>");
//!
//!     for mut item in mailer.queue(&mut message, None).await? {
//!         let outcome = mailer.process(&mut item, ProcessHooks::new()).await?;
//!         println!("{} -> {:?}", item.to, outcome);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod address;
pub mod config;
pub mod errors;

// Composition
pub mod message;
pub mod template;

// Dispatch
pub mod delivery_log;
pub mod gateway;
pub mod transport;

// Queue
pub mod queue;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use address::{normalize, normalize_one, Address, AddressInput};
pub use client::{Mailer, MailerBuilder};
pub use config::{DefaultsProvider, MailConfig, SmtpSecurity, TransportConfig, TransportConfigBuilder};
pub use delivery_log::{DeliveryLogRecord, LogSink, NullLogSink};
pub use errors::{EnhancedStatusCode, ErrorSeverity, MailError, MailErrorKind, MailResult};
pub use gateway::{DispatchGateway, DispatchResult};
pub use message::{html_to_text, Attachment, Message, MessageComposer};
pub use observability::{DispatchMetrics, MetricsSnapshot};
pub use queue::{
    BatchReport, DeliveryStatus, ProcessHooks, ProcessOutcome, QueueField, QueueItem, QueueManager,
    QueueManagerConfig, QueuePersistence,
};
pub use template::{NoTemplates, TemplateData, TemplateRenderer};
pub use transport::{MessageBody, RecipientKind, Transport, TransportFactory};
