//! Transport abstraction.
//!
//! The wire-level client (SMTP handshake, MIME encoding, local submission)
//! lives behind [`Transport`]. A fresh transport is created for every send
//! through a [`TransportFactory`], so no envelope state leaks between
//! attempts; implementations are free to pool connections underneath.

use async_trait::async_trait;
use std::fmt;

use crate::address::Address;
use crate::config::TransportConfig;
use crate::errors::MailResult;
use crate::message::Attachment;

/// Role of an address on the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    /// Primary recipient.
    To,
    /// Carbon copy.
    Cc,
    /// Blind carbon copy.
    Bcc,
    /// Reply-To header.
    ReplyTo,
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientKind::To => write!(f, "to"),
            RecipientKind::Cc => write!(f, "cc"),
            RecipientKind::Bcc => write!(f, "bcc"),
            RecipientKind::ReplyTo => write!(f, "reply-to"),
        }
    }
}

/// Message body handed to a transport.
///
/// Always an HTML part with a plain-text alternative, encoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    /// HTML part.
    pub html: String,
    /// Plain-text alternative.
    pub text: String,
}

impl MessageBody {
    /// Character set of both parts.
    pub const CHARSET: &'static str = "UTF-8";

    /// Creates an HTML body with its plain-text alternative.
    pub fn alternative(html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            text: text.into(),
        }
    }

    /// MIME type of the assembled body.
    pub fn content_type(&self) -> &'static str {
        "multipart/alternative"
    }
}

/// One delivery attempt against an external mail transport.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Switches the transport to the given SMTP server. Not called when the
    /// configuration is disabled, in which case local submission is used.
    fn configure(&mut self, config: &TransportConfig) -> MailResult<()>;

    /// Sets the envelope sender.
    fn set_sender(&mut self, from: &Address) -> MailResult<()>;

    /// Adds an address to the envelope.
    fn add_recipient(&mut self, kind: RecipientKind, address: &Address) -> MailResult<()>;

    /// Attaches a file.
    fn add_attachment(&mut self, attachment: &Attachment) -> MailResult<()>;

    /// Sets the subject line.
    fn set_subject(&mut self, subject: &str);

    /// Sets the HTML body and its plain-text alternative.
    fn set_body(&mut self, body: &MessageBody);

    /// Sends the message, returning the transport message id.
    ///
    /// Temporary rejections must be reported with a retryable error
    /// (see [`MailError::from_smtp_reply`](crate::errors::MailError::from_smtp_reply)).
    async fn send(&mut self) -> MailResult<String>;

    /// Returns the SMTP code of the last failure, if any.
    fn last_error(&self) -> Option<String>;
}

/// Creates transports, one per send attempt.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Creates a transport with an empty envelope.
    fn create(&self) -> Box<dyn Transport>;
}
