//! Message composition.
//!
//! A [`Message`] is built by mutation until it is handed to the dispatch
//! gateway or fanned out into queue items. Fields a caller may leave unset
//! (sender, reply-to, bodies, campaign id, log/track flags) are resolved on
//! first read and memoized for the rest of the message's life: later changes
//! to the defaults provider do not affect an already-resolved message.

pub mod composer;
pub mod text;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::address::{self, Address, AddressInput};
use crate::config::DefaultsProvider;
use crate::errors::{MailError, MailResult};
use crate::template::{TemplateData, TemplateRenderer};

pub use composer::MessageComposer;
pub use text::html_to_text;

/// File attached to a message, passed to the transport by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Location of the file.
    pub path: PathBuf,
    /// File name presented to the recipient.
    pub name: Option<String>,
    /// MIME content type.
    pub content_type: String,
}

impl Attachment {
    /// Creates an attachment with its content type guessed from the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Self {
            path,
            name: None,
            content_type,
        }
    }

    /// Overrides the file name presented to the recipient.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the guessed content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Returns the presented file name.
    pub fn file_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.path.file_name().and_then(|n| n.to_str()))
    }

    /// Returns the file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Generates an opaque identifier for campaigns, queues and queue items.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn resolved<T>(value: T) -> OnceCell<T> {
    let cell = OnceCell::new();
    let _ = cell.set(value);
    cell
}

/// An email being composed.
#[derive(Clone)]
pub struct Message {
    defaults: Arc<dyn DefaultsProvider>,
    templates: Arc<dyn TemplateRenderer>,
    from: OnceCell<Address>,
    reply_to: OnceCell<Option<Address>>,
    to: Vec<Address>,
    cc: Vec<Address>,
    bcc: Vec<Address>,
    subject: String,
    html_body: OnceCell<String>,
    text_body: OnceCell<String>,
    attachments: Vec<Attachment>,
    campaign_id: OnceCell<String>,
    queue_id: Option<String>,
    log_enabled: OnceCell<bool>,
    track_enabled: OnceCell<bool>,
    template_id: Option<String>,
    template_data: TemplateData,
}

impl Message {
    /// Creates an empty message resolving its defaults through the given collaborators.
    pub fn new(defaults: Arc<dyn DefaultsProvider>, templates: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            defaults,
            templates,
            from: OnceCell::new(),
            reply_to: OnceCell::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            html_body: OnceCell::new(),
            text_body: OnceCell::new(),
            attachments: Vec::new(),
            campaign_id: OnceCell::new(),
            queue_id: None,
            log_enabled: OnceCell::new(),
            track_enabled: OnceCell::new(),
            template_id: None,
            template_data: TemplateData::new(),
        }
    }

    // Recipients

    /// Replaces the primary recipients. On error the previous list is kept.
    pub fn set_to(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.to = address::normalize(input)?;
        Ok(self)
    }

    /// Adds one primary recipient.
    pub fn add_to(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.to.push(address::normalize_one(input)?);
        Ok(self)
    }

    /// Returns the primary recipients.
    pub fn to(&self) -> &[Address] {
        &self.to
    }

    /// Replaces the CC recipients. On error the previous list is kept.
    pub fn set_cc(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.cc = address::normalize(input)?;
        Ok(self)
    }

    /// Adds one CC recipient.
    pub fn add_cc(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.cc.push(address::normalize_one(input)?);
        Ok(self)
    }

    /// Returns the CC recipients.
    pub fn cc(&self) -> &[Address] {
        &self.cc
    }

    /// Replaces the BCC recipients. On error the previous list is kept.
    pub fn set_bcc(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.bcc = address::normalize(input)?;
        Ok(self)
    }

    /// Adds one BCC recipient.
    pub fn add_bcc(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.bcc.push(address::normalize_one(input)?);
        Ok(self)
    }

    /// Returns the BCC recipients.
    pub fn bcc(&self) -> &[Address] {
        &self.bcc
    }

    /// Returns all recipients (to + cc + bcc).
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    // Sender

    /// Sets the sender.
    pub fn set_from(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.from = resolved(address::normalize_one(input)?);
        Ok(self)
    }

    /// Returns the sender, pulling the system default on first read.
    pub fn from(&self) -> MailResult<&Address> {
        self.from.get_or_try_init(|| self.defaults.default_from())
    }

    /// Sets the reply-to address.
    pub fn set_reply_to(&mut self, input: impl Into<AddressInput>) -> MailResult<&mut Self> {
        self.reply_to = resolved(Some(address::normalize_one(input)?));
        Ok(self)
    }

    /// Returns the reply-to address, pulling the system default on first read.
    pub fn reply_to(&self) -> MailResult<Option<&Address>> {
        self.reply_to
            .get_or_try_init(|| self.defaults.default_reply_to())
            .map(Option::as_ref)
    }

    // Content

    /// Sets the subject.
    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    /// Returns the subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Sets the HTML body.
    pub fn set_html_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.html_body = resolved(body.into());
        self
    }

    /// Returns the HTML body.
    ///
    /// When unset, the body is rendered from the template (if one is named)
    /// or resolves to an empty string.
    pub fn html_body(&self) -> MailResult<&str> {
        self.html_body
            .get_or_try_init(|| self.render_html())
            .map(String::as_str)
    }

    /// Sets the plain-text body.
    pub fn set_text_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.text_body = resolved(body.into());
        self
    }

    /// Returns the plain-text body, derived from the HTML body when unset.
    pub fn text_body(&self) -> MailResult<&str> {
        self.text_body
            .get_or_try_init(|| self.html_body().map(html_to_text))
            .map(String::as_str)
    }

    /// Names the template used to render the HTML body.
    pub fn set_template_id(&mut self, template_id: impl Into<String>) -> &mut Self {
        self.template_id = Some(template_id.into());
        self
    }

    /// Returns the template identifier.
    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    /// Sets the template data. Only a JSON object is accepted.
    pub fn set_template_data(&mut self, data: Value) -> MailResult<&mut Self> {
        match data {
            Value::Object(map) => {
                self.template_data = map;
                Ok(self)
            }
            other => Err(MailError::composition(format!(
                "Template data must be an object, got {}",
                other
            ))),
        }
    }

    /// Returns the template data.
    pub fn template_data(&self) -> &TemplateData {
        &self.template_data
    }

    fn render_html(&self) -> MailResult<String> {
        match &self.template_id {
            Some(template_id) if !template_id.is_empty() => {
                self.templates.render(template_id, &self.template_data)
            }
            _ => Ok(String::new()),
        }
    }

    // Attachments

    /// Adds an attachment.
    pub fn add_attachment(&mut self, attachment: Attachment) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    /// Adds several attachments.
    pub fn set_attachments(&mut self, attachments: impl IntoIterator<Item = Attachment>) -> &mut Self {
        self.attachments.extend(attachments);
        self
    }

    /// Returns the attachments.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    // Identifiers and flags

    /// Sets the campaign identifier.
    pub fn set_campaign_id(&mut self, campaign_id: impl Into<String>) -> &mut Self {
        self.campaign_id = resolved(campaign_id.into());
        self
    }

    /// Returns the campaign identifier, generated once when unset.
    pub fn campaign_id(&self) -> &str {
        self.campaign_id.get_or_init(generate_id)
    }

    /// Sets the queue identifier.
    pub fn set_queue_id(&mut self, queue_id: impl Into<String>) -> &mut Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    /// Returns the queue identifier, if one was assigned.
    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    /// Enables or disables delivery logging for this message.
    pub fn set_log_enabled(&mut self, enabled: bool) -> &mut Self {
        self.log_enabled = resolved(enabled);
        self
    }

    /// Returns whether deliveries of this message are logged.
    pub fn log_enabled(&self) -> bool {
        *self.log_enabled.get_or_init(|| self.defaults.default_log_enabled())
    }

    /// Enables or disables tracking for this message.
    pub fn set_track_enabled(&mut self, enabled: bool) -> &mut Self {
        self.track_enabled = resolved(enabled);
        self
    }

    /// Returns whether this message is tracked.
    pub fn track_enabled(&self) -> bool {
        *self.track_enabled.get_or_init(|| self.defaults.default_track_enabled())
    }

    /// Checks the message can be handed to a transport.
    pub fn ensure_sendable(&self) -> MailResult<()> {
        if self.to.is_empty() {
            return Err(MailError::composition("At least one \"to\" recipient is required"));
        }
        Ok(())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("from", &self.from.get())
            .field("to", &self.to)
            .field("cc", &self.cc)
            .field("bcc", &self.bcc)
            .field("subject", &self.subject)
            .field("campaign_id", &self.campaign_id.get())
            .field("queue_id", &self.queue_id)
            .field("template_id", &self.template_id)
            .field("attachments", &self.attachments.len())
            .finish()
    }
}
