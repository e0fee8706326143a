//! Error types for mail composition, dispatch and queue processing.
//!
//! Provides a single error struct with a kind, optional SMTP reply
//! details, retryability detection and severity classification.

use std::fmt;
use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Mail error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorKind {
    // Composition errors
    /// Malformed recipient or sender input.
    InvalidAddress,
    /// Message cannot be composed (missing recipients, bad template data).
    Composition,
    /// The template renderer failed.
    Template,

    // Transport errors
    /// Recoverable delivery failure (e.g. temporary SMTP rejection).
    TransientTransport,
    /// Non-recoverable delivery failure.
    PermanentTransport,

    // Queue errors
    /// The queue item was already handled; not a true failure.
    AlreadyProcessed,
    /// The stored queue item status did not match the expected status.
    StateConflict,
    /// The persistence backend failed.
    Persistence,

    // Configuration errors
    /// Configuration is invalid.
    Configuration,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

impl MailErrorKind {
    /// Returns true if this error kind is worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailErrorKind::TransientTransport)
    }

    /// Returns true if this kind is raised while building a message,
    /// before any transport interaction.
    pub fn is_composition(&self) -> bool {
        matches!(
            self,
            MailErrorKind::InvalidAddress | MailErrorKind::Composition | MailErrorKind::Template
        )
    }

    /// Returns the severity level of this error kind.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MailErrorKind::Configuration | MailErrorKind::Persistence => ErrorSeverity::Critical,

            MailErrorKind::InvalidAddress
            | MailErrorKind::Composition
            | MailErrorKind::Template
            | MailErrorKind::PermanentTransport
            | MailErrorKind::StateConflict
            | MailErrorKind::Unknown => ErrorSeverity::Error,

            MailErrorKind::TransientTransport => ErrorSeverity::Warning,

            MailErrorKind::AlreadyProcessed => ErrorSeverity::Info,
        }
    }
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailErrorKind::InvalidAddress => write!(f, "Invalid address"),
            MailErrorKind::Composition => write!(f, "Composition error"),
            MailErrorKind::Template => write!(f, "Template rendering failed"),
            MailErrorKind::TransientTransport => write!(f, "Transient transport failure"),
            MailErrorKind::PermanentTransport => write!(f, "Permanent transport failure"),
            MailErrorKind::AlreadyProcessed => write!(f, "Already processed"),
            MailErrorKind::StateConflict => write!(f, "Queue state conflict"),
            MailErrorKind::Persistence => write!(f, "Persistence failure"),
            MailErrorKind::Configuration => write!(f, "Invalid configuration"),
            MailErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - expected scenario.
    Info,
    /// Warning - temporary issue, may recover.
    Warning,
    /// Error - operation failed.
    Error,
    /// Critical - requires immediate attention.
    Critical,
}

/// Enhanced mail system status code (RFC 3463).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    pub fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self { class, subject, detail }
    }

    /// Parses an enhanced status code from a string (e.g., "4.2.2").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(code)
    }

    /// Returns true if this is a success status.
    pub fn is_success(&self) -> bool {
        self.class == 2
    }

    /// Returns true if this is a temporary failure.
    pub fn is_temporary(&self) -> bool {
        self.class == 4
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Mail error with detailed information.
#[derive(Error, Debug)]
pub struct MailError {
    kind: MailErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new mail error.
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> MailErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns the code recorded in delivery logs for this failure.
    pub fn error_code(&self) -> Option<String> {
        self.smtp_code
            .map(|code| code.to_string())
            .or_else(|| self.enhanced_code.as_ref().map(|code| code.to_string()))
    }

    /// Returns true if this error is retryable.
    ///
    /// Reply codes are already folded into the kind by
    /// [`MailError::from_smtp_reply`], so the kind alone decides.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    // Convenience constructors

    /// Creates an invalid address error.
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::InvalidAddress, message)
    }

    /// Creates a composition error.
    pub fn composition(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Composition, message)
    }

    /// Creates a template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Template, message)
    }

    /// Creates a transient transport error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::TransientTransport, message)
    }

    /// Creates a permanent transport error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::PermanentTransport, message)
    }

    /// Creates an already-processed signal.
    pub fn already_processed(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::AlreadyProcessed, message)
    }

    /// Creates a queue state conflict error.
    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::StateConflict, message)
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Persistence, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Configuration, message)
    }

    /// Creates an error from an SMTP reply.
    ///
    /// The basic reply class decides between transient (4xx) and permanent
    /// (5xx) failures; an enhanced status code, when present, takes precedence.
    pub fn from_smtp_reply(code: u16, enhanced: Option<&str>, message: impl Into<String>) -> Self {
        let enhanced = enhanced.and_then(EnhancedStatusCode::parse);
        let kind = match (&enhanced, code) {
            (Some(e), _) if e.is_temporary() => MailErrorKind::TransientTransport,
            (Some(e), _) if e.is_permanent() => MailErrorKind::PermanentTransport,
            (_, 400..=499) => MailErrorKind::TransientTransport,
            (_, 500..=599) => MailErrorKind::PermanentTransport,
            _ => MailErrorKind::Unknown,
        };

        let mut error = Self::new(kind, message).with_smtp_code(code);
        if let Some(enhanced) = enhanced {
            error = error.with_enhanced_code(enhanced);
        }
        error
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

impl From<serde_json::Error> for MailError {
    fn from(err: serde_json::Error) -> Self {
        MailError::configuration(format!("Invalid JSON: {}", err)).with_cause(err)
    }
}
