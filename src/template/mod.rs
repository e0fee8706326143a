//! Template rendering seam.
//!
//! The rendering engine itself lives outside this crate; messages only need
//! to turn a template identifier and its data into an HTML body.

use serde_json::{Map, Value};

use crate::errors::MailResult;

/// Data handed to a template, keyed by variable name.
pub type TemplateData = Map<String, Value>;

/// Renders HTML message bodies from named templates.
pub trait TemplateRenderer: Send + Sync {
    /// Renders `template_id` with `data` into an HTML document.
    fn render(&self, template_id: &str, data: &TemplateData) -> MailResult<String>;
}

/// Renderer used when a deployment has no template engine.
///
/// Any attempt to render fails with a template error, so messages that rely
/// on a template surface the misconfiguration at composition time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTemplates;

impl TemplateRenderer for NoTemplates {
    fn render(&self, template_id: &str, _data: &TemplateData) -> MailResult<String> {
        Err(crate::errors::MailError::template(format!(
            "No template renderer configured for \"{}\"",
            template_id
        )))
    }
}
