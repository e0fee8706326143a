//! Message factory holding the injected collaborators.

use std::sync::Arc;

use crate::config::DefaultsProvider;
use crate::template::TemplateRenderer;

use super::Message;

/// Creates messages bound to one defaults provider and template renderer.
#[derive(Clone)]
pub struct MessageComposer {
    defaults: Arc<dyn DefaultsProvider>,
    templates: Arc<dyn TemplateRenderer>,
}

impl MessageComposer {
    /// Creates a composer.
    pub fn new(defaults: Arc<dyn DefaultsProvider>, templates: Arc<dyn TemplateRenderer>) -> Self {
        Self { defaults, templates }
    }

    /// Starts a new, empty message.
    pub fn compose(&self) -> Message {
        Message::new(self.defaults.clone(), self.templates.clone())
    }

    /// Returns the defaults provider.
    pub fn defaults(&self) -> &Arc<dyn DefaultsProvider> {
        &self.defaults
    }
}

impl std::fmt::Debug for MessageComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageComposer").finish_non_exhaustive()
    }
}
