//! Consumes action strings produced by ingestors and routes them to a
//! built-in handler (§4.7). The dispatcher never parses natural language
//! itself — unrecognized text is handed to an optional external router.

pub mod handlers;

use std::sync::Arc;

use tracing::warn;

pub use handlers::{ActionResult, ActionStatus};

use crate::store::TaskStore;

/// Parses free-text action strings the dispatcher doesn't recognize as one
/// of its built-in verbs. An out-of-scope collaborator (the admin chat
/// agent, per §4.7) implements this in a full deployment; tests can supply
/// a trivial stand-in.
pub trait ActionRouter: Send + Sync {
    fn route(&self, text: &str) -> Option<String>;
}

pub struct ActionDispatcher {
    store: Arc<TaskStore>,
    router: Option<Arc<dyn ActionRouter>>,
}

impl ActionDispatcher {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store, router: None }
    }

    pub fn with_router(store: Arc<TaskStore>, router: Arc<dyn ActionRouter>) -> Self {
        Self { store, router: Some(router) }
    }

    /// Dispatch one action string, as enqueued by a `VideoStreamIngestor`.
    /// Known verb names (case-insensitive, exact match) call their built-in
    /// handler directly; anything else is forwarded to the configured
    /// router, or, absent one, treated as a `print_to_user` so the action
    /// is at least surfaced rather than silently dropped.
    pub fn dispatch(&self, action: &str) -> ActionResult {
        let trimmed = action.trim();
        match trimmed.to_lowercase().as_str() {
            "send_email" => handlers::send_email(&self.store, trimmed),
            "send_discord_notification" => handlers::send_discord_notification(&self.store, trimmed),
            "send_telegram_notification" => handlers::send_telegram_notification(&self.store, trimmed),
            "open_door" => handlers::open_door(),
            "close_door" => handlers::close_door(),
            "turn_on_light" => handlers::turn_on_light(),
            "turn_off_light" => handlers::turn_off_light(),
            "print_to_user" => handlers::print_to_user(trimmed),
            _ => match &self.router {
                Some(router) => match router.route(trimmed) {
                    Some(verb) if verb != trimmed => self.dispatch(&verb),
                    _ => {
                        warn!(action = trimmed, "Router could not resolve action to a known verb");
                        handlers::print_to_user(trimmed)
                    }
                },
                None => handlers::print_to_user(trimmed),
            },
        }
    }
}
