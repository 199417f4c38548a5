//! Event hooks for classification lifecycle.
//!
//! Provides an optional, non-intrusive way to observe a classification.
//! The classifier emits events when a generation starts and ends, when the
//! single escalation happens, and for every correction a validator makes.
//! Implement [`EventHandler`] for progress tracking or metrics.

use std::sync::Arc;

use crate::retry::EscalationTrigger;
use crate::stage::Stage;

/// Events emitted during classification.
#[derive(Debug, Clone)]
pub enum Event {
    /// A generation is about to be requested.
    AttemptStart {
        stage: Stage,
        /// 1 for the first attempt, 2 for the escalated one.
        attempt: u32,
    },
    /// A generation returned and its output was (or was not) recovered.
    AttemptEnd {
        stage: Stage,
        attempt: u32,
        output_tokens: u32,
        /// Whether a JSON object was recovered from the output.
        ok: bool,
    },
    /// The first attempt failed and the stricter retry is starting.
    Escalation {
        stage: Stage,
        trigger: EscalationTrigger,
        /// The parse error that caused it.
        reason: String,
    },
    /// A validator filled in or rewrote a field.
    Correction {
        stage: Stage,
        field: String,
        detail: String,
    },
}

/// Handler for classification events.
///
/// This is entirely optional -- the classifier works without one.
///
/// # Example
///
/// ```
/// use doc_classifier::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Escalation { stage, trigger, .. } => println!("[{}] escalating: {}", stage, trigger),
///             Event::Correction { field, detail, .. } => println!("fixed {}: {}", field, detail),
///             _ => {} // AttemptStart, AttemptEnd
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for every emitted event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use doc_classifier::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Escalation { reason, .. } = event {
///         eprintln!("retrying: {}", reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
