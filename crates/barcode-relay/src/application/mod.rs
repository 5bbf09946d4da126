//! Application layer use cases for the relay.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules, here the `relay-core` crate) and the infrastructure
//! (devices, Redis, files).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a goal (e.g., "turn scanner
//!   key presses into delivered scans").
//! - **Depend on abstractions** (`DeviceCapability`, `Sink`) rather than
//!   concrete implementations, so tests can inject mocks.
//! - **Own the worker threads** and their lifecycles.
//!
//! # Sub-modules
//!
//! - **`coordinator`**   – Polls every configured scanner, tracks
//!   connect/disconnect, frames key presses into scans and enqueues them.
//!
//! - **`deliver_scans`** – Drains the relay queue into the sink, retrying each
//!   scan until it is accepted.
//!
//! - **`heartbeat`**     – Periodic liveness signal, independent of scans.
//!
//! - **`pipeline`**      – Starts the capture and delivery workers and stops
//!   and joins them.

pub mod coordinator;
pub mod deliver_scans;
pub mod heartbeat;
pub mod pipeline;

/// Renders scan text for log lines, JSON-escaped so a trailing newline or a
/// control character stays visible: `12345\n` becomes `"12345\n"`.
pub fn display_code(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("{text:?}"))
}

/// Extracts a readable message from a worker panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_code_escapes_newline() {
        assert_eq!(display_code("12345\n"), r#""12345\n""#);
    }

    #[test]
    fn test_display_code_escapes_control_characters() {
        assert_eq!(display_code("A\u{1d}B"), r#""A\u001dB""#);
    }

    #[test]
    fn test_panic_message_handles_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
