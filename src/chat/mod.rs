//! Everything that understands the chat UI: selector fallback chains, the
//! pure message classifier, one-shot history extraction, the live watch
//! loop and the compose-and-send flow.

pub mod classify;
pub mod dispatch;
pub mod extract;
pub mod selectors;
pub mod watch;

pub use dispatch::Dispatcher;
pub use extract::Extractor;
pub use watch::LiveWatch;
