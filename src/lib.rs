pub mod auth;
pub mod bot;
pub mod browser;
pub mod chat;
pub mod core;
pub mod jobs;
pub mod server;
pub mod session;
pub mod stealth;
pub mod tools;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::AppState;

pub use bot::InboxBot;
pub use jobs::ListingsClient;
