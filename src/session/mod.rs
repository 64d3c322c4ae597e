//! Session persistence: durable JSON stores plus cookie capture/injection.

pub mod cookies;
pub mod store;

pub use store::SessionStore;
