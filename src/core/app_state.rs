use crate::bot::InboxBot;
use crate::jobs::ListingsClient;

/// Shared state behind the HTTP tool surface.
///
/// Cloning is cheap — both members are `Arc`s. The bot itself serializes
/// all page work internally, so concurrent tool calls are safe to fan in
/// here without extra locking.
#[derive(Clone)]
pub struct AppState {
    pub bot: std::sync::Arc<InboxBot>,
    /// Client for the external listings service. Always present; calls
    /// fail softly when no API endpoint is configured.
    pub listings: std::sync::Arc<ListingsClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.bot.status();
        f.debug_struct("AppState")
            .field("state", &status.state)
            .field("logged_in", &status.logged_in)
            .field("listings_configured", &self.listings.configured())
            .finish()
    }
}

impl AppState {
    pub fn new(bot: std::sync::Arc<InboxBot>, listings: std::sync::Arc<ListingsClient>) -> Self {
        Self { bot, listings }
    }
}
