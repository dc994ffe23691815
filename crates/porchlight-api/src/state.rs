use std::sync::Arc;

use porchlight_db::Database;
use porchlight_feed::FeedHub;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub hub: FeedHub,
    pub jwt_secret: String,
}
