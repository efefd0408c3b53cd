use std::sync::Arc;

use tally_engine::PollService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: Arc<PollService>,
    pub jwt_secret: String,
}
