use std::sync::Arc;

use db::DBService;
use services::services::{
    config::Config, dispatcher::Dispatcher, registry::ProjectRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub registry: Arc<ProjectRegistry>,
    pub dispatcher: Dispatcher,
    pub config: Arc<Config>,
}
