pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod gateway;
pub mod models;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::gateway::CheckoutGateway;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateway: Arc<dyn CheckoutGateway>,
    pub config: Arc<Config>,
}
