use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod delete;
pub mod error;
pub mod events;
pub mod execution;
pub mod schedule;
pub mod stats;
pub mod utils;

pub use database::establish_connection;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: Arc<config::Config>,
    pub engine: Arc<schedule::ScheduleEngine>,
    pub lifecycle: Arc<execution::LifecycleService>,
    pub delete_queue: Arc<delete::DeleteQueue>,
    pub stats: Arc<stats::FailureAggregator>,
    pub bus: events::EventBus,
}
