use std::sync::Arc;

pub mod activity;
pub mod attempt;
pub mod capability;
pub mod config;
pub mod contentbank;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod session;
pub mod statement;
pub mod storage;
pub mod upload;

use capability::Capabilities;
use config::Config;
use contentbank::Registry;
use db::Db;
use statement::ScorePropagation;
use storage::{FileStorage, PublicUrls};

/// Shared handles every request works with.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub caps: Capabilities,
    pub registry: Arc<Registry>,
    pub storage: FileStorage,
    pub urls: PublicUrls,
    pub score_propagation: ScorePropagation,
}

impl AppState {
    pub fn new(db: Db, config: &Config, registry: Registry) -> Self {
        Self {
            caps: Capabilities::new(db.clone(), config.site_admins.iter().copied()),
            db,
            registry: Arc::new(registry),
            storage: FileStorage::new(&config.data_dir),
            urls: PublicUrls::new(config.public_base_url.clone()),
            score_propagation: config.score_propagation,
        }
    }
}
