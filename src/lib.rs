//! Production-fulfillment core
//!
//! Manufacturing orders and their steps, serial-number issuance, the
//! (product, warehouse) inventory ledger and partial shipments, persisted
//! through sea-orm. Every mutating operation runs in a single database
//! transaction and publishes its domain event only after commit.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    services::factory::{ServiceContainer, ServiceFactory},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub services: ServiceContainer,
}

impl AppState {
    /// Connects to the configured database, optionally migrates it, and
    /// wires every service to one event channel. The receiver is returned
    /// for the caller to drain, typically with [`events::process_events`].
    pub async fn initialize(
        config: AppConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServiceError> {
        let db = Arc::new(db::establish_connection_from_app_config(&config).await?);

        if config.auto_migrate {
            db::run_migrations(&db).await?;
        }

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = EventSender::new(event_tx);

        let factory = ServiceFactory::new(
            db.clone(),
            config.fulfillment.clone(),
            Some(event_sender.clone()),
        );
        let services = ServiceContainer::new(&factory);

        info!(
            environment = %config.environment,
            step_sequencing = ?config.fulfillment.step_sequencing,
            "Fulfillment core initialized"
        );

        Ok((
            Self {
                db,
                config,
                event_sender,
                services,
            },
            event_rx,
        ))
    }
}
