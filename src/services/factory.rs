use std::sync::Arc;

use crate::{
    config::FulfillmentConfig,
    db::DbPool,
    events::EventSender,
    services::{
        inventory_ledger::InventoryLedgerService, manufacturing::ManufacturingService,
        manufacturing_steps::ProductionStepService, serial_numbers::SerialNumberService,
        shipments::ShipmentService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    config: FulfillmentConfig,
    event_sender: Option<EventSender>,
}

impl ServiceFactory {
    /// Creates a new service factory with the given dependencies
    pub fn new(
        db_pool: Arc<DbPool>,
        config: FulfillmentConfig,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db_pool,
            config,
            event_sender,
        }
    }

    pub fn serial_number_service(&self) -> SerialNumberService {
        SerialNumberService::new(
            self.db_pool.clone(),
            self.config.clone(),
            self.event_sender.clone(),
        )
    }

    /// Manufacturing shares the given serial issuer so completion and
    /// direct issuance draw from the same policy.
    pub fn manufacturing_service(&self, serials: Arc<SerialNumberService>) -> ManufacturingService {
        ManufacturingService::new(self.db_pool.clone(), serials, self.event_sender.clone())
    }

    pub fn step_service(&self) -> ProductionStepService {
        ProductionStepService::new(
            self.db_pool.clone(),
            self.config.step_sequencing,
            self.event_sender.clone(),
        )
    }

    pub fn inventory_ledger(&self) -> InventoryLedgerService {
        InventoryLedgerService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn shipment_service(&self) -> ShipmentService {
        ShipmentService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub manufacturing: Arc<ManufacturingService>,
    pub steps: Arc<ProductionStepService>,
    pub serial_numbers: Arc<SerialNumberService>,
    pub inventory: Arc<InventoryLedgerService>,
    pub shipments: Arc<ShipmentService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        let serial_numbers = Arc::new(factory.serial_number_service());

        Self {
            manufacturing: Arc::new(factory.manufacturing_service(serial_numbers.clone())),
            steps: Arc::new(factory.step_service()),
            serial_numbers,
            inventory: Arc::new(factory.inventory_ledger()),
            shipments: Arc::new(factory.shipment_service()),
        }
    }
}
