// Serial-number issuance
pub mod counters;
pub mod serial_numbers;
pub mod serial_template;

// Manufacturing
pub mod manufacturing;
pub mod manufacturing_steps;

// Inventory and fulfillment
pub mod inventory_ledger;
pub mod shipments;

// Service factory for dependency injection
pub mod factory;
