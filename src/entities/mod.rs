//! Persistent records of the fulfillment core.

pub mod inventory_level;
pub mod inventory_movement;
pub mod manufacturing_order;
pub mod manufacturing_step;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_category;
pub mod recipe;
pub mod recipe_component;
pub mod serial_number;
pub mod serial_number_settings;
pub mod shipment;
pub mod shipment_item;
