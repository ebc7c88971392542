#![allow(dead_code)]

use std::sync::Arc;

use production_fulfillment::{
    config::{FulfillmentConfig, StepSequencing},
    db::{self, DbPool},
    entities::{
        order::{self, OrderStatus},
        order_item, product, product_category, recipe, recipe_component, serial_number_settings,
    },
    services::{
        counters,
        factory::{ServiceContainer, ServiceFactory},
    },
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use uuid::Uuid;

/// Services wired to a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: ServiceContainer,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(FulfillmentConfig::default()).await
    }

    pub async fn strict() -> Self {
        Self::with_config(FulfillmentConfig {
            step_sequencing: StepSequencing::Strict,
            ..FulfillmentConfig::default()
        })
        .await
    }

    pub async fn with_config(config: FulfillmentConfig) -> Self {
        let pool = db::establish_connection("sqlite::memory:")
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let factory = ServiceFactory::new(db.clone(), config, None);
        let services = ServiceContainer::new(&factory);

        Self { db, services }
    }

    pub async fn category(
        &self,
        name: &str,
        template: Option<&str>,
        prefix: Option<&str>,
    ) -> product_category::Model {
        product_category::ActiveModel {
            name: Set(name.to_string()),
            code: Set(None),
            serial_template: Set(template.map(str::to_string)),
            serial_prefix: Set(prefix.map(str::to_string)),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert category")
    }

    pub async fn product(
        &self,
        sku: &str,
        category_id: Option<Uuid>,
        serial_tracked: bool,
    ) -> product::Model {
        product::ActiveModel {
            sku: Set(sku.to_string()),
            name: Set(format!("{} product", sku)),
            category_id: Set(category_id),
            serial_tracked: Set(serial_tracked),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert product")
    }

    /// Recipe producing `output_quantity` of `product_id` from `(component, quantity)` pairs.
    pub async fn recipe(
        &self,
        product_id: Uuid,
        output_quantity: i32,
        components: &[(Uuid, i32)],
    ) -> recipe::Model {
        let recipe = recipe::ActiveModel {
            product_id: Set(product_id),
            name: Set("standard build".to_string()),
            output_quantity: Set(output_quantity),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert recipe");

        for (component_product_id, quantity) in components {
            recipe_component::ActiveModel {
                recipe_id: Set(recipe.id),
                component_product_id: Set(*component_product_id),
                quantity: Set(*quantity),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("insert recipe component");
        }

        recipe
    }

    /// Sales order with one line per `(product, quantity, warehouse)` entry.
    pub async fn sales_order(
        &self,
        status: OrderStatus,
        lines: &[(Uuid, i32, Option<Uuid>)],
    ) -> (order::Model, Vec<order_item::Model>) {
        let order = order::ActiveModel {
            order_number: Set(format!("SO-{}", &Uuid::new_v4().simple().to_string()[..8])),
            status: Set(status),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert order");

        let mut items = Vec::with_capacity(lines.len());
        for (product_id, quantity, warehouse_id) in lines {
            let item = order_item::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(*product_id),
                warehouse_id: Set(*warehouse_id),
                quantity: Set(*quantity),
                shipped_quantity: Set(0),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("insert order item");
            items.push(item);
        }

        (order, items)
    }

    /// Forces the global counter so the next issued value is `next`.
    pub async fn set_global_counter(&self, next: i64) {
        let settings = counters::load_settings(&*self.db)
            .await
            .expect("load settings");
        let mut active: serial_number_settings::ActiveModel = settings.into();
        active.current_global_counter = Set(next - 1);
        active.update(&*self.db).await.expect("update settings");
    }
}
