mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use common::TestContext;
use production_fulfillment::{
    config::FulfillmentConfig,
    entities::{
        manufacturing_order,
        order::OrderStatus,
        serial_number::{self, SerialStatus},
        serial_number_settings::ResetPolicy,
    },
    errors::ServiceError,
    services::{manufacturing::CreateManufacturingOrder, serial_numbers::SerialSettingsUpdate},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use uuid::Uuid;

fn march_fifth() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()
}

async fn order_for(ctx: &TestContext, product_id: Uuid) -> manufacturing_order::Model {
    ctx.services
        .manufacturing
        .create_manufacturing_order(CreateManufacturingOrder {
            product_id,
            planned_quantity: 10,
            ..Default::default()
        })
        .await
        .expect("create manufacturing order")
}

async fn occupy(ctx: &TestContext, serial: &str) {
    let owner = ctx.product(&format!("OTHER-{}", serial), None, false).await;
    serial_number::ActiveModel {
        serial_number: Set(serial.to_string()),
        product_id: Set(owner.id),
        category_id: Set(None),
        status: Set(SerialStatus::Available),
        ..Default::default()
    }
    .insert(&*ctx.db)
    .await
    .expect("insert colliding serial");
}

#[tokio::test]
async fn category_template_renders_shared_counter() {
    let ctx = TestContext::new().await;
    let category = ctx
        .category(
            "Axles",
            Some("{prefix}-{year}{month:2}{day:2}-{counter:4}"),
            Some("AX"),
        )
        .await;
    let product = ctx.product("AXLE-1", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    ctx.services
        .serial_numbers
        .update_settings(SerialSettingsUpdate {
            cross_numbering: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    ctx.set_global_counter(7).await;

    let issued = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 3, march_fifth())
        .await
        .unwrap();

    assert_eq!(
        issued,
        vec!["AX-20240305-0007", "AX-20240305-0008", "AX-20240305-0009"]
    );

    let settings = ctx.services.serial_numbers.settings().await.unwrap();
    assert_eq!(settings.current_global_counter, 9);

    let stored = ctx
        .services
        .serial_numbers
        .for_manufacturing_order(order.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|s| s.status == SerialStatus::Available));
    assert!(stored.iter().all(|s| s.category_id == Some(category.id)));
}

#[tokio::test]
async fn category_counter_follows_existing_units() {
    let ctx = TestContext::new().await;
    let category = ctx
        .category(
            "Axles",
            Some("{prefix}-{year}{month:2}{day:2}-{counter:4}"),
            Some("AX"),
        )
        .await;
    let product = ctx.product("AXLE-2", Some(category.id), true).await;

    for n in 1..=6 {
        serial_number::ActiveModel {
            serial_number: Set(format!("AX-LEGACY-{}", n)),
            product_id: Set(product.id),
            category_id: Set(Some(category.id)),
            status: Set(SerialStatus::Available),
            ..Default::default()
        }
        .insert(&*ctx.db)
        .await
        .expect("insert existing category serial");
    }

    let order = order_for(&ctx, product.id).await;
    let issued = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 3, march_fifth())
        .await
        .unwrap();

    assert_eq!(
        issued,
        vec!["AX-20240305-0007", "AX-20240305-0008", "AX-20240305-0009"]
    );

    let settings = ctx.services.serial_numbers.settings().await.unwrap();
    assert!(!settings.cross_numbering);
    assert_eq!(settings.current_global_counter, 0);
}

#[tokio::test]
async fn category_counter_continues_across_batches() {
    let ctx = TestContext::new().await;
    let category = ctx
        .category("Pumps", Some("{prefix}{counter:3}"), Some("PMP"))
        .await;
    let first_product = ctx.product("PUMP-A", Some(category.id), true).await;
    let second_product = ctx.product("PUMP-B", Some(category.id), true).await;

    let first = order_for(&ctx, first_product.id).await;
    let second = order_for(&ctx, second_product.id).await;

    let a = ctx.services.serial_numbers.issue(first.id, 2).await.unwrap();
    let b = ctx.services.serial_numbers.issue(second.id, 1).await.unwrap();

    assert_eq!(a, vec!["PMP001", "PMP002"]);
    assert_eq!(b, vec!["PMP003"]);
}

#[tokio::test]
async fn uncategorized_product_uses_fallback_format() {
    let ctx = TestContext::new().await;
    let product = ctx.product("WIDGET", None, true).await;
    let order = order_for(&ctx, product.id).await;

    let issued = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 2, march_fifth())
        .await
        .unwrap();

    assert_eq!(issued, vec!["20240305-WIDGET-0001", "20240305-WIDGET-0002"]);
}

#[tokio::test]
async fn fallback_prefers_category_code() {
    let ctx = TestContext::new().await;
    let category = ctx.category("Valves", None, None).await;
    let mut active: production_fulfillment::entities::product_category::ActiveModel =
        category.clone().into();
    active.code = Set(Some("VLV".into()));
    active.update(&*ctx.db).await.unwrap();

    let product = ctx.product("VALVE-9", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    let issued = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 1, march_fifth())
        .await
        .unwrap();
    assert_eq!(issued, vec!["20240305-VLV-0001"]);
}

#[tokio::test]
async fn collision_is_retried_with_a_fresh_counter() {
    let ctx = TestContext::new().await;
    let category = ctx
        .category("Motors", Some("{prefix}-{counter:4}"), Some("MTR"))
        .await;
    let product = ctx.product("MOTOR-1", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    occupy(&ctx, "MTR-0001").await;

    let issued = ctx.services.serial_numbers.issue(order.id, 1).await.unwrap();
    assert_eq!(issued, vec!["MTR-0002"]);
}

#[tokio::test]
async fn counterless_template_only_fits_single_units() {
    let ctx = TestContext::with_config(FulfillmentConfig {
        serial_max_collision_retries: 3,
        ..FulfillmentConfig::default()
    })
    .await;
    let category = ctx
        .category("Lots", Some("{prefix}-{year}"), Some("LOT"))
        .await;
    let product = ctx.product("LOT-1", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    let err = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 2, march_fifth())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::UniquenessConflict { ref serial_number, attempts: 3 } if serial_number == "LOT-2024"
    );
    assert!(ctx
        .services
        .serial_numbers
        .for_manufacturing_order(order.id)
        .await
        .unwrap()
        .is_empty());

    let issued = ctx
        .services
        .serial_numbers
        .issue_at(order.id, 1, march_fifth())
        .await
        .unwrap();
    assert_eq!(issued, vec!["LOT-2024"]);
}

#[tokio::test]
async fn exhausted_retries_surface_uniqueness_conflict() {
    let ctx = TestContext::with_config(FulfillmentConfig {
        serial_max_collision_retries: 1,
        ..FulfillmentConfig::default()
    })
    .await;
    let category = ctx
        .category("Drives", Some("{prefix}-{counter:4}"), Some("DRV"))
        .await;
    let product = ctx.product("DRIVE-1", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    occupy(&ctx, "DRV-0001").await;

    let err = ctx
        .services
        .serial_numbers
        .issue(order.id, 2)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::UniquenessConflict { ref serial_number, attempts: 1 } if serial_number == "DRV-0001"
    );

    let stored = ctx
        .services
        .serial_numbers
        .for_manufacturing_order(order.id)
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn zero_and_negative_quantities() {
    let ctx = TestContext::new().await;
    let product = ctx.product("NONE-1", None, true).await;
    let order = order_for(&ctx, product.id).await;

    let issued = ctx.services.serial_numbers.issue(order.id, 0).await.unwrap();
    assert!(issued.is_empty());

    let err = ctx
        .services
        .serial_numbers
        .issue(order.id, -2)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = ctx
        .services
        .serial_numbers
        .issue(Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));
}

#[tokio::test]
async fn concurrent_batches_never_share_a_serial() {
    let ctx = TestContext::new().await;
    ctx.services
        .serial_numbers
        .update_settings(SerialSettingsUpdate {
            cross_numbering: Some(true),
            global_template: Some(Some("{prefix}{counter:6}".into())),
            global_prefix: Some(Some("G".into())),
            ..Default::default()
        })
        .await
        .unwrap();

    let left = ctx.product("LEFT", None, true).await;
    let right = ctx.product("RIGHT", None, true).await;
    let left_order = order_for(&ctx, left.id).await;
    let right_order = order_for(&ctx, right.id).await;

    let serials = ctx.services.serial_numbers.clone();
    let (a, b) = tokio::join!(
        serials.issue(left_order.id, 25),
        serials.issue(right_order.id, 25)
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let distinct: HashSet<_> = a.iter().chain(b.iter()).collect();
    assert_eq!(distinct.len(), 50);
    assert!(distinct.iter().all(|s| s.starts_with('G') && s.len() == 7));

    let settings = ctx.services.serial_numbers.settings().await.unwrap();
    assert_eq!(settings.current_global_counter, 50);
}

#[tokio::test]
async fn periodic_reset_restarts_global_counter() {
    let ctx = TestContext::new().await;
    ctx.services
        .serial_numbers
        .update_settings(SerialSettingsUpdate {
            cross_numbering: Some(true),
            global_template: Some(Some("{year}{month}{day}-{counter:3}".into())),
            reset_policy: Some(ResetPolicy::Daily),
            ..Default::default()
        })
        .await
        .unwrap();
    ctx.set_global_counter(40).await;

    let product = ctx.product("DAILY", None, true).await;
    let order = order_for(&ctx, product.id).await;
    let serials = &ctx.services.serial_numbers;

    let first = serials.issue_at(order.id, 1, march_fifth()).await.unwrap();
    let same_day = serials.issue_at(order.id, 1, march_fifth()).await.unwrap();
    let next_day = serials
        .issue_at(order.id, 1, Utc.with_ymd_and_hms(2024, 3, 6, 8, 0, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(first, vec!["20240305-001"]);
    assert_eq!(same_day, vec!["20240305-002"]);
    assert_eq!(next_day, vec!["20240306-001"]);

    let settings = serials.settings().await.unwrap();
    assert_eq!(
        settings.last_reset_date,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 6)
    );
}

#[tokio::test]
async fn malformed_templates_are_configuration_errors() {
    let ctx = TestContext::new().await;

    let err = ctx
        .services
        .serial_numbers
        .update_settings(SerialSettingsUpdate {
            global_template: Some(Some("{prefix}-{serial}".into())),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidConfiguration(_));

    let category = ctx
        .category("Broken", Some("{counter:4"), Some("BRK"))
        .await;
    let product = ctx.product("BROKEN-1", Some(category.id), true).await;
    let order = order_for(&ctx, product.id).await;

    let err = ctx.services.serial_numbers.issue(order.id, 1).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidConfiguration(_));
}

#[tokio::test]
async fn reservation_and_defect_lifecycle() {
    let ctx = TestContext::new().await;
    let product = ctx.product("UNIT", None, true).await;
    let order = order_for(&ctx, product.id).await;
    let issued = ctx.services.serial_numbers.issue(order.id, 2).await.unwrap();

    let (_, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 2, None)])
        .await;
    let item = &items[0];

    let reserved = ctx
        .services
        .serial_numbers
        .reserve_serial_numbers(item.id, &issued[..1])
        .await
        .unwrap();
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].status, SerialStatus::Reserved);
    assert_eq!(reserved[0].order_item_id, Some(item.id));
    assert_eq!(reserved[0].order_id, Some(item.order_id));

    let err = ctx
        .services
        .serial_numbers
        .reserve_serial_numbers(item.id, &issued[..1])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let defective = ctx
        .services
        .serial_numbers
        .mark_defective(&issued[0])
        .await
        .unwrap();
    assert_eq!(defective.status, SerialStatus::Defective);

    let again = ctx
        .services
        .serial_numbers
        .mark_defective(&issued[0])
        .await
        .unwrap();
    assert_eq!(again.status, SerialStatus::Defective);

    let err = ctx
        .services
        .serial_numbers
        .mark_defective("NO-SUCH-SERIAL")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));

    let untouched = ctx
        .services
        .serial_numbers
        .find_by_serial(&issued[1])
        .await
        .unwrap()
        .expect("second serial stored");
    assert_eq!(untouched.status, SerialStatus::Available);
}
