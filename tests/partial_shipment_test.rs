mod common;

use assert_matches::assert_matches;
use common::TestContext;
use production_fulfillment::{
    entities::{
        inventory_movement::MovementReason,
        order::{Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        serial_number::SerialStatus,
        shipment::ShipmentStatus,
    },
    errors::ServiceError,
    services::{
        manufacturing::CreateManufacturingOrder,
        shipments::{LineAllocation, ShipmentMeta},
    },
};
use sea_orm::EntityTrait;
use uuid::Uuid;

async fn reload_item(ctx: &TestContext, id: Uuid) -> order_item::Model {
    OrderItemEntity::find_by_id(id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("order item exists")
}

async fn order_status(ctx: &TestContext, id: Uuid) -> OrderStatus {
    OrderEntity::find_by_id(id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("order exists")
        .status
}

/// Issues `count` serial numbers for `product_id` through a manufacturing order.
async fn serials_for(ctx: &TestContext, product_id: Uuid, count: i32) -> Vec<String> {
    let order = ctx
        .services
        .manufacturing
        .create_manufacturing_order(CreateManufacturingOrder {
            product_id,
            planned_quantity: count,
            ..Default::default()
        })
        .await
        .unwrap();
    ctx.services
        .serial_numbers
        .issue(order.id, count)
        .await
        .unwrap()
}

#[tokio::test]
async fn line_fills_over_two_shipments_then_rejects_excess() {
    let ctx = TestContext::new().await;
    let product = ctx.product("CRATE", None, false).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 10, None)])
        .await;
    let item = &items[0];
    let shipments = &ctx.services.shipments;

    let first = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item.id, 4)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap();
    assert_eq!(first.order_status, OrderStatus::PartiallyShipped);
    assert_eq!(first.total_quantity(), 4);
    assert_eq!(first.shipment.status, ShipmentStatus::Allocated);
    assert!(first.shipment.shipment_number.starts_with("SHP-"));
    assert_eq!(reload_item(&ctx, item.id).await.shipped_quantity, 4);
    assert_eq!(order_status(&ctx, order.id).await, OrderStatus::PartiallyShipped);

    let second = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item.id, 6)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap();
    assert_eq!(second.order_status, OrderStatus::Shipped);
    assert_eq!(reload_item(&ctx, item.id).await.shipped_quantity, 10);
    assert_eq!(order_status(&ctx, order.id).await, OrderStatus::Shipped);

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item.id, 1)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::CapacityExceeded {
            requested: 1,
            allowed: 0,
            ..
        }
    );

    assert_eq!(reload_item(&ctx, item.id).await.shipped_quantity, 10);
    assert_eq!(shipments.shipments_for_order(order.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn one_bad_line_rejects_the_whole_shipment() {
    let ctx = TestContext::new().await;
    let a = ctx.product("PART-A", None, false).await;
    let b = ctx.product("PART-B", None, false).await;
    let (order, items) = ctx
        .sales_order(
            OrderStatus::Confirmed,
            &[(a.id, 5, None), (b.id, 2, None)],
        )
        .await;

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![
                LineAllocation::new(items[0].id, 5),
                LineAllocation::new(items[1].id, 3),
            ],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CapacityExceeded { requested: 3, allowed: 2, .. });

    assert_eq!(reload_item(&ctx, items[0].id).await.shipped_quantity, 0);
    assert_eq!(reload_item(&ctx, items[1].id).await.shipped_quantity, 0);
    assert_eq!(order_status(&ctx, order.id).await, OrderStatus::Confirmed);
    assert!(ctx
        .services
        .shipments
        .shipments_for_order(order.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let ctx = TestContext::new().await;
    let product = ctx.product("BOX", None, false).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 5, None)])
        .await;
    let (other_order, other_items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 5, None)])
        .await;
    let shipments = &ctx.services.shipments;

    let err = shipments
        .create_partial_shipment(order.id, vec![], ShipmentMeta::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 0)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![
                LineAllocation::new(items[0].id, 1),
                LineAllocation::new(items[0].id, 1),
            ],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(other_items[0].id, 1)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));

    let err = shipments
        .create_partial_shipment(
            Uuid::new_v4(),
            vec![LineAllocation::new(items[0].id, 1)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));

    assert_eq!(reload_item(&ctx, items[0].id).await.shipped_quantity, 0);
    assert_eq!(reload_item(&ctx, other_items[0].id).await.shipped_quantity, 0);
    assert_eq!(order_status(&ctx, other_order.id).await, OrderStatus::Confirmed);
}

#[tokio::test]
async fn cancelled_orders_cannot_ship() {
    let ctx = TestContext::new().await;
    let product = ctx.product("VOID", None, false).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Cancelled, &[(product.id, 5, None)])
        .await;

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
}

#[tokio::test]
async fn shipping_draws_stock_from_the_warehouse() {
    let ctx = TestContext::new().await;
    let product = ctx.product("PALLET", None, false).await;
    let warehouse = Uuid::new_v4();
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 8, Some(warehouse))])
        .await;
    let ledger = &ctx.services.inventory;

    ledger.adjust_inventory(product.id, warehouse, 5, false).await.unwrap();

    let result = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 3)],
            ShipmentMeta {
                carrier: Some("UPS".into()),
                tracking_number: Some("1Z999".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.shipment.carrier.as_deref(), Some("UPS"));
    assert_eq!(ledger.on_hand(product.id, warehouse).await.unwrap(), 2);

    let movements = ledger.movements(product.id, warehouse).await.unwrap();
    let last = movements.last().expect("shipment movement");
    assert_eq!(last.reason, MovementReason::Shipment);
    assert_eq!(last.delta, -3);
    assert_eq!(last.reference_id, Some(result.shipment.id));

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 3)],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NegativeStockRejected { on_hand: 2, .. });

    assert_eq!(reload_item(&ctx, items[0].id).await.shipped_quantity, 3);
    assert_eq!(
        ctx.services
            .shipments
            .shipments_for_order(order.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn serial_tracked_lines_reserve_then_sell_units() {
    let ctx = TestContext::new().await;
    let product = ctx.product("SCOPE", None, true).await;
    let serials = serials_for(&ctx, product.id, 3).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 3, None)])
        .await;

    let result = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 2).with_serial_numbers(serials[..2].to_vec())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.lines[0].serial_numbers, serials[..2].to_vec());

    for serial in &serials[..2] {
        let row = ctx
            .services
            .serial_numbers
            .find_by_serial(serial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, SerialStatus::Reserved);
        assert_eq!(row.order_id, Some(order.id));
        assert_eq!(row.shipment_item_id, Some(result.lines[0].item.id));
    }

    let shipped = ctx
        .services
        .shipments
        .mark_shipped(result.shipment.id)
        .await
        .unwrap();
    assert_eq!(shipped.status, ShipmentStatus::Shipped);
    assert!(shipped.shipped_at.is_some());

    let sold = ctx
        .services
        .serial_numbers
        .find_by_serial(&serials[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sold.status, SerialStatus::Sold);

    let err = ctx
        .services
        .shipments
        .mark_shipped(result.shipment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    let err = ctx
        .services
        .serial_numbers
        .mark_defective(&serials[0])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1).with_serial_numbers(vec![serials[0].clone()])],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn ship_immediately_sells_units_in_one_step() {
    let ctx = TestContext::new().await;
    let product = ctx.product("LENS", None, true).await;
    let serials = serials_for(&ctx, product.id, 1).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 1, None)])
        .await;

    let result = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1).with_serial_numbers(serials.clone())],
            ShipmentMeta {
                ship_immediately: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.shipment.status, ShipmentStatus::Shipped);
    assert_eq!(result.order_status, OrderStatus::Shipped);
    let row = ctx
        .services
        .serial_numbers
        .find_by_serial(&serials[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, SerialStatus::Sold);
}

#[tokio::test]
async fn serial_lists_must_match_the_line() {
    let ctx = TestContext::new().await;
    let product = ctx.product("SCANNER", None, true).await;
    let other = ctx.product("DECOY", None, true).await;
    let serials = serials_for(&ctx, product.id, 3).await;
    let foreign = serials_for(&ctx, other.id, 1).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 3, None)])
        .await;
    let item = items[0].id;
    let shipments = &ctx.services.shipments;

    let err = shipments
        .create_partial_shipment(order.id, vec![LineAllocation::new(item, 2)], ShipmentMeta::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item, 2).with_serial_numbers(vec![serials[0].clone()])],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item, 2)
                .with_serial_numbers(vec![serials[0].clone(), serials[0].clone()])],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item, 1).with_serial_numbers(foreign.clone())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));

    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item, 1).with_serial_numbers(vec!["GHOST-1".into()])],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReferenceNotFound(_));

    ctx.services
        .serial_numbers
        .mark_defective(&serials[1])
        .await
        .unwrap();
    let err = shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(item, 1).with_serial_numbers(vec![serials[1].clone()])],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    assert_eq!(reload_item(&ctx, item).await.shipped_quantity, 0);
}

#[tokio::test]
async fn units_reserved_for_another_order_are_off_limits() {
    let ctx = TestContext::new().await;
    let product = ctx.product("METER", None, true).await;
    let serials = serials_for(&ctx, product.id, 2).await;
    let (first_order, first_items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 1, None)])
        .await;
    let (second_order, second_items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 1, None)])
        .await;

    ctx.services
        .serial_numbers
        .reserve_serial_numbers(first_items[0].id, &serials[..1])
        .await
        .unwrap();

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            second_order.id,
            vec![LineAllocation::new(second_items[0].id, 1).with_serial_numbers(serials[..1].to_vec())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let result = ctx
        .services
        .shipments
        .create_partial_shipment(
            first_order.id,
            vec![LineAllocation::new(first_items[0].id, 1).with_serial_numbers(serials[..1].to_vec())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.order_status, OrderStatus::Shipped);

    let (shipment, items) = ctx
        .services
        .shipments
        .get_shipment(result.shipment.id)
        .await
        .unwrap();
    assert_eq!(shipment.order_id, first_order.id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 1);
}

#[tokio::test]
async fn reserved_unit_on_open_shipment_cannot_be_reallocated() {
    let ctx = TestContext::new().await;
    let product = ctx.product("LENS", None, true).await;
    let serials = serials_for(&ctx, product.id, 1).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 2, None)])
        .await;

    let first = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1).with_serial_numbers(serials.clone())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap();

    let err = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1).with_serial_numbers(serials.clone())],
            ShipmentMeta::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let unit = ctx
        .services
        .serial_numbers
        .find_by_serial(&serials[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, SerialStatus::Reserved);
    assert_eq!(unit.shipment_item_id, Some(first.lines[0].item.id));
    assert_eq!(reload_item(&ctx, items[0].id).await.shipped_quantity, 1);
    assert_eq!(order_status(&ctx, order.id).await, OrderStatus::PartiallyShipped);
    assert_eq!(
        ctx.services
            .shipments
            .shipments_for_order(order.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn reserved_unit_ships_once_through_its_own_order() {
    let ctx = TestContext::new().await;
    let product = ctx.product("PRISM", None, true).await;
    let serials = serials_for(&ctx, product.id, 1).await;
    let (order, items) = ctx
        .sales_order(OrderStatus::Confirmed, &[(product.id, 1, None)])
        .await;

    ctx.services
        .serial_numbers
        .reserve_serial_numbers(items[0].id, &serials)
        .await
        .unwrap();

    let result = ctx
        .services
        .shipments
        .create_partial_shipment(
            order.id,
            vec![LineAllocation::new(items[0].id, 1).with_serial_numbers(serials.clone())],
            ShipmentMeta {
                ship_immediately: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.order_status, OrderStatus::Shipped);

    let unit = ctx
        .services
        .serial_numbers
        .find_by_serial(&serials[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, SerialStatus::Sold);
    assert_eq!(unit.order_item_id, Some(items[0].id));
}
