mod common;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use rust_decimal_macros::dec;

use common::TestApp;
use workstock::{
    errors::ServiceError,
    services::{
        deliveries::{DeliveryInput, DeliveryItemInput},
        orders::{OrderInput, OrderItemInput},
    },
};

fn order_input(material_id: i64) -> OrderInput {
    OrderInput {
        order_number: None,
        ordered_on: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
        shipping_cost: None,
        note: String::new(),
        is_historical: false,
        items: vec![OrderItemInput {
            material_id,
            quantity: dec!(10),
            price_per_unit: dec!(1.20),
            note: String::new(),
        }],
    }
}

#[tokio::test]
async fn order_number_is_generated_when_blank() {
    let app = TestApp::new().await;
    let material = app.material("Housing part").await;

    let order = app
        .services
        .orders
        .create_order(order_input(material))
        .await
        .unwrap();

    assert_eq!(order.order_number, format!("ORD-2024-{:05}", order.id));
}

#[tokio::test]
async fn custom_order_number_is_preserved_and_unique() {
    let app = TestApp::new().await;
    let material = app.material("Housing part").await;

    let mut input = order_input(material);
    input.order_number = Some("ORD-SPECIAL".to_string());
    let order = app.services.orders.create_order(input.clone()).await.unwrap();
    assert_eq!(order.order_number, "ORD-SPECIAL");

    let err = app.services.orders.create_order(input).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn arrival_is_derived_from_the_earliest_linked_delivery() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    let order = app
        .services
        .orders
        .create_order(order_input(material))
        .await
        .unwrap();
    assert_eq!(order.arrived_on, None);

    for day in [20, 12] {
        app.services
            .deliveries
            .create_delivery(DeliveryInput {
                workshop_id: workshop,
                order_id: Some(order.id),
                delivered_on: NaiveDate::from_ymd_opt(2024, 5, day),
                note: String::new(),
                is_historical: false,
                items: vec![DeliveryItemInput {
                    material_id: material,
                    quantity: dec!(5),
                    note: String::new(),
                }],
            })
            .await
            .unwrap();
    }

    let order = app.services.orders.get_order(order.id).await.unwrap();
    assert_eq!(order.arrived_on, NaiveDate::from_ymd_opt(2024, 5, 12));
}

#[tokio::test]
async fn update_replaces_the_item_list() {
    let app = TestApp::new().await;
    let first = app.material("Housing part").await;
    let second = app.material("Main board").await;

    let order = app
        .services
        .orders
        .create_order(order_input(first))
        .await
        .unwrap();

    let mut update = order_input(second);
    update.order_number = Some(order.order_number.clone());
    let updated = app
        .services
        .orders
        .update_order(order.id, update)
        .await
        .unwrap();

    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.items[0].material_id, second);
}

#[tokio::test]
async fn unit_price_with_shipping_spreads_the_cost_over_all_units() {
    let app = TestApp::new().await;
    let first = app.material("Housing part").await;
    let second = app.material("Main board").await;

    let order = app
        .services
        .orders
        .create_order(OrderInput {
            order_number: None,
            ordered_on: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            shipping_cost: Some(dec!(6.00)),
            note: String::new(),
            is_historical: false,
            items: vec![
                OrderItemInput {
                    material_id: first,
                    quantity: dec!(8),
                    price_per_unit: dec!(1.00),
                    note: String::new(),
                },
                OrderItemInput {
                    material_id: second,
                    quantity: dec!(4),
                    price_per_unit: dec!(2.50),
                    note: String::new(),
                },
            ],
        })
        .await
        .unwrap();

    // 6.00 shipping over 12 units adds 0.50 per unit on every line.
    assert_eq!(order.items[0].price_per_unit_with_shipping, dec!(1.50));
    assert_eq!(order.items[1].price_per_unit_with_shipping, dec!(3.00));
}

#[tokio::test]
async fn deleting_an_order_detaches_its_deliveries() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    let order = app
        .services
        .orders
        .create_order(order_input(material))
        .await
        .unwrap();
    let delivery = app
        .services
        .deliveries
        .create_delivery(DeliveryInput {
            workshop_id: workshop,
            order_id: Some(order.id),
            delivered_on: None,
            note: String::new(),
            is_historical: false,
            items: vec![DeliveryItemInput {
                material_id: material,
                quantity: dec!(10),
                note: String::new(),
            }],
        })
        .await
        .unwrap();

    app.services.orders.delete_order(order.id).await.unwrap();

    // The delivery and its stock survive without the order reference.
    let delivery = app
        .services
        .deliveries
        .get_delivery(delivery.id)
        .await
        .unwrap();
    assert!(delivery.order.is_none());
    assert_eq!(app.stock(material, workshop).await, dec!(10));
}

#[tokio::test]
async fn order_items_are_validated_before_anything_is_written() {
    let app = TestApp::new().await;
    let material = app.material("Housing part").await;

    let mut input = order_input(material);
    input.items.push(OrderItemInput {
        material_id: material,
        quantity: dec!(-1),
        price_per_unit: dec!(1.00),
        note: String::new(),
    });

    let err = app.services.orders.create_order(input).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(app.services.orders.list_orders().await.unwrap().is_empty());
}
