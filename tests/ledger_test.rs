mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::TestApp;
use workstock::{
    entities::stock_movement::{ChangeKind, Origin},
    errors::ServiceError,
    services::{
        deliveries::{DeliveryInput, DeliveryItemInput},
        ledger,
    },
};

#[tokio::test]
async fn balance_is_independent_of_insertion_order() {
    let forward = TestApp::new().await;
    let backward = TestApp::new().await;

    let history = [
        (ChangeKind::InboundDelivery, dec!(10.00)),
        (ChangeKind::Consumption, dec!(2.50)),
        (ChangeKind::ManualAdjustment, dec!(-1.00)),
        (ChangeKind::TransferIn, dec!(4.00)),
        (ChangeKind::Loss, dec!(0.25)),
    ];

    let w1 = forward.workshop("Potsdam").await;
    let m1 = forward.material("Housing part").await;
    for (kind, quantity) in history {
        ledger::record_movement(forward.db.as_ref(), w1, m1, kind, quantity, "", None)
            .await
            .unwrap();
    }

    let w2 = backward.workshop("Potsdam").await;
    let m2 = backward.material("Housing part").await;
    for (kind, quantity) in history.into_iter().rev() {
        ledger::record_movement(backward.db.as_ref(), w2, m2, kind, quantity, "", None)
            .await
            .unwrap();
    }

    assert_eq!(forward.stock(m1, w1).await, dec!(10.25));
    assert_eq!(backward.stock(m2, w2).await, dec!(10.25));
}

#[tokio::test]
async fn record_movement_applies_the_kinds_sign() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    app.seed_stock(workshop, material, dec!(10)).await;
    let movement = ledger::record_movement(
        app.db.as_ref(),
        workshop,
        material,
        ChangeKind::Consumption,
        dec!(4),
        "Prototype batch",
        None,
    )
    .await
    .unwrap();

    assert_eq!(movement.quantity, dec!(-4));
    assert_eq!(movement.kind(), Some(ChangeKind::Consumption));
    assert!(movement.origin().is_none());
    assert_eq!(app.stock(material, workshop).await, dec!(6));
}

#[tokio::test]
async fn document_movements_cannot_be_edited_or_deleted_directly() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    app.services
        .deliveries
        .create_delivery(DeliveryInput {
            workshop_id: workshop,
            order_id: None,
            delivered_on: None,
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

    let movements = app
        .services
        .ledger
        .list_movements(material, Some(workshop))
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    let movement = &movements[0];
    assert!(movement.origin().is_some());

    let err = app
        .services
        .ledger
        .update_movement(movement.id, dec!(9), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConsistencyError(_));

    let err = app
        .services
        .ledger
        .delete_movement(movement.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConsistencyError(_));

    // The guarded movement is untouched.
    assert_eq!(app.stock(material, workshop).await, dec!(5));
}

#[tokio::test]
async fn manual_movements_can_be_corrected_and_removed() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    app.seed_stock(workshop, material, dec!(10)).await;

    let movement = app
        .services
        .ledger
        .record_movement(workshop, material, ChangeKind::Consumption, dec!(4), "Batch")
        .await
        .unwrap();
    assert_eq!(app.stock(material, workshop).await, dec!(6));

    app.services
        .ledger
        .update_movement(movement.id, dec!(2), Some("Smaller batch".to_string()))
        .await
        .unwrap();
    assert_eq!(app.stock(material, workshop).await, dec!(8));

    app.services.ledger.delete_movement(movement.id).await.unwrap();
    assert_eq!(app.stock(material, workshop).await, dec!(10));
}

#[tokio::test]
async fn correcting_a_movement_cannot_overdraw_the_balance() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    app.seed_stock(workshop, material, dec!(10)).await;

    let movement = app
        .services
        .ledger
        .record_movement(workshop, material, ChangeKind::Consumption, dec!(4), "")
        .await
        .unwrap();

    let err = app
        .services
        .ledger
        .update_movement(movement.id, dec!(11), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The rejected correction left the history unchanged.
    assert_eq!(app.stock(material, workshop).await, dec!(6));
}

#[tokio::test]
async fn movements_for_origin_finds_the_document_set() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    let delivery = app
        .services
        .deliveries
        .create_delivery(DeliveryInput {
            workshop_id: workshop,
            order_id: None,
            delivered_on: None,
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

    let movements =
        ledger::movements_for_origin(app.db.as_ref(), Origin::delivery(delivery.id))
            .await
            .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].material_id, material);

    let none = ledger::movements_for_origin(app.db.as_ref(), Origin::transfer(delivery.id))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn unknown_material_or_workshop_is_not_found() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;

    let err = app.services.ledger.current_stock(material, 999).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = app.services.ledger.current_stock(999, workshop).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn material_stock_reports_alternatives_separately() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    let alternative = app.material("Housing part rev B").await;
    app.services
        .materials
        .add_alternative(material, alternative)
        .await
        .unwrap();

    app.seed_stock(workshop, material, dec!(4)).await;
    app.seed_stock(workshop, alternative, dec!(6)).await;

    let stock = app
        .services
        .ledger
        .material_stock(material, workshop)
        .await
        .unwrap();

    assert_eq!(stock.current_stock, dec!(4));
    assert_eq!(stock.alternatives.len(), 1);
    assert_eq!(stock.alternatives[0].material_id, alternative);
    assert_eq!(stock.alternatives[0].current_stock, dec!(6));
}

#[tokio::test]
async fn workshop_overview_groups_by_category_in_sort_order() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;

    let cases = app
        .services
        .materials
        .create_category("Cases", 2)
        .await
        .unwrap();
    let electronics = app
        .services
        .materials
        .create_category("Electronics", 1)
        .await
        .unwrap();

    let cased = app
        .services
        .materials
        .create_material(workstock::services::materials::MaterialInput {
            name: "Front shell".to_string(),
            manufacturer_name: String::new(),
            order_number: String::new(),
            category_id: Some(cases.id),
            deprecated: false,
        })
        .await
        .unwrap();
    let board = app
        .services
        .materials
        .create_material(workstock::services::materials::MaterialInput {
            name: "Main board".to_string(),
            manufacturer_name: String::new(),
            order_number: String::new(),
            category_id: Some(electronics.id),
            deprecated: false,
        })
        .await
        .unwrap();
    let loose = app.material("Loose screw").await;

    app.seed_stock(workshop, cased.id, dec!(3)).await;
    app.seed_stock(workshop, board.id, dec!(7)).await;

    let overview = app
        .services
        .ledger
        .workshop_stock_overview(workshop)
        .await
        .unwrap();

    assert_eq!(overview.len(), 3);
    assert_eq!(overview[0].category_name, "Electronics");
    assert_eq!(overview[0].materials[0].current_stock, dec!(7));
    assert_eq!(overview[1].category_name, "Cases");
    assert_eq!(overview[1].materials[0].current_stock, dec!(3));
    assert_eq!(overview[2].category_id, None);
    assert_eq!(overview[2].materials[0].material_id, loose);
    assert_eq!(overview[2].materials[0].current_stock, dec!(0));
}
