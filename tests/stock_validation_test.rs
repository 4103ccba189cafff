mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::TestApp;
use workstock::{
    errors::ServiceError,
    services::{
        stock_validation,
        transfers::{TransferInput, TransferItemInput},
    },
};

#[tokio::test]
async fn stock_is_computed_per_workshop() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let material = app.material("Housing part").await;

    app.seed_stock(potsdam, material, dec!(10.00)).await;
    app.seed_stock(rauen, material, dec!(5.00)).await;

    assert_eq!(app.stock(material, potsdam).await, dec!(10.00));
    assert_eq!(app.stock(material, rauen).await, dec!(5.00));
}

#[tokio::test]
async fn valid_withdrawal_is_accepted() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    app.seed_stock(workshop, material, dec!(10.00)).await;

    let validation =
        stock_validation::validate_movement(app.db.as_ref(), material, workshop, dec!(-5))
            .await
            .unwrap();

    assert!(validation.valid);
    assert_eq!(validation.current_stock, dec!(10.00));
    assert_eq!(validation.message, "OK");
}

#[tokio::test]
async fn overdraw_is_rejected_with_actionable_message() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    app.seed_stock(workshop, material, dec!(10.00)).await;

    let validation =
        stock_validation::validate_movement(app.db.as_ref(), material, workshop, dec!(-15))
            .await
            .unwrap();

    assert!(!validation.valid);
    assert_eq!(validation.current_stock, dec!(10.00));
    assert!(validation.message.contains("would become negative"));
    assert!(validation.message.contains("current 10"));
    assert!(validation.message.contains("change -15"));
}

#[tokio::test]
async fn withdrawal_to_exactly_zero_is_allowed() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let material = app.material("Housing part").await;
    app.seed_stock(workshop, material, dec!(10.00)).await;

    let validation =
        stock_validation::validate_movement(app.db.as_ref(), material, workshop, dec!(-10))
            .await
            .unwrap();

    assert!(validation.valid);
    assert_eq!(validation.message, "OK");
}

#[tokio::test]
async fn transfer_with_sufficient_stock_moves_both_balances() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let material = app.material("Housing part").await;
    app.seed_stock(potsdam, material, dec!(10.00)).await;
    app.seed_stock(rauen, material, dec!(5.00)).await;

    let transfer = app
        .services
        .transfers
        .create_transfer(TransferInput {
            source_workshop_id: potsdam,
            target_workshop_id: rauen,
            note: "Restock".to_string(),
            items: vec![TransferItemInput {
                material_id: material,
                quantity: dec!(8),
                note: String::new(),
            }],
        })
        .await
        .unwrap();

    assert_eq!(transfer.items.len(), 1);
    assert_eq!(app.stock(material, potsdam).await, dec!(2.00));
    assert_eq!(app.stock(material, rauen).await, dec!(13.00));
}

#[tokio::test]
async fn transfer_with_insufficient_stock_is_rejected() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let material = app.material("Housing part").await;
    app.seed_stock(potsdam, material, dec!(10.00)).await;

    let err = app
        .services
        .transfers
        .create_transfer(TransferInput {
            source_workshop_id: potsdam,
            target_workshop_id: rauen,
            note: String::new(),
            items: vec![TransferItemInput {
                material_id: material,
                quantity: dec!(15),
                note: String::new(),
            }],
        })
        .await
        .unwrap_err();

    assert_matches!(&err, ServiceError::InsufficientStock(msg) => {
        assert!(msg.contains("Housing part"));
        assert!(msg.contains("would become negative"));
    });

    // Nothing was written.
    assert_eq!(app.stock(material, potsdam).await, dec!(10.00));
    assert_eq!(app.stock(material, rauen).await, dec!(0));
    assert!(app.services.transfers.list_transfers().await.unwrap().is_empty());
}

#[tokio::test]
async fn multi_material_transfer_moves_all_lines() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let first = app.material("Housing part").await;
    let second = app.material("Screw set").await;
    app.seed_stock(potsdam, first, dec!(10.00)).await;
    app.seed_stock(potsdam, second, dec!(3.00)).await;

    app.services
        .transfers
        .create_transfer(TransferInput {
            source_workshop_id: potsdam,
            target_workshop_id: rauen,
            note: String::new(),
            items: vec![
                TransferItemInput {
                    material_id: first,
                    quantity: dec!(5),
                    note: String::new(),
                },
                TransferItemInput {
                    material_id: second,
                    quantity: dec!(2),
                    note: String::new(),
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(app.stock(first, potsdam).await, dec!(5.00));
    assert_eq!(app.stock(second, potsdam).await, dec!(1.00));
    assert_eq!(app.stock(first, rauen).await, dec!(5.00));
    assert_eq!(app.stock(second, rauen).await, dec!(2.00));
}

#[tokio::test]
async fn one_uncovered_line_rejects_the_whole_transfer() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let first = app.material("Housing part").await;
    let second = app.material("Screw set").await;
    app.seed_stock(potsdam, first, dec!(10.00)).await;
    app.seed_stock(potsdam, second, dec!(1.00)).await;

    let err = app
        .services
        .transfers
        .create_transfer(TransferInput {
            source_workshop_id: potsdam,
            target_workshop_id: rauen,
            note: String::new(),
            items: vec![
                TransferItemInput {
                    material_id: first,
                    quantity: dec!(5), // covered
                    note: String::new(),
                },
                TransferItemInput {
                    material_id: second,
                    quantity: dec!(3), // only 1 in stock
                    note: String::new(),
                },
            ],
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The covered line was not applied either.
    assert_eq!(app.stock(first, potsdam).await, dec!(10.00));
    assert_eq!(app.stock(second, potsdam).await, dec!(1.00));
    assert_eq!(app.stock(first, rauen).await, dec!(0));
}

#[tokio::test]
async fn repeated_lines_of_one_material_are_validated_cumulatively() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let material = app.material("Housing part").await;
    app.seed_stock(potsdam, material, dec!(10.00)).await;

    // Each line alone is covered, their sum is not.
    let err = app
        .services
        .transfers
        .create_transfer(TransferInput {
            source_workshop_id: potsdam,
            target_workshop_id: rauen,
            note: String::new(),
            items: vec![
                TransferItemInput {
                    material_id: material,
                    quantity: dec!(6),
                    note: String::new(),
                },
                TransferItemInput {
                    material_id: material,
                    quantity: dec!(6),
                    note: String::new(),
                },
            ],
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(app.stock(material, potsdam).await, dec!(10.00));
}
