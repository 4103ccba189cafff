mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::TestApp;
use workstock::{
    entities::stock_movement::ChangeKind,
    errors::ServiceError,
    services::products::{BomLineInput, ProductInput},
};

async fn controller_product(app: &TestApp, m1: i64, m2: i64) -> i64 {
    let product = app
        .services
        .products
        .create_product(ProductInput {
            name: "Controller".to_string(),
            article_number: "ART-CTRL".to_string(),
        })
        .await
        .unwrap();
    app.services
        .products
        .set_bom_lines(
            product.id,
            vec![
                BomLineInput {
                    material_id: m1,
                    quantity_per_unit: dec!(2),
                },
                BomLineInput {
                    material_id: m2,
                    quantity_per_unit: dec!(1),
                },
            ],
        )
        .await
        .unwrap();
    product.id
}

#[tokio::test]
async fn manufacturing_consumes_materials_and_credits_finished_goods() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let m1 = app.material("Housing part").await;
    let m2 = app.material("Main board").await;
    let product = controller_product(&app, m1, m2).await;

    app.seed_stock(workshop, m1, dec!(10)).await;
    app.seed_stock(workshop, m2, dec!(5)).await;

    let report = app
        .services
        .manufacturing
        .manufacture(product, workshop, dec!(3))
        .await
        .unwrap();

    assert_eq!(report.product_stock, dec!(3));
    assert_eq!(report.consumed.len(), 2);
    assert_eq!(app.stock(m1, workshop).await, dec!(4)); // 10 - 2*3
    assert_eq!(app.stock(m2, workshop).await, dec!(2)); // 5 - 1*3

    let movements = app
        .services
        .ledger
        .list_movements(m1, Some(workshop))
        .await
        .unwrap();
    let consumption = movements
        .iter()
        .find(|m| m.kind() == Some(ChangeKind::Consumption))
        .unwrap();
    assert!(consumption.note.contains("Manufactured 3x Controller"));
    assert!(consumption.origin().is_none());

    assert_eq!(
        app.services
            .manufacturing
            .product_stock(product, workshop)
            .await
            .unwrap(),
        dec!(3)
    );
}

#[tokio::test]
async fn one_uncovered_bom_line_rejects_the_whole_run() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let m1 = app.material("Housing part").await;
    let m2 = app.material("Main board").await;
    let product = controller_product(&app, m1, m2).await;

    app.seed_stock(workshop, m1, dec!(10)).await;
    app.seed_stock(workshop, m2, dec!(2)).await; // needs 3

    let err = app
        .services
        .manufacturing
        .manufacture(product, workshop, dec!(3))
        .await
        .unwrap_err();
    assert_matches!(&err, ServiceError::InsufficientStock(msg) => {
        assert!(msg.contains("Main board"));
    });

    // The covered line was not consumed either, and nothing was produced.
    assert_eq!(app.stock(m1, workshop).await, dec!(10));
    assert_eq!(app.stock(m2, workshop).await, dec!(2));
    assert_eq!(
        app.services
            .manufacturing
            .product_stock(product, workshop)
            .await
            .unwrap(),
        dec!(0)
    );
}

#[tokio::test]
async fn repeated_runs_accumulate_the_finished_goods_counter() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;
    let m1 = app.material("Housing part").await;
    let m2 = app.material("Main board").await;
    let product = controller_product(&app, m1, m2).await;

    app.seed_stock(workshop, m1, dec!(20)).await;
    app.seed_stock(workshop, m2, dec!(10)).await;

    app.services
        .manufacturing
        .manufacture(product, workshop, dec!(2))
        .await
        .unwrap();
    let report = app
        .services
        .manufacturing
        .manufacture(product, workshop, dec!(3))
        .await
        .unwrap();

    assert_eq!(report.product_stock, dec!(5));
}

#[tokio::test]
async fn product_stock_is_visible_across_workshops() {
    let app = TestApp::new().await;
    let potsdam = app.workshop("Potsdam").await;
    let rauen = app.workshop("Rauen").await;
    let m1 = app.material("Housing part").await;
    let m2 = app.material("Main board").await;
    let product = controller_product(&app, m1, m2).await;

    for workshop in [potsdam, rauen] {
        app.seed_stock(workshop, m1, dec!(10)).await;
        app.seed_stock(workshop, m2, dec!(10)).await;
    }

    app.services
        .manufacturing
        .manufacture(product, potsdam, dec!(4))
        .await
        .unwrap();
    app.services
        .manufacturing
        .manufacture(product, rauen, dec!(1))
        .await
        .unwrap();

    let summary = app
        .services
        .manufacturing
        .product_stock_all_workshops(product)
        .await
        .unwrap();
    assert_eq!(summary.total, dec!(5));
    assert_eq!(summary.per_workshop.len(), 2);

    let overview = app
        .services
        .manufacturing
        .workshop_product_overview(potsdam)
        .await
        .unwrap();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].quantity, dec!(4));
}

#[tokio::test]
async fn run_without_bom_or_with_bad_quantity_is_rejected() {
    let app = TestApp::new().await;
    let workshop = app.workshop("Potsdam").await;

    let bare = app
        .services
        .products
        .create_product(ProductInput {
            name: "Shell only".to_string(),
            article_number: "ART-SHELL".to_string(),
        })
        .await
        .unwrap();

    let err = app
        .services
        .manufacturing
        .manufacture(bare.id, workshop, dec!(1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .manufacturing
        .manufacture(bare.id, workshop, dec!(0))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
