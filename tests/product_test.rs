mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::TestApp;
use workstock::{
    errors::ServiceError,
    services::products::{BomLineInput, ProductInput},
};

async fn create_product(app: &TestApp, name: &str, article_number: &str) -> i64 {
    app.services
        .products
        .create_product(ProductInput {
            name: name.to_string(),
            article_number: article_number.to_string(),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn article_numbers_are_unique() {
    let app = TestApp::new().await;
    create_product(&app, "Controller", "ART-1").await;

    let err = app
        .services
        .products
        .create_product(ProductInput {
            name: "Other".to_string(),
            article_number: "ART-1".to_string(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn bom_lines_are_replaced_wholesale() {
    let app = TestApp::new().await;
    let m1 = app.material("Housing part").await;
    let m2 = app.material("Main board").await;
    let product = create_product(&app, "Controller", "ART-1").await;

    app.services
        .products
        .set_bom_lines(
            product,
            vec![BomLineInput {
                material_id: m1,
                quantity_per_unit: dec!(2),
            }],
        )
        .await
        .unwrap();

    let detail = app
        .services
        .products
        .set_bom_lines(
            product,
            vec![BomLineInput {
                material_id: m2,
                quantity_per_unit: dec!(1),
            }],
        )
        .await
        .unwrap();

    assert_eq!(detail.bom.len(), 1);
    assert_eq!(detail.bom[0].material_id, m2);
}

#[tokio::test]
async fn bom_rejects_duplicates_and_nonpositive_quantities() {
    let app = TestApp::new().await;
    let material = app.material("Housing part").await;
    let product = create_product(&app, "Controller", "ART-1").await;

    let err = app
        .services
        .products
        .set_bom_lines(
            product,
            vec![
                BomLineInput {
                    material_id: material,
                    quantity_per_unit: dec!(1),
                },
                BomLineInput {
                    material_id: material,
                    quantity_per_unit: dec!(2),
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .products
        .set_bom_lines(
            product,
            vec![BomLineInput {
                material_id: material,
                quantity_per_unit: dec!(0),
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn material_usage_lists_consuming_products() {
    let app = TestApp::new().await;
    let material = app.material("Screw set").await;
    let first = create_product(&app, "Controller", "ART-1").await;
    let second = create_product(&app, "Sensor", "ART-2").await;

    for (product, qpu) in [(first, dec!(2)), (second, dec!(5))] {
        app.services
            .products
            .set_bom_lines(
                product,
                vec![BomLineInput {
                    material_id: material,
                    quantity_per_unit: qpu,
                }],
            )
            .await
            .unwrap();
    }

    let usage = app.services.products.material_usage(material).await.unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].product_id, first);
    assert_eq!(usage[0].quantity_per_unit, dec!(2));
    assert_eq!(usage[1].product_id, second);
}

#[tokio::test]
async fn deprecation_cascades_to_exclusive_materials_only() {
    let app = TestApp::new().await;
    let shared = app.material("Screw set").await;
    let exclusive = app.material("Custom shell").await;

    let retiring = create_product(&app, "Controller v1", "ART-1").await;
    let surviving = create_product(&app, "Controller v2", "ART-2").await;

    app.services
        .products
        .set_bom_lines(
            retiring,
            vec![
                BomLineInput {
                    material_id: shared,
                    quantity_per_unit: dec!(1),
                },
                BomLineInput {
                    material_id: exclusive,
                    quantity_per_unit: dec!(1),
                },
            ],
        )
        .await
        .unwrap();
    app.services
        .products
        .set_bom_lines(
            surviving,
            vec![BomLineInput {
                material_id: shared,
                quantity_per_unit: dec!(1),
            }],
        )
        .await
        .unwrap();

    let summary = app
        .services
        .products
        .deprecate_product_with_materials(retiring)
        .await
        .unwrap();

    assert_eq!(summary.deprecated_material_ids, vec![exclusive]);
    assert!(app.services.products.get_product(retiring).await.unwrap().deprecated);
    assert!(app.services.materials.get_material(exclusive).await.unwrap().deprecated);
    assert!(!app.services.materials.get_material(shared).await.unwrap().deprecated);
}

#[tokio::test]
async fn alternatives_are_symmetric_and_self_links_are_rejected() {
    let app = TestApp::new().await;
    let first = app.material("Housing part").await;
    let second = app.material("Housing part rev B").await;

    let err = app
        .services
        .materials
        .add_alternative(first, first)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    app.services.materials.add_alternative(first, second).await.unwrap();
    // Adding the mirrored edge is a no-op, not a duplicate.
    app.services.materials.add_alternative(second, first).await.unwrap();

    let of_first = app.services.materials.alternatives_of(first).await.unwrap();
    let of_second = app.services.materials.alternatives_of(second).await.unwrap();
    assert_eq!(of_first.len(), 1);
    assert_eq!(of_first[0].id, second);
    assert_eq!(of_second.len(), 1);
    assert_eq!(of_second[0].id, first);

    app.services
        .materials
        .remove_alternative(second, first)
        .await
        .unwrap();
    assert!(app
        .services
        .materials
        .alternatives_of(first)
        .await
        .unwrap()
        .is_empty());
}
