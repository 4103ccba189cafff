pub use sea_orm_migration::prelude::*;

mod m20240102_000001_create_workshops_table;
mod m20240102_000002_create_materials_tables;
mod m20240102_000003_create_stock_movements_table;
mod m20240102_000004_create_purchase_orders_tables;
mod m20240102_000005_create_deliveries_tables;
mod m20240102_000006_create_transfers_tables;
mod m20240102_000007_create_products_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240102_000001_create_workshops_table::Migration),
            Box::new(m20240102_000002_create_materials_tables::Migration),
            Box::new(m20240102_000003_create_stock_movements_table::Migration),
            Box::new(m20240102_000004_create_purchase_orders_tables::Migration),
            Box::new(m20240102_000005_create_deliveries_tables::Migration),
            Box::new(m20240102_000006_create_transfers_tables::Migration),
            Box::new(m20240102_000007_create_products_tables::Migration),
        ]
    }
}
