#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;

use workstock::{
    db::{self, DbConfig, DbPool},
    entities::stock_movement::ChangeKind,
    events::EventSender,
    services::{ledger, materials::MaterialInput},
    AppServices,
};

/// Test harness backed by a private in-memory SQLite database.
///
/// The pool is capped at one connection so every service call sees the same
/// database; events are drained by a background task.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (tx, mut rx) = mpsc::channel(64);
        let event_task = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let db = Arc::new(pool);
        let services = AppServices::new(db.clone(), Arc::new(EventSender::new(tx)));

        Self {
            db,
            services,
            _event_task: event_task,
        }
    }

    pub async fn workshop(&self, name: &str) -> i64 {
        self.services
            .workshops
            .create_workshop(name)
            .await
            .expect("failed to create workshop")
            .id
    }

    pub async fn material(&self, name: &str) -> i64 {
        self.services
            .materials
            .create_material(MaterialInput {
                name: name.to_string(),
                manufacturer_name: String::new(),
                order_number: String::new(),
                category_id: None,
                deprecated: false,
            })
            .await
            .expect("failed to create material")
            .id
    }

    /// Seeds stock through the raw ledger append, the way back-filled
    /// balances enter the system.
    pub async fn seed_stock(&self, workshop_id: i64, material_id: i64, quantity: Decimal) {
        ledger::record_movement(
            self.db.as_ref(),
            workshop_id,
            material_id,
            ChangeKind::InboundDelivery,
            quantity,
            "Initial stock",
            None,
        )
        .await
        .expect("failed to seed stock");
    }

    pub async fn stock(&self, material_id: i64, workshop_id: i64) -> Decimal {
        ledger::current_stock(self.db.as_ref(), material_id, workshop_id)
            .await
            .expect("failed to read stock")
    }
}
