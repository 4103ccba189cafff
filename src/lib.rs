//! Workstock
//!
//! Inventory movement ledger for a multi-workshop manufacturing operation.
//! Stock is never stored as a mutable figure: it is the signed sum of an
//! append-only stream of typed movements per (material, workshop) pair.
//! Documents (deliveries, transfers) materialize movements through
//! replace-and-recompute synchronization, a validator keeps every balance
//! non-negative, and a requirements engine derives producible-unit counts
//! and shortage reports from the bill-of-materials graph.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::stock_validation::StockGuard;

/// All domain services wired to one pool, one event channel, and one stock
/// guard. The shared guard is what serializes concurrent validate-then-append
/// sequences on the same (material, workshop) pair across services.
#[derive(Clone)]
pub struct AppServices {
    pub workshops: Arc<services::workshops::WorkshopService>,
    pub materials: Arc<services::materials::MaterialService>,
    pub ledger: Arc<services::ledger::LedgerService>,
    pub deliveries: Arc<services::deliveries::DeliveryService>,
    pub transfers: Arc<services::transfers::TransferService>,
    pub adjustments: Arc<services::adjustments::AdjustmentService>,
    pub orders: Arc<services::orders::OrderService>,
    pub products: Arc<services::products::ProductService>,
    pub manufacturing: Arc<services::manufacturing::ManufacturingService>,
    pub requirements: Arc<services::requirements::RequirementsService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        let stock_guard = Arc::new(StockGuard::new());

        Self {
            workshops: Arc::new(services::workshops::WorkshopService::new(db.clone())),
            materials: Arc::new(services::materials::MaterialService::new(db.clone())),
            ledger: Arc::new(services::ledger::LedgerService::new(
                db.clone(),
                event_sender.clone(),
                stock_guard.clone(),
            )),
            deliveries: Arc::new(services::deliveries::DeliveryService::new(
                db.clone(),
                event_sender.clone(),
            )),
            transfers: Arc::new(services::transfers::TransferService::new(
                db.clone(),
                event_sender.clone(),
                stock_guard.clone(),
            )),
            adjustments: Arc::new(services::adjustments::AdjustmentService::new(
                db.clone(),
                event_sender.clone(),
                stock_guard.clone(),
            )),
            orders: Arc::new(services::orders::OrderService::new(
                db.clone(),
                event_sender.clone(),
            )),
            products: Arc::new(services::products::ProductService::new(db.clone())),
            manufacturing: Arc::new(services::manufacturing::ManufacturingService::new(
                db.clone(),
                event_sender,
                stock_guard,
            )),
            requirements: Arc::new(services::requirements::RequirementsService::new(db)),
        }
    }
}
