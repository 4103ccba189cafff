// Ledger core
pub mod ledger;
pub mod stock_validation;

// Document services writing through the ledger
pub mod adjustments;
pub mod deliveries;
pub mod transfers;

// Master data
pub mod materials;
pub mod workshops;

// Purchasing and manufacturing
pub mod manufacturing;
pub mod orders;
pub mod products;

// Derived planning queries
pub mod requirements;
