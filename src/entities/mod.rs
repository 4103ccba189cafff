pub mod bom_line;
pub mod delivery;
pub mod delivery_item;
pub mod material;
pub mod material_alternative;
pub mod material_category;
pub mod product;
pub mod product_stock;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod stock_movement;
pub mod transfer;
pub mod transfer_item;
pub mod workshop;
