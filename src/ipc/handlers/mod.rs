pub mod cart;
pub mod categories;
pub mod core;
pub mod import_menu;
pub mod items;
pub mod orders;
