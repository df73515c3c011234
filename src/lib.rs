pub mod backends;
pub mod carta;
pub mod config_loader;
pub mod console;
pub mod display;
pub mod games;
pub mod reading_order;
pub mod session;
pub mod speech;
