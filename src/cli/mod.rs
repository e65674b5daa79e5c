pub mod cache;
pub mod fetch;
pub mod instruments;
pub mod markets;
pub mod setup;
pub mod ui;
