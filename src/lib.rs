pub mod app;
pub mod catalog;
pub mod enrich;
pub mod favorites;
pub mod models;
pub mod session;
