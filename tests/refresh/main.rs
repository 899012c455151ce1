#[path = "../support/mod.rs"]
mod support;

mod fmp_provider;
mod sqlite_store;
