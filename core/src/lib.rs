pub mod cache;
pub mod connectivity;
pub mod db;
pub mod models;
pub mod month;
pub mod queue;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;
