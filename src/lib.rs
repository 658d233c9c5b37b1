pub mod collector;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod series;
pub mod storage;
pub mod trigger;
pub mod weekly;
