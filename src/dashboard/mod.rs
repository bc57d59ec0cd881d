//! The creator dashboard: state model, history bucketing, persistence and the controller.

pub mod controller;
pub mod csv;
pub mod history;
pub mod model;
pub mod store;
pub mod view;

pub use controller::{Clients, ControllerOptions, DashboardController};
pub use store::SqliteStateStore;
