pub mod event_bus;
pub mod exchange;
pub mod mock;
pub mod observability;
pub mod persistence;
