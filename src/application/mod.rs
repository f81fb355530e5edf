// Backtest driver
pub mod backtest;

// Composition root and public entry points
pub mod engine;

// Frame timeline service
pub mod frame;

// Live polling driver
pub mod live;

// Partial milestone tracking
pub mod milestones;

// Portfolio risk gate
pub mod risk;

// Strategy state machine
pub mod strategy;
