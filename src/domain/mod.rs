// Domain-specific error types
pub mod errors;

// Lifecycle event payloads
pub mod events;

// Profit-and-loss arithmetic
pub mod pnl;

// Port interfaces
pub mod ports;

// Persistence slot contracts
pub mod repositories;

// Registration schemas
pub mod schema;

// Core trading entities
pub mod types;

// Proposal validation
pub mod validation;
