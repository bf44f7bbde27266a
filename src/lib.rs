//! Live per-symbol price quotes fed by one pluggable data source and pushed to
//! many long-lived subscribers.
//!
//! A [`store::QuoteStore`] holds the latest quote per symbol behind one lock.
//! Exactly one [`source::DataSource`] writes into it: either the correlated
//! GBM [`simulator::SimulatedSource`] or the remote-snapshot
//! [`polled::PolledSource`]. Each subscriber gets its own
//! [`stream::run_distributor`] loop that diffs the store version and pushes
//! whole snapshots when it moves.

pub mod cli;
pub mod constants;
pub mod error;
pub mod factory;
pub mod logging;
pub mod massive;
pub mod model;
pub mod polled;
pub mod quote;
pub mod server;
pub mod simulator;
pub mod source;
pub mod store;
pub mod stream;
pub mod tail;
