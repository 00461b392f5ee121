pub mod account;
pub mod config;
pub mod connection;
pub mod context;
pub mod lifecycle;
pub mod orchestrator;
pub mod presence;
pub mod reconciler;
pub mod supervisor;
pub mod terminal;

#[cfg(test)]
pub mod testing;
