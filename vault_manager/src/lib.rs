mod access;
mod api;
mod canister;
mod cleanup;
mod config;
mod constants;
mod custody;
mod fees;
mod guards;
mod journal;
mod prices;
mod protocol;
mod settlement;
mod state;
mod strategy;
mod strategy_set;
mod tickets;
mod types;
mod utils;
mod vault;

#[cfg(test)]
mod tests;

pub use canister::VaultManager;
