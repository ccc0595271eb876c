//! # GNO Airdrop Ledger
//!
//! Reconciles GNO exposure and trading activity across Ethereum mainnet and
//! Gnosis Chain into a single, conserved allocation ledger, then splits that
//! ledger by the network each account will claim on.
//!
//! ## Overview
//!
//! - **Sources**: per-network holdings (direct balances, LP shares, Balancer
//!   pools, Uniswap V3 positions, beacon deposits), trading activity and POAP
//!   holders, each fetched once and memoized as CSV
//! - **Engines**: pro-rata holder allocation, tiered trader allocation and
//!   weighted POAP allocation, all in integer base units with floor division
//! - **Ledger**: one row per account with an airdrop column and the option
//!   columns, split across networks with every account on exactly one side
//!
//! ## Architecture
//!
//! ### Collaborators
//! External services sit behind async traits ([`query_client::QueryClient`],
//! [`account_info::AccountInfo`], [`sources::uniswap_v3::PositionSource`]) so
//! every stage can run against in-memory doubles.
//!
//! ### Cache
//! Every intermediate result is a CSV file in the output directory. A rerun
//! against a populated directory contacts no external service.

// Core Types
/// Accounts, networks, fractions and CSV records
pub mod types;
/// Error taxonomy of the allocation engines
pub mod error;
/// Integer arithmetic and token display helpers
pub mod normalization;
/// Uniswap V3 tick and liquidity math
pub mod v3_math;
/// General utilities
pub mod utils;

// Collaborators
/// Analytics query client abstraction
pub mod query_client;
/// Dune Analytics client
pub mod dune;
/// Contract detection and native balances
pub mod account_info;

// Data Layer
/// CSV memoization of intermediate results
pub mod cache;
/// Per-venue data sources
pub mod sources;
/// Network holdings assembly and cross-network reconciliation
pub mod holders;

// Engines
/// Holder, trader and POAP allocation engines
pub mod allocation;
/// Ledger rows and option categories
pub mod ledger;
/// Network split of the ledger
pub mod split;
/// End-to-end orchestration of the stages
pub mod pipeline;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use error::AllocationError;
pub use pipeline::Pipeline;
pub use settings::Settings;
