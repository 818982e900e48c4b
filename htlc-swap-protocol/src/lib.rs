// HTLC atomic swap coordination between ethereum and cosmos

pub mod api;
pub mod clock;
pub mod config;
pub mod cross_chain;
pub mod crypto;
pub mod data_structures;
pub mod error;
pub mod onchain;
pub mod registry;
pub mod validation;

pub mod test_utils; // Shared by unit and integration tests
