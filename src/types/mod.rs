//! Value types shared by every stage of the pipeline.

pub mod account;
pub mod conversions;
pub mod fraction;
pub mod holder;

pub use account::{Account, Network};
pub use conversions::serde_u256;
pub use fraction::Fraction;
pub use holder::{AccountRecord, HolderRecord};
