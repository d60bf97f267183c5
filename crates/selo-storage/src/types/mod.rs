//! Type definitions for selo storage.

mod certificates;
mod documents;
mod ids;
mod otp;
mod signers;
mod tenants;
mod tokens;

// Re-export all types from submodules
pub use certificates::*;
pub use documents::*;
pub use ids::*;
pub use otp::*;
pub use signers::*;
pub use tenants::*;
pub use tokens::*;
