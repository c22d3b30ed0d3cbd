//! Command handler modules
//!
//! This module contains the command handler functions called from main.rs,
//! organized by functionality area.

pub mod ledger;
pub mod onboarding;
pub mod scan;
pub mod sources;
pub mod upload;

// Re-export all public handler functions for convenient use
pub use ledger::{handle_ledger_forget, handle_ledger_list, handle_ledger_mark};
pub use onboarding::{is_initialized, run_onboarding_flow};
pub use scan::handle_scan;
pub use sources::handle_sources;
pub use upload::handle_upload;
