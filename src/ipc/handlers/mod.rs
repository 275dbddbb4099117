pub mod assignments;
pub mod core;
pub mod eligibility;
pub mod nightly;
pub mod sessions;
pub mod setup;
pub mod timer;
