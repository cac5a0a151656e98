pub mod capsules;
pub mod error;
pub mod groups;
pub mod state;
