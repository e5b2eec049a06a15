//! Pure evaluation logic: trigger firing and notification decisions

pub mod decision;
pub mod trigger;

pub use decision::{decide, Decision};
pub use trigger::fired_at;
