//! P-Mode model and the deployed P-Mode set.

pub mod set;
pub mod types;

pub use set::{InMemoryPModeSet, PModeSet, PModeSetError};
pub use types::{
    BusinessInfo, Leg, LegLabel, PMode, PModeError, Protocol, PullRequestFlow, UserMessageFlow,
};
