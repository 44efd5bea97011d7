//! ebgate Core: P-Mode model, MEP binding resolution and message-unit leg resolution.

pub mod binding;
pub mod mep;
pub mod message_unit;
pub mod pmode;

pub use binding::{Mep, MepBinding, DEFAULT_MPC};
pub use message_unit::{
    leg_for_message_unit, Direction, MessageUnitKind, MessageUnitLookup, MessageUnitRef,
};
pub use pmode::{
    BusinessInfo, InMemoryPModeSet, Leg, LegLabel, PMode, PModeError, PModeSet, PModeSetError,
    Protocol, PullRequestFlow, UserMessageFlow,
};
