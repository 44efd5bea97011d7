//! Leg resolution for individual message units.
//!
//! A message unit travels on the leg determined by its kind and direction.
//! Error signals in two-way exchanges are the exception: they travel on the
//! leg of the message unit they report on, which has to be looked up in the
//! message store.

use serde::{Deserialize, Serialize};

use crate::mep;
use crate::pmode::{LegLabel, PMode};

/// Kind of an ebMS message unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageUnitKind {
    UserMessage,
    PullRequest,
    Receipt,
    Error,
}

/// Direction of travel relative to this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// The metadata of a message unit needed to resolve its leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUnitRef {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_to_message_id: Option<String>,
    pub kind: MessageUnitKind,
    pub direction: Direction,
}

/// Message store query used to follow `ref_to_message_id` references.
pub trait MessageUnitLookup: Send + Sync {
    /// All stored message units carrying `message_id`. More than one entry
    /// means the id is ambiguous (e.g. stored in both directions).
    fn find_by_message_id(&self, message_id: &str) -> Vec<MessageUnitRef>;
}

/// Resolves the leg on which `unit` travels under `pmode`.
///
/// Returns `None` when the leg cannot be determined. For two-way Error signals
/// that happens when the referenced message unit is missing, ambiguous or is
/// itself an Error; callers skip leg-specific handling in that case.
#[must_use]
pub fn leg_for_message_unit(
    pmode: &PMode,
    unit: &MessageUnitRef,
    lookup: &dyn MessageUnitLookup,
) -> Option<LegLabel> {
    match unit.kind {
        MessageUnitKind::Error => error_leg(pmode, unit, lookup),
        kind => direct_leg(pmode, kind, unit.direction),
    }
}

/// Leg of a non-Error message unit, derived from kind and direction alone.
fn direct_leg(pmode: &PMode, kind: MessageUnitKind, direction: Direction) -> Option<LegLabel> {
    match (kind, direction) {
        (MessageUnitKind::UserMessage, Direction::Outbound)
        | (MessageUnitKind::PullRequest | MessageUnitKind::Receipt, Direction::Inbound) => {
            mep::send_leg(pmode)
        }
        (MessageUnitKind::UserMessage, Direction::Inbound)
        | (MessageUnitKind::PullRequest | MessageUnitKind::Receipt, Direction::Outbound) => {
            mep::receive_leg(pmode)
        }
        (MessageUnitKind::Error, _) => None,
    }
}

fn error_leg(
    pmode: &PMode,
    unit: &MessageUnitRef,
    lookup: &dyn MessageUnitLookup,
) -> Option<LegLabel> {
    if !pmode.is_two_way() {
        return pmode.leg(LegLabel::Request).map(|_| LegLabel::Request);
    }
    let ref_id = unit.ref_to_message_id.as_deref()?;
    let referenced = lookup.find_by_message_id(ref_id);
    match referenced.as_slice() {
        [single] => direct_leg(pmode, single.kind, single.direction),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
