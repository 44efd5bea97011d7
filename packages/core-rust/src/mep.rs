//! MEP resolution: which leg carries what, seen from this gateway.
//!
//! Every decision derives from one fact per leg: whether this side has a
//! destination address configured for it, i.e. whether the leg is triggered
//! by us. Combined with the MEP binding that tells us
//!
//! - whether we initiate the exchange,
//! - on which leg our outgoing and incoming user messages travel,
//! - on which leg we send pull requests and on which we answer them,
//! - which MPC a pull request must name.
//!
//! All functions are pure and return `None` where the P-Mode has no such leg
//! (one-way P-Modes never resolve to REPLY).

use tracing::warn;

use crate::binding::{MepBinding, DEFAULT_MPC};
use crate::pmode::{Leg, LegLabel, PMode, PullRequestFlow};

/// Whether this gateway actively sends on `leg`: true iff the leg's protocol
/// carries a non-empty destination address.
#[must_use]
pub fn triggered_by_us(leg: &Leg) -> bool {
    leg.address().is_some()
}

/// `triggered_by_us` for the leg carrying `label`; a missing leg is not triggered.
fn triggered(pmode: &PMode, label: LegLabel) -> bool {
    pmode.leg(label).is_some_and(triggered_by_us)
}

/// `label` if the P-Mode defines a leg for it.
fn existing(pmode: &PMode, label: LegLabel) -> Option<LegLabel> {
    pmode.leg(label).map(|_| label)
}

/// Whether this gateway is the initiator of exchanges governed by `pmode`.
///
/// With a pushed request leg the initiator is the side that triggers it; with
/// a pulled request leg the initiator is the side being pulled from, so it has
/// no address for the request leg.
#[must_use]
pub fn is_initiator(pmode: &PMode) -> bool {
    let request_triggered = triggered(pmode, LegLabel::Request);
    if pmode.mep_binding.request_is_pushed() {
        request_triggered
    } else {
        !request_triggered
    }
}

/// The leg carrying the user messages this gateway sends.
#[must_use]
pub fn send_leg(pmode: &PMode) -> Option<LegLabel> {
    if is_initiator(pmode) {
        existing(pmode, LegLabel::Request)
    } else {
        existing(pmode, LegLabel::Reply)
    }
}

/// The leg carrying the user messages this gateway receives.
#[must_use]
pub fn receive_leg(pmode: &PMode) -> Option<LegLabel> {
    if is_initiator(pmode) {
        existing(pmode, LegLabel::Reply)
    } else {
        existing(pmode, LegLabel::Request)
    }
}

/// The leg on which this gateway sends pull requests, if it pulls at all.
#[must_use]
pub fn outbound_pull_leg(pmode: &PMode) -> Option<LegLabel> {
    let request_triggered = triggered(pmode, LegLabel::Request);
    match pmode.mep_binding {
        MepBinding::OneWayPull | MepBinding::TwoWayPullPush if request_triggered => {
            existing(pmode, LegLabel::Request)
        }
        MepBinding::TwoWayPushPull if request_triggered => existing(pmode, LegLabel::Reply),
        // Both legs are pulled, so each side has an address on exactly one of them.
        MepBinding::TwoWayPullPull => {
            if request_triggered {
                existing(pmode, LegLabel::Request)
            } else if triggered(pmode, LegLabel::Reply) {
                existing(pmode, LegLabel::Reply)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The leg on which this gateway receives pull requests, i.e. is pulled from.
#[must_use]
pub fn inbound_pull_leg(pmode: &PMode) -> Option<LegLabel> {
    let request_triggered = triggered(pmode, LegLabel::Request);
    match pmode.mep_binding {
        MepBinding::OneWayPull | MepBinding::TwoWayPullPush if !request_triggered => {
            existing(pmode, LegLabel::Request)
        }
        MepBinding::TwoWayPushPull if !request_triggered => existing(pmode, LegLabel::Reply),
        MepBinding::TwoWayPullPull => {
            if request_triggered {
                existing(pmode, LegLabel::Reply)
            } else if triggered(pmode, LegLabel::Reply) {
                existing(pmode, LegLabel::Request)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Whether this gateway must send pull requests for `pmode`: the binding pulls
/// on some leg from our side and we have an address for that leg.
#[must_use]
pub fn sends_pull_requests(pmode: &PMode) -> bool {
    outbound_pull_leg(pmode)
        .and_then(|label| pmode.leg(label))
        .is_some_and(triggered_by_us)
}

/// The pull-request flow governing pull requests sent on `leg`.
///
/// Only a leg triggered by us has one. When several flows are configured the
/// first one is used and the others are ignored.
#[must_use]
pub fn pull_request_flow(leg: &Leg) -> Option<&PullRequestFlow> {
    if !triggered_by_us(leg) {
        return None;
    }
    if leg.pull_request_flows.len() > 1 {
        warn!(
            flows = leg.pull_request_flows.len(),
            "Leg defines multiple pull request flows, only the first is used"
        );
    }
    leg.pull_request_flows.first()
}

/// The MPC to name in pull requests sent for `pmode`.
///
/// Taken from the outbound pull leg: the pull-request flow's MPC, else the MPC
/// of the user message flow's business info, else [`DEFAULT_MPC`].
#[must_use]
pub fn pull_mpc(pmode: &PMode) -> String {
    let Some(leg) = outbound_pull_leg(pmode).and_then(|label| pmode.leg(label)) else {
        return DEFAULT_MPC.to_string();
    };
    pull_request_flow(leg)
        .and_then(|flow| flow.mpc.as_deref())
        .or_else(|| leg.user_message_mpc())
        .filter(|mpc| !mpc.trim().is_empty())
        .unwrap_or(DEFAULT_MPC)
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
