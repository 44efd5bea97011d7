//! P-Mode domain types.
//!
//! Only the parts of a P-Mode that drive exchange orchestration are modelled:
//! the MEP binding, the legs, each leg's protocol address and its pull-request
//! and user-message flows. Security, reliability and payload profiles belong
//! to the message-processing layers and are not represented here.

use serde::{Deserialize, Serialize};

use crate::binding::{Mep, MepBinding};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural problems detected in a P-Mode document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PModeError {
    #[error("unknown MEP: {0}")]
    UnknownMep(String),
    #[error("unknown MEP binding: {0}")]
    UnknownMepBinding(String),
    #[error("P-Mode has an empty id")]
    MissingId,
    #[error("P-Mode {pmode}: MEP {mep} does not match binding {binding}")]
    MepMismatch {
        pmode: String,
        mep: Mep,
        binding: MepBinding,
    },
    #[error("P-Mode {pmode}: binding {binding} needs {expected} leg(s), found {found}")]
    LegCount {
        pmode: String,
        binding: MepBinding,
        expected: usize,
        found: usize,
    },
    #[error("P-Mode {pmode}: leg label {label} is used more than once")]
    DuplicateLegLabel { pmode: String, label: LegLabel },
}

// ---------------------------------------------------------------------------
// Leg
// ---------------------------------------------------------------------------

/// Label distinguishing the two legs of a two-way exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegLabel {
    Request,
    Reply,
}

impl LegLabel {
    /// Zero-based position of an unlabeled leg carrying this label.
    #[must_use]
    pub fn position(self) -> usize {
        match self {
            Self::Request => 0,
            Self::Reply => 1,
        }
    }

    /// The other leg of a two-way exchange.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Request => Self::Reply,
            Self::Reply => Self::Request,
        }
    }
}

impl std::fmt::Display for LegLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => f.write_str("REQUEST"),
            Self::Reply => f.write_str("REPLY"),
        }
    }
}

/// Transport settings of a leg. The address is only present on the side that
/// actively opens the connection for this leg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A pull-request sub-channel of a leg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestFlow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpc: Option<String>,
}

/// Business collaboration info of the user messages exchanged on a leg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// User message flow of a leg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageFlow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_info: Option<BusinessInfo>,
}

/// One directional hop of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LegLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_request_flows: Vec<PullRequestFlow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message_flow: Option<UserMessageFlow>,
}

impl Leg {
    /// The configured destination address, if it is non-empty.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.protocol
            .as_ref()
            .and_then(|p| p.address.as_deref())
            .filter(|a| !a.trim().is_empty())
    }

    /// MPC named in the business info of the leg's user message flow.
    #[must_use]
    pub fn user_message_mpc(&self) -> Option<&str> {
        self.user_message_flow
            .as_ref()
            .and_then(|f| f.business_info.as_ref())
            .and_then(|bi| bi.mpc.as_deref())
    }
}

// ---------------------------------------------------------------------------
// PMode
// ---------------------------------------------------------------------------

/// A pre-agreed message exchange contract between two parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PMode {
    pub id: String,
    pub mep: Mep,
    pub mep_binding: MepBinding,
    pub legs: Vec<Leg>,
}

impl PMode {
    /// Returns the leg carrying `label`.
    ///
    /// A leg explicitly labelled wins; otherwise unlabeled legs are matched by
    /// position (first is REQUEST, second is REPLY).
    #[must_use]
    pub fn leg(&self, label: LegLabel) -> Option<&Leg> {
        self.legs
            .iter()
            .find(|leg| leg.label == Some(label))
            .or_else(|| {
                self.legs
                    .get(label.position())
                    .filter(|leg| leg.label.is_none())
            })
    }

    #[must_use]
    pub fn is_two_way(&self) -> bool {
        self.mep_binding.is_two_way()
    }

    /// Checks the structural consistency the resolver relies on.
    ///
    /// # Errors
    ///
    /// Returns the first `PModeError` found: empty id, MEP/binding mismatch,
    /// wrong number of legs for the binding, or a leg label used twice.
    pub fn validate(&self) -> Result<(), PModeError> {
        if self.id.trim().is_empty() {
            return Err(PModeError::MissingId);
        }
        if self.mep != self.mep_binding.mep() {
            return Err(PModeError::MepMismatch {
                pmode: self.id.clone(),
                mep: self.mep,
                binding: self.mep_binding,
            });
        }
        let expected = self.mep_binding.mep().leg_count();
        if self.legs.len() != expected {
            return Err(PModeError::LegCount {
                pmode: self.id.clone(),
                binding: self.mep_binding,
                expected,
                found: self.legs.len(),
            });
        }
        if let [first, second] = self.legs.as_slice() {
            if let (Some(a), Some(b)) = (first.label, second.label) {
                if a == b {
                    return Err(PModeError::DuplicateLegLabel {
                        pmode: self.id.clone(),
                        label: a,
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn leg_to(address: Option<&str>) -> Leg {
        Leg {
            protocol: Some(Protocol {
                address: address.map(str::to_string),
            }),
            ..Leg::default()
        }
    }

    fn two_way(binding: MepBinding, legs: Vec<Leg>) -> PMode {
        PMode {
            id: "pm-1".to_string(),
            mep: Mep::TwoWay,
            mep_binding: binding,
            legs,
        }
    }

    #[test]
    fn unlabeled_legs_resolve_by_position() {
        let pmode = two_way(
            MepBinding::TwoWayPushPush,
            vec![leg_to(Some("http://a")), leg_to(Some("http://b"))],
        );
        assert_eq!(pmode.leg(LegLabel::Request).unwrap().address(), Some("http://a"));
        assert_eq!(pmode.leg(LegLabel::Reply).unwrap().address(), Some("http://b"));
    }

    #[test]
    fn explicit_labels_override_position() {
        let mut reply = leg_to(Some("http://reply"));
        reply.label = Some(LegLabel::Reply);
        let mut request = leg_to(Some("http://request"));
        request.label = Some(LegLabel::Request);
        let pmode = two_way(MepBinding::TwoWayPushPush, vec![reply, request]);

        assert_eq!(
            pmode.leg(LegLabel::Request).unwrap().address(),
            Some("http://request")
        );
        assert_eq!(pmode.leg(LegLabel::Reply).unwrap().address(), Some("http://reply"));
    }

    #[test]
    fn blank_address_is_not_an_address() {
        assert_eq!(leg_to(Some("  ")).address(), None);
        assert_eq!(leg_to(None).address(), None);
        assert_eq!(Leg::default().address(), None);
    }

    #[test]
    fn validate_rejects_wrong_leg_count() {
        let pmode = two_way(MepBinding::TwoWayPullPull, vec![leg_to(None)]);
        assert_eq!(
            pmode.validate(),
            Err(PModeError::LegCount {
                pmode: "pm-1".to_string(),
                binding: MepBinding::TwoWayPullPull,
                expected: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn validate_rejects_mep_mismatch_and_duplicate_labels() {
        let mut pmode = two_way(MepBinding::OneWayPush, vec![leg_to(None)]);
        assert!(matches!(pmode.validate(), Err(PModeError::MepMismatch { .. })));

        let mut a = leg_to(None);
        a.label = Some(LegLabel::Reply);
        let b = a.clone();
        pmode = two_way(MepBinding::TwoWaySync, vec![a, b]);
        assert!(matches!(
            pmode.validate(),
            Err(PModeError::DuplicateLegLabel { label: LegLabel::Reply, .. })
        ));
    }

    #[test]
    fn pmode_deserializes_from_camel_case_json() {
        let json = r#"{
            "id": "order-pull",
            "mep": "oneWay",
            "mepBinding": "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/pull",
            "legs": [{
                "protocol": { "address": "https://partner.example/msh" },
                "pullRequestFlows": [{ "mpc": "urn:mpc:orders" }],
                "userMessageFlow": { "businessInfo": { "mpc": "urn:mpc:other", "action": "Deliver" } }
            }]
        }"#;
        let pmode: PMode = serde_json::from_str(json).unwrap();
        assert_eq!(pmode.mep_binding, MepBinding::OneWayPull);
        assert!(pmode.validate().is_ok());
        let leg = pmode.leg(LegLabel::Request).unwrap();
        assert_eq!(leg.pull_request_flows[0].mpc.as_deref(), Some("urn:mpc:orders"));
        assert_eq!(leg.user_message_mpc(), Some("urn:mpc:other"));
    }
}
