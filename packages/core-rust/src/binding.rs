//! ebMS3 message exchange pattern identifiers.
//!
//! P-Mode documents name their MEP and MEP binding by the URIs defined in the
//! ebMS3 Core specification. Both enums serialize to that URI and accept either
//! the URI or the short camelCase variant name when parsing, so hand-written
//! configuration can use the readable form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pmode::PModeError;

/// Namespace prefix shared by all ebMS3 core URIs.
const EBMS_CORE_NS: &str = "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/";

/// The message partition channel used when a P-Mode names none.
pub const DEFAULT_MPC: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/defaultMPC";

// ---------------------------------------------------------------------------
// Mep
// ---------------------------------------------------------------------------

/// Message exchange pattern: how many legs the exchange has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mep {
    OneWay,
    TwoWay,
}

impl Mep {
    /// Short name used in hand-written configuration.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::OneWay => "oneWay",
            Self::TwoWay => "twoWay",
        }
    }

    /// The ebMS3 URI identifying this MEP.
    #[must_use]
    pub fn uri(self) -> String {
        format!("{EBMS_CORE_NS}{}", self.short_name())
    }

    /// Number of legs a P-Mode with this MEP must define.
    #[must_use]
    pub fn leg_count(self) -> usize {
        match self {
            Self::OneWay => 1,
            Self::TwoWay => 2,
        }
    }
}

impl fmt::Display for Mep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Mep {
    type Err = PModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix(EBMS_CORE_NS).unwrap_or(s);
        match name {
            "oneWay" => Ok(Self::OneWay),
            "twoWay" => Ok(Self::TwoWay),
            _ => Err(PModeError::UnknownMep(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mep {
    type Error = PModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mep> for String {
    fn from(mep: Mep) -> Self {
        mep.uri()
    }
}

// ---------------------------------------------------------------------------
// MepBinding
// ---------------------------------------------------------------------------

/// MEP binding: which combination of push and pull carries each leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MepBinding {
    OneWayPush,
    OneWayPull,
    TwoWayPushPush,
    TwoWayPushPull,
    TwoWayPullPush,
    TwoWayPullPull,
    TwoWaySync,
}

impl MepBinding {
    pub const ALL: [MepBinding; 7] = [
        Self::OneWayPush,
        Self::OneWayPull,
        Self::TwoWayPushPush,
        Self::TwoWayPushPull,
        Self::TwoWayPullPush,
        Self::TwoWayPullPull,
        Self::TwoWaySync,
    ];

    /// Last path segment of the binding URI.
    fn uri_name(self) -> &'static str {
        match self {
            Self::OneWayPush => "push",
            Self::OneWayPull => "pull",
            Self::TwoWayPushPush => "pushAndPush",
            Self::TwoWayPushPull => "pushAndPull",
            Self::TwoWayPullPush => "pullAndPush",
            Self::TwoWayPullPull => "pullAndPull",
            Self::TwoWaySync => "sync",
        }
    }

    /// Short name used in hand-written configuration.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::OneWayPush => "oneWayPush",
            Self::OneWayPull => "oneWayPull",
            Self::TwoWayPushPush => "twoWayPushPush",
            Self::TwoWayPushPull => "twoWayPushPull",
            Self::TwoWayPullPush => "twoWayPullPush",
            Self::TwoWayPullPull => "twoWayPullPull",
            Self::TwoWaySync => "twoWaySync",
        }
    }

    /// The ebMS3 URI identifying this binding.
    #[must_use]
    pub fn uri(self) -> String {
        format!("{EBMS_CORE_NS}{}", self.uri_name())
    }

    /// The MEP this binding belongs to.
    #[must_use]
    pub fn mep(self) -> Mep {
        match self {
            Self::OneWayPush | Self::OneWayPull => Mep::OneWay,
            _ => Mep::TwoWay,
        }
    }

    #[must_use]
    pub fn is_two_way(self) -> bool {
        self.mep() == Mep::TwoWay
    }

    /// Whether the first (REQUEST) leg is pushed by the initiator.
    ///
    /// For these bindings the initiator is the party that triggers the request
    /// leg; for the others it is the party being pulled from.
    #[must_use]
    pub fn request_is_pushed(self) -> bool {
        matches!(
            self,
            Self::OneWayPush | Self::TwoWayPushPush | Self::TwoWayPushPull | Self::TwoWaySync
        )
    }
}

impl fmt::Display for MepBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for MepBinding {
    type Err = PModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let by_uri = s
            .strip_prefix(EBMS_CORE_NS)
            .and_then(|name| Self::ALL.into_iter().find(|b| b.uri_name() == name));
        by_uri
            .or_else(|| Self::ALL.into_iter().find(|b| b.short_name() == s))
            .ok_or_else(|| PModeError::UnknownMepBinding(s.to_string()))
    }
}

impl TryFrom<String> for MepBinding {
    type Error = PModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MepBinding> for String {
    fn from(binding: MepBinding) -> Self {
        binding.uri()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
