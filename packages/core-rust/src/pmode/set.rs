//! The set of P-Modes currently deployed on the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::{PMode, PModeError};

/// Read access to the deployed P-Modes.
///
/// Consumers (pull worker, resolver callers) only ever read; how the set is
/// populated and synchronised is up to the implementation.
pub trait PModeSet: Send + Sync {
    /// Look up a P-Mode by id.
    fn get(&self, id: &str) -> Option<Arc<PMode>>;

    /// All deployed P-Modes.
    fn get_all(&self) -> Vec<Arc<PMode>>;
}

/// Failures while loading a P-Mode set from a document.
#[derive(Debug, thiserror::Error)]
pub enum PModeSetError {
    #[error("cannot parse P-Mode document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] PModeError),
}

/// In-memory `PModeSet` keyed by P-Mode id.
#[derive(Debug, Default)]
pub struct InMemoryPModeSet {
    pmodes: RwLock<HashMap<String, Arc<PMode>>>,
}

impl InMemoryPModeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON array of P-Modes, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `PModeSetError::Parse` for malformed JSON and
    /// `PModeSetError::Invalid` for the first P-Mode that fails validation.
    pub fn from_json(json: &str) -> Result<Self, PModeSetError> {
        let pmodes: Vec<PMode> = serde_json::from_str(json)?;
        let set = Self::new();
        for pmode in pmodes {
            set.add(pmode)?;
        }
        Ok(set)
    }

    /// Deploys a P-Mode, replacing any existing one with the same id.
    ///
    /// Returns the replaced P-Mode, if any.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the P-Mode is structurally invalid.
    pub fn add(&self, pmode: PMode) -> Result<Option<Arc<PMode>>, PModeError> {
        pmode.validate()?;
        Ok(self
            .pmodes
            .write()
            .insert(pmode.id.clone(), Arc::new(pmode)))
    }

    /// Removes a P-Mode, returning it if it was deployed.
    pub fn remove(&self, id: &str) -> Option<Arc<PMode>> {
        self.pmodes.write().remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pmodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pmodes.read().is_empty()
    }
}

impl PModeSet for InMemoryPModeSet {
    fn get(&self, id: &str) -> Option<Arc<PMode>> {
        self.pmodes.read().get(id).cloned()
    }

    fn get_all(&self) -> Vec<Arc<PMode>> {
        let mut all: Vec<Arc<PMode>> = self.pmodes.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Mep, MepBinding};
    use crate::pmode::Leg;

    fn one_way(id: &str) -> PMode {
        PMode {
            id: id.to_string(),
            mep: Mep::OneWay,
            mep_binding: MepBinding::OneWayPush,
            legs: vec![Leg::default()],
        }
    }

    #[test]
    fn add_get_and_replace() {
        let set = InMemoryPModeSet::new();
        assert!(set.is_empty());
        assert!(set.add(one_way("a")).unwrap().is_none());
        assert!(set.add(one_way("a")).unwrap().is_some());
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a").unwrap().id, "a");
        assert!(set.get("b").is_none());
    }

    #[test]
    fn add_rejects_invalid_pmode() {
        let set = InMemoryPModeSet::new();
        let mut pmode = one_way("a");
        pmode.legs.clear();
        assert!(set.add(pmode).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn get_all_is_sorted_by_id() {
        let set = InMemoryPModeSet::new();
        set.add(one_way("c")).unwrap();
        set.add(one_way("a")).unwrap();
        set.add(one_way("b")).unwrap();
        let ids: Vec<String> = set.get_all().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(set.remove("b").is_some());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn from_json_parses_and_validates() {
        let json = r#"[
            { "id": "p1", "mep": "oneWay", "mepBinding": "oneWayPull", "legs": [{}] },
            { "id": "p2", "mep": "twoWay", "mepBinding": "twoWaySync", "legs": [{}, {}] }
        ]"#;
        let set = InMemoryPModeSet::from_json(json).unwrap();
        assert_eq!(set.len(), 2);

        let invalid = r#"[{ "id": "p3", "mep": "twoWay", "mepBinding": "twoWaySync", "legs": [{}] }]"#;
        assert!(matches!(
            InMemoryPModeSet::from_json(invalid),
            Err(PModeSetError::Invalid(PModeError::LegCount { .. }))
        ));
        assert!(matches!(
            InMemoryPModeSet::from_json("{"),
            Err(PModeSetError::Parse(_))
        ));
    }
}
