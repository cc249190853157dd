// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Handler timeout policy
//!
//! In JSON the policy is `false`, `true`, a millisecond count, or an object
//! mapping operation names (plus `"default"`) to a millisecond count or
//! `false`. It is resolved once per operation when the dispatch table is
//! built.

use crate::registry::Opcode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Timeout applied when nothing more specific is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_KEY: &str = "default";

/// Timeout configured for a single operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpTimeout {
    Disabled,
    /// A zero duration falls back to the mapping's default.
    After(Duration),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPolicy", into = "RawPolicy")]
pub enum TimeoutPolicy {
    /// [`DEFAULT_TIMEOUT`] for every operation.
    #[default]
    Default,
    /// No operation ever times out.
    Disabled,
    /// The same timeout for every operation.
    Uniform(Duration),
    /// Per-operation entries keyed by operation name.
    PerOperation {
        default: Option<Duration>,
        overrides: BTreeMap<String, OpTimeout>,
    },
}

impl TimeoutPolicy {
    pub fn uniform(timeout: Duration) -> Self {
        if timeout.is_zero() {
            TimeoutPolicy::Disabled
        } else {
            TimeoutPolicy::Uniform(timeout)
        }
    }

    /// Start an empty per-operation mapping.
    pub fn per_operation(default: Option<Duration>) -> Self {
        TimeoutPolicy::PerOperation {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Add an override to a per-operation mapping. Other policies are
    /// converted into a mapping whose default keeps their behaviour for
    /// every other operation.
    pub fn with(self, op: Opcode, timeout: OpTimeout) -> Self {
        let (default, mut overrides) = match self {
            TimeoutPolicy::PerOperation { default, overrides } => (default, overrides),
            TimeoutPolicy::Uniform(d) => (Some(d), BTreeMap::new()),
            TimeoutPolicy::Default => (None, BTreeMap::new()),
            TimeoutPolicy::Disabled => {
                let overrides = Opcode::ALL
                    .iter()
                    .map(|op| (op.name().to_string(), OpTimeout::Disabled))
                    .collect();
                (None, overrides)
            }
        };
        overrides.insert(op.name().to_string(), timeout);
        TimeoutPolicy::PerOperation { default, overrides }
    }

    /// Concrete timeout for `op`, or `None` when it must not time out.
    pub fn resolve(&self, op: Opcode) -> Option<Duration> {
        match self {
            TimeoutPolicy::Default => Some(DEFAULT_TIMEOUT),
            TimeoutPolicy::Disabled => None,
            TimeoutPolicy::Uniform(d) => (!d.is_zero()).then_some(*d),
            TimeoutPolicy::PerOperation { default, overrides } => {
                let fallback = default.filter(|d| !d.is_zero()).unwrap_or(DEFAULT_TIMEOUT);
                match overrides.get(op.name()) {
                    Some(OpTimeout::Disabled) => None,
                    Some(OpTimeout::After(d)) if !d.is_zero() => Some(*d),
                    _ => Some(fallback),
                }
            }
        }
    }
}

impl From<Duration> for TimeoutPolicy {
    fn from(timeout: Duration) -> Self {
        TimeoutPolicy::uniform(timeout)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Flag(bool),
    Millis(u64),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPolicy {
    Flag(bool),
    Millis(u64),
    Map(BTreeMap<String, RawEntry>),
}

impl From<RawPolicy> for TimeoutPolicy {
    fn from(raw: RawPolicy) -> Self {
        match raw {
            RawPolicy::Flag(false) => TimeoutPolicy::Disabled,
            RawPolicy::Flag(true) => TimeoutPolicy::Default,
            RawPolicy::Millis(ms) => TimeoutPolicy::uniform(Duration::from_millis(ms)),
            RawPolicy::Map(entries) => {
                let mut default = None;
                let mut overrides = BTreeMap::new();
                for (name, entry) in entries {
                    let timeout = match entry {
                        RawEntry::Flag(false) => OpTimeout::Disabled,
                        RawEntry::Flag(true) => OpTimeout::After(Duration::ZERO),
                        RawEntry::Millis(ms) => OpTimeout::After(Duration::from_millis(ms)),
                    };
                    if name == DEFAULT_KEY {
                        if let OpTimeout::After(d) = timeout {
                            default = Some(d);
                        }
                    } else {
                        overrides.insert(name, timeout);
                    }
                }
                TimeoutPolicy::PerOperation { default, overrides }
            }
        }
    }
}

impl From<TimeoutPolicy> for RawPolicy {
    fn from(policy: TimeoutPolicy) -> Self {
        match policy {
            TimeoutPolicy::Default => RawPolicy::Flag(true),
            TimeoutPolicy::Disabled => RawPolicy::Flag(false),
            TimeoutPolicy::Uniform(d) => RawPolicy::Millis(d.as_millis() as u64),
            TimeoutPolicy::PerOperation { default, overrides } => {
                let mut entries: BTreeMap<String, RawEntry> = overrides
                    .into_iter()
                    .map(|(name, timeout)| {
                        let entry = match timeout {
                            OpTimeout::Disabled => RawEntry::Flag(false),
                            OpTimeout::After(d) => RawEntry::Millis(d.as_millis() as u64),
                        };
                        (name, entry)
                    })
                    .collect();
                if let Some(d) = default {
                    entries.insert(DEFAULT_KEY.to_string(), RawEntry::Millis(d.as_millis() as u64));
                }
                RawPolicy::Map(entries)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> TimeoutPolicy {
        serde_json::from_str(json).expect("policy json")
    }

    #[test]
    fn scalar_policies() {
        assert_eq!(parse("false").resolve(Opcode::Read), None);
        assert_eq!(parse("0").resolve(Opcode::Read), None);
        assert_eq!(parse("true").resolve(Opcode::Read), Some(DEFAULT_TIMEOUT));
        assert_eq!(
            parse("250").resolve(Opcode::Getattr),
            Some(Duration::from_millis(250))
        );
        assert_eq!(TimeoutPolicy::default().resolve(Opcode::Open), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn mapping_resolves_entry_then_default_then_global() {
        let policy = parse(r#"{ "default": 500, "read": 50, "write": false, "open": 0 }"#);
        assert_eq!(policy.resolve(Opcode::Read), Some(Duration::from_millis(50)));
        assert_eq!(policy.resolve(Opcode::Write), None);
        assert_eq!(policy.resolve(Opcode::Open), Some(Duration::from_millis(500)));
        assert_eq!(policy.resolve(Opcode::Getattr), Some(Duration::from_millis(500)));

        let no_default = parse(r#"{ "read": 50 }"#);
        assert_eq!(no_default.resolve(Opcode::Getattr), Some(DEFAULT_TIMEOUT));
        let zero_default = parse(r#"{ "default": 0 }"#);
        assert_eq!(zero_default.resolve(Opcode::Getattr), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn builder_keeps_other_operations_unchanged() {
        let policy = TimeoutPolicy::Disabled
            .with(Opcode::Read, OpTimeout::After(Duration::from_millis(5)));
        assert_eq!(policy.resolve(Opcode::Read), Some(Duration::from_millis(5)));
        assert_eq!(policy.resolve(Opcode::Write), None);

        let policy =
            TimeoutPolicy::uniform(Duration::from_secs(2)).with(Opcode::Init, OpTimeout::Disabled);
        assert_eq!(policy.resolve(Opcode::Init), None);
        assert_eq!(policy.resolve(Opcode::Read), Some(Duration::from_secs(2)));
    }

    #[test]
    fn serializes_back_to_the_same_policy() {
        let policy = parse(r#"{ "default": 500, "read": 50, "write": false }"#);
        let json = serde_json::to_string(&policy).expect("serialize");
        assert_eq!(parse(&json), policy);
    }
}
