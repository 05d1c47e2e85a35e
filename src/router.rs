//! Rule-based destination selection.
//!
//! Rules are evaluated in configured order and the first match wins.
//! Unmatched records go to the default destinations; an empty default list
//! means unmatched records are routed nowhere.

use crate::config::{MatchCondition, RoutingRule};
use crate::record::LogRecord;

#[derive(Debug, Clone)]
struct Rule {
    service: Option<String>,
    level: Option<String>,
    destinations: Vec<String>,
}

impl Rule {
    fn from_config(rule: &RoutingRule) -> Self {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        let (service, level) = match &rule.match_condition {
            Some(MatchCondition { service, level }) => (non_empty(service), non_empty(level)),
            None => (None, None),
        };
        Rule {
            service,
            level,
            destinations: rule.destinations.clone(),
        }
    }

    #[inline]
    fn matches(&self, record: &LogRecord) -> bool {
        if let Some(service) = &self.service {
            if record.service != *service {
                return false;
            }
        }
        if let Some(level) = &self.level {
            if !record.level.eq_ignore_ascii_case(level) {
                return false;
            }
        }
        true
    }
}

/// Immutable routing table built once from configuration.
///
/// `route` takes `&self` and touches no shared state, so a single router
/// can be used from any number of tasks without synchronization.
#[derive(Debug, Clone, Default)]
pub struct Router {
    rules: Vec<Rule>,
    default_destinations: Vec<String>,
}

impl Router {
    pub fn new(rules: &[RoutingRule], default_destinations: &[String]) -> Self {
        Router {
            rules: rules.iter().map(Rule::from_config).collect(),
            default_destinations: default_destinations.to_vec(),
        }
    }

    /// Destination names for a record, in configured order.
    pub fn route(&self, record: &LogRecord) -> &[String] {
        self.rules
            .iter()
            .find(|rule| rule.matches(record))
            .map(|rule| rule.destinations.as_slice())
            .unwrap_or(&self.default_destinations)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn default_destinations(&self) -> &[String] {
        &self.default_destinations
    }

    /// Every destination mentioned by a rule or the default list, in first
    /// seen order without duplicates.
    pub fn referenced_destinations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let all = self
            .rules
            .iter()
            .flat_map(|r| r.destinations.iter())
            .chain(self.default_destinations.iter());
        for name in all {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
        names
    }
}
