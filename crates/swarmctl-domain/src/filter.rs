use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::instance::{Instance, InstanceStatus};

/// `list(filter)` predicates (§6). All fields are ANDed; `offset` is
/// applied before `limit`; an absent `limit` means no cap.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<Vec<InstanceStatus>>,
    pub name_pattern: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub tags: HashMap<String, String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl InstanceFilter {
    /// Whether a single instance satisfies every predicate except
    /// `offset`/`limit`, which apply to the result set as a whole.
    pub fn matches(&self, instance: &Instance, name_re: Option<&regex::Regex>) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&instance.status) {
                return false;
            }
        }
        if let Some(re) = name_re {
            if !re.is_match(&instance.name) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if instance.created_at <= after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if instance.created_at >= before {
                return false;
            }
        }
        for (k, v) in &self.tags {
            if instance.metadata.get(k) != Some(v) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{InstanceId, ProviderKind};
    use crate::instance::InstanceSpec;

    fn sample(name: &str, status: InstanceStatus) -> Instance {
        let mut inst = Instance::new(InstanceId::generate(), ProviderKind::new("container"), name, InstanceSpec::default());
        inst.status = status;
        inst
    }

    #[test]
    fn status_predicate_filters() {
        let filter = InstanceFilter {
            status: Some(vec![InstanceStatus::Running]),
            ..Default::default()
        };
        assert!(filter.matches(&sample("a", InstanceStatus::Running), None));
        assert!(!filter.matches(&sample("a", InstanceStatus::Stopped), None));
    }

    #[test]
    fn tag_predicate_requires_all_pairs() {
        let mut inst = sample("a", InstanceStatus::Running);
        inst.metadata.insert("team".into(), "infra".into());
        let mut tags = HashMap::new();
        tags.insert("team".into(), "infra".into());
        tags.insert("missing".into(), "x".into());
        let filter = InstanceFilter {
            tags,
            ..Default::default()
        };
        assert!(!filter.matches(&inst, None));
    }

    #[test]
    fn name_pattern_is_case_insensitive() {
        let re = regex::RegexBuilder::new("^ws-").case_insensitive(true).build().unwrap();
        let filter = InstanceFilter::default();
        assert!(filter.matches(&sample("WS-1", InstanceStatus::Running), Some(&re)));
    }
}
