//! The update-policy precedence chain: a pure function, no `self`, so
//! the same inputs always produce the same decision.

use std::collections::HashMap;

use sentinel_model::enums::{Policy, PolicySource};

/// Resolves the effective policy for one container from, in order: a
/// DB-stored override, the `sentinel.policy` label, the `:latest` auto-rule,
/// then the global default.
pub fn resolve(
    override_policy: Option<Policy>,
    labels: &HashMap<String, String>,
    image_tag: &str,
    default_policy: Policy,
    latest_auto_update: bool,
) -> (Policy, PolicySource) {
    if let Some(policy) = override_policy {
        return (policy, PolicySource::Override);
    }
    if let Some(label) = labels.get("sentinel.policy").and_then(|raw| raw.parse::<Policy>().ok()) {
        return (label, PolicySource::Label);
    }
    if latest_auto_update && (image_tag == "latest" || image_tag.is_empty()) {
        return (Policy::Auto, PolicySource::Latest);
    }
    (default_policy, PolicySource::Default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn override_wins_over_everything() {
        let (policy, source) =
            resolve(Some(Policy::Pinned), &labels(&[("sentinel.policy", "auto")]), "latest", Policy::Manual, true);
        assert_eq!(policy, Policy::Pinned);
        assert_eq!(source, PolicySource::Override);
    }

    #[test]
    fn label_wins_over_latest_rule_and_default() {
        let (policy, source) = resolve(None, &labels(&[("sentinel.policy", "manual")]), "latest", Policy::Auto, true);
        assert_eq!(policy, Policy::Manual);
        assert_eq!(source, PolicySource::Label);
    }

    #[test]
    fn latest_tag_auto_rule_applies_when_enabled() {
        let (policy, source) = resolve(None, &labels(&[]), "latest", Policy::Manual, true);
        assert_eq!(policy, Policy::Auto);
        assert_eq!(source, PolicySource::Latest);

        let (policy, source) = resolve(None, &labels(&[]), "", Policy::Manual, true);
        assert_eq!(policy, Policy::Auto);
        assert_eq!(source, PolicySource::Latest);
    }

    #[test]
    fn latest_tag_rule_is_gated_on_the_feature_flag() {
        let (policy, source) = resolve(None, &labels(&[]), "latest", Policy::Manual, false);
        assert_eq!(policy, Policy::Manual);
        assert_eq!(source, PolicySource::Default);
    }

    #[test]
    fn falls_back_to_default_for_pinned_tags() {
        let (policy, source) = resolve(None, &labels(&[]), "1.25", Policy::Manual, true);
        assert_eq!(policy, Policy::Manual);
        assert_eq!(source, PolicySource::Default);
    }

    #[test]
    fn unknown_label_value_is_ignored() {
        let (policy, source) = resolve(None, &labels(&[("sentinel.policy", "bogus")]), "1.25", Policy::Auto, true);
        assert_eq!(policy, Policy::Auto);
        assert_eq!(source, PolicySource::Default);
    }
}
