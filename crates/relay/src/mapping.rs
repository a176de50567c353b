//! Tiered channel mapping and the channel resolver.
//!
//! Resolution is strict precedence, first match wins, no merging across tiers:
//!
//! 1. `explicit[routing_key]`
//! 2. `groups[group_key]`
//! 3. `[default]`

use std::collections::BTreeMap;

use crate::{ChannelName, ConfigError, GroupKey, Routable, RoutingKey};

/// An ordered, non-empty list of channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelList(Vec<ChannelName>);

impl ChannelList {
    /// Returns `None` if `channels` is empty.
    pub fn new(channels: Vec<ChannelName>) -> Option<Self> {
        if channels.is_empty() {
            None
        } else {
            Some(Self(channels))
        }
    }

    pub fn single(channel: ChannelName) -> Self {
        Self(vec![channel])
    }

    pub fn as_slice(&self) -> &[ChannelName] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'a> IntoIterator for &'a ChannelList {
    type Item = &'a ChannelName;
    type IntoIter = std::slice::Iter<'a, ChannelName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Process-wide routing table. Built once at start-up, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    default: ChannelList,
    groups: BTreeMap<GroupKey, ChannelList>,
    explicit: BTreeMap<RoutingKey, ChannelList>,
}

impl ChannelMapping {
    /// Builds a mapping from raw configuration sections, validating every key
    /// and channel name.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidChannelName`], [`ConfigError::EmptyChannelList`]
    /// or [`ConfigError::EmptyKey`] for the first offending entry.
    pub fn from_sections(
        default: &str,
        groups: &BTreeMap<String, Vec<String>>,
        explicit: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let default = ChannelName::new(default).ok_or_else(|| ConfigError::InvalidChannelName {
            section: "default".to_string(),
            name: default.to_string(),
        })?;

        let groups = groups
            .iter()
            .map(|(key, channels)| {
                let key_id = GroupKey::new(key.as_str()).ok_or_else(|| ConfigError::EmptyKey {
                    section: "groups".to_string(),
                })?;
                Ok((key_id, channel_list(&format!("groups.{key}"), channels)?))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let explicit = explicit
            .iter()
            .map(|(key, channels)| {
                let key_id = RoutingKey::new(key.as_str()).ok_or_else(|| ConfigError::EmptyKey {
                    section: "explicit".to_string(),
                })?;
                Ok((key_id, channel_list(&format!("explicit.{key}"), channels)?))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(Self {
            default: ChannelList::single(default),
            groups,
            explicit,
        })
    }

    /// A mapping that sends everything to one channel.
    pub fn single(channel: ChannelName) -> Self {
        Self {
            default: ChannelList::single(channel),
            groups: BTreeMap::new(),
            explicit: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) an explicit routing entry.
    pub fn with_explicit(mut self, key: RoutingKey, channels: ChannelList) -> Self {
        self.explicit.insert(key, channels);
        self
    }

    /// Adds (or replaces) a group routing entry.
    pub fn with_group(mut self, key: GroupKey, channels: ChannelList) -> Self {
        self.groups.insert(key, channels);
        self
    }

    /// The fallback channel.
    pub fn default_channel(&self) -> &ChannelName {
        &self.default.as_slice()[0]
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn explicit_count(&self) -> usize {
        self.explicit.len()
    }

    /// Resolves the channels for an event.
    pub fn resolve_for(&self, event: &impl Routable) -> &ChannelList {
        resolve(event.routing_key(), event.group_key(), self)
    }

    /// Every channel the mapping can route to, deduplicated, in first-seen
    /// order: default, then groups, then explicit entries.
    ///
    /// This is the set the chat client joins after registration.
    pub fn all_channels(&self) -> Vec<ChannelName> {
        let mut all: Vec<ChannelName> = Vec::new();
        let lists = std::iter::once(&self.default)
            .chain(self.groups.values())
            .chain(self.explicit.values());
        for channel in lists.flat_map(ChannelList::iter) {
            if !all.contains(channel) {
                all.push(channel.clone());
            }
        }
        all
    }
}

fn channel_list(section: &str, channels: &[String]) -> Result<ChannelList, ConfigError> {
    let names = channels
        .iter()
        .map(|name| {
            ChannelName::new(name.as_str()).ok_or_else(|| ConfigError::InvalidChannelName {
                section: section.to_string(),
                name: name.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ChannelList::new(names).ok_or_else(|| ConfigError::EmptyChannelList {
        section: section.to_string(),
    })
}

/// Returns the destination channels for `routing_key` / `group_key`.
///
/// Deterministic and side-effect free. Lookups are exact and case-sensitive.
pub fn resolve<'a>(
    routing_key: &RoutingKey,
    group_key: Option<&GroupKey>,
    mapping: &'a ChannelMapping,
) -> &'a ChannelList {
    if let Some(channels) = mapping.explicit.get(routing_key) {
        return channels;
    }
    if let Some(channels) = group_key.and_then(|key| mapping.groups.get(key)) {
        return channels;
    }
    &mapping.default
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(key, channels)| {
                (
                    key.to_string(),
                    channels.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    fn mapping() -> ChannelMapping {
        ChannelMapping::from_sections(
            "#general",
            &sections(&[("acme", &["#acme", "#acme-ops"])]),
            &sections(&[("acme/web", &["#web-ci"]), ("other/api", &["#api"])]),
        )
        .unwrap()
    }

    fn names(list: &ChannelList) -> Vec<&str> {
        list.iter().map(ChannelName::as_str).collect()
    }

    fn key(value: &str) -> RoutingKey {
        RoutingKey::new(value).unwrap()
    }

    fn group(value: &str) -> GroupKey {
        GroupKey::new(value).unwrap()
    }

    #[test]
    fn explicit_entry_wins_over_group_and_default() {
        let mapping = mapping();
        let channels = resolve(&key("acme/web"), Some(&group("acme")), &mapping);
        assert_eq!(names(channels), ["#web-ci"]);
    }

    #[test]
    fn group_entry_is_used_when_no_explicit_entry_matches() {
        let mapping = mapping();
        let channels = resolve(&key("acme/docs"), Some(&group("acme")), &mapping);
        assert_eq!(names(channels), ["#acme", "#acme-ops"]);
    }

    #[test]
    fn default_is_used_when_nothing_matches() {
        let mapping = mapping();
        assert_eq!(
            names(resolve(&key("zeta/app"), Some(&group("zeta")), &mapping)),
            ["#general"]
        );
        assert_eq!(names(resolve(&key("zeta/app"), None, &mapping)), ["#general"]);
    }

    #[test]
    fn lookups_are_case_sensitive() {
        let mapping = mapping();
        assert_eq!(
            names(resolve(&key("Acme/Web"), Some(&group("Acme")), &mapping)),
            ["#general"]
        );
    }

    #[test]
    fn explicit_entry_is_returned_regardless_of_other_tiers() {
        // Same explicit entry, different groups/default content.
        let explicit = sections(&[("acme/web", &["#web-ci", "#web-ci-2"])]);
        for (default, groups) in [
            ("#a", sections(&[])),
            ("#b", sections(&[("acme", &["#acme"])])),
            ("#c", sections(&[("acme", &["#x"]), ("acme/web", &["#y"])])),
        ] {
            let mapping = ChannelMapping::from_sections(default, &groups, &explicit).unwrap();
            let channels = resolve(&key("acme/web"), Some(&group("acme")), &mapping);
            assert_eq!(names(channels), ["#web-ci", "#web-ci-2"]);
        }
    }

    #[test]
    fn empty_channel_list_is_rejected() {
        let err = ChannelMapping::from_sections("#general", &sections(&[("acme", &[])]), &sections(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyChannelList {
                section: "groups.acme".to_string()
            }
        );
    }

    #[test]
    fn invalid_channel_names_are_rejected() {
        let err = ChannelMapping::from_sections("", &sections(&[]), &sections(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidChannelName { .. }));

        let err = ChannelMapping::from_sections(
            "#general",
            &sections(&[]),
            &sections(&[("acme/web", &["#ok", ""])]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidChannelName {
                section: "explicit.acme/web".to_string(),
                name: String::new(),
            }
        );
    }

    #[test]
    fn empty_keys_are_rejected() {
        let err = ChannelMapping::from_sections(
            "#general",
            &sections(&[]),
            &sections(&[("", &["#x"])]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKey { .. }));
    }

    #[test]
    fn all_channels_are_deduplicated_in_first_seen_order() {
        let mapping = ChannelMapping::from_sections(
            "#general",
            &sections(&[("acme", &["#acme", "#general"])]),
            &sections(&[("acme/web", &["#web-ci", "#acme"])]),
        )
        .unwrap();
        let all: Vec<_> = mapping.all_channels().into_iter().map(|c| c.to_string()).collect();
        assert_eq!(all, ["#general", "#acme", "#web-ci"]);
    }

    #[test]
    fn single_channel_mapping_routes_everything_to_one_channel() {
        let mapping = ChannelMapping::single(ChannelName::new("#alerts").unwrap());
        assert_eq!(names(resolve(&key("notify-admin"), None, &mapping)), ["#alerts"]);
        assert_eq!(mapping.default_channel().as_str(), "#alerts");
    }
}
