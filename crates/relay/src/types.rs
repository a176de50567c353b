//! Normalised event types and the rendered output line.
//!
//! Unlike the raw webhook payloads (see [`crate::decoder`]), these types carry
//! only what rendering and routing need, and every value has already been
//! validated: routing keys are computed, short ids are bounds-checked and
//! branch names are extracted from their refs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CommitSha, GroupKey, IssueNumber, RoutingKey};

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The finite set of webhook event types the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// GitLab `Push Hook`.
    Push,
    /// GitLab `Issue Hook`.
    Issue,
    /// Alertmanager webhook notification.
    Alert,
}

impl EventKind {
    /// Value of the `X-Gitlab-Event` header for push events.
    pub const PUSH_HOOK: &'static str = "Push Hook";
    /// Value of the `X-Gitlab-Event` header for issue events.
    pub const ISSUE_HOOK: &'static str = "Issue Hook";
    /// Tag the listener supplies for Alertmanager posts, which carry no
    /// event-type header of their own.
    pub const ALERTMANAGER: &'static str = "Alertmanager";

    /// Resolves an event-type tag. Matching is exact and case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            Self::PUSH_HOOK => Some(Self::Push),
            Self::ISSUE_HOOK => Some(Self::Issue),
            Self::ALERTMANAGER => Some(Self::Alert),
            _ => None,
        }
    }

    /// Returns the tag this kind is recognised by.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Push => Self::PUSH_HOOK,
            Self::Issue => Self::ISSUE_HOOK,
            Self::Alert => Self::ALERTMANAGER,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Push => "push",
            Self::Issue => "issue",
            Self::Alert => "alert",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Routing capability
// ---------------------------------------------------------------------------

/// Anything that can be routed to channels through the tiered mapping.
pub trait Routable {
    /// Key matched against the `explicit` mapping tier.
    fn routing_key(&self) -> &RoutingKey;

    /// Key matched against the `groups` mapping tier, if the event has one.
    fn group_key(&self) -> Option<&GroupKey>;
}

// ---------------------------------------------------------------------------
// Code-hosting events
// ---------------------------------------------------------------------------

/// The project an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Display name (`project.name`).
    pub name: String,
    /// Web URL of the project, when the platform sent one.
    pub web_url: Option<String>,
    pub(crate) routing_key: RoutingKey,
    pub(crate) group_key: Option<GroupKey>,
}

impl Project {
    /// Builds a project and derives its routing keys: `"<namespace>/<name>"`
    /// and `"<namespace>"`.
    ///
    /// Returns `None` when `name` is empty.
    pub fn new(name: impl Into<String>, namespace: &str, web_url: Option<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() {
            return None;
        }
        let routing_key = RoutingKey::new(format!("{namespace}/{name}"))?;
        Some(Self {
            name,
            web_url: web_url.filter(|url| !url.is_empty()),
            routing_key,
            group_key: GroupKey::new(namespace),
        })
    }
}

impl Routable for Project {
    fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    fn group_key(&self) -> Option<&GroupKey> {
        self.group_key.as_ref()
    }
}

/// One commit of a push, reduced to what a notification line shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Full commit id.
    pub id: CommitSha,
    /// Display prefix of `id`; the full id when it is shorter than the
    /// configured length.
    pub short_id: String,
    /// Full commit message as received.
    pub message: String,
    pub author_name: String,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

/// A branch (or tag) push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub project: Project,
    /// Name of the user who pushed.
    pub author: String,
    /// Branch name with the `refs/<kind>/` prefix removed.
    pub branch: String,
    pub before: CommitSha,
    pub after: CommitSha,
    /// Total commits in the push. GitLab caps the `commits` array, so this may
    /// be larger than `commits.len()`.
    pub total_commits: usize,
    /// Commits in the order the platform listed them.
    pub commits: Vec<CommitSummary>,
}

impl Routable for PushEvent {
    fn routing_key(&self) -> &RoutingKey {
        self.project.routing_key()
    }

    fn group_key(&self) -> Option<&GroupKey> {
        self.project.group_key()
    }
}

/// What happened to an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueAction {
    Opened,
    Updated,
    Closed,
    Reopened,
    /// An action code the relay has no verb for; rendered verbatim.
    Other(String),
}

impl IssueAction {
    /// Maps a GitLab action code (`open`, `update`, `close`, `reopen`).
    pub fn from_code(code: &str) -> Self {
        match code {
            "open" => Self::Opened,
            "update" => Self::Updated,
            "close" => Self::Closed,
            "reopen" => Self::Reopened,
            other => Self::Other(other.to_string()),
        }
    }

    /// The past-tense verb shown in notifications.
    pub fn verb(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::Updated => "updated",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Other(code) => code,
        }
    }
}

/// An issue being opened, updated, closed or reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueEvent {
    pub project: Project,
    /// Name of the user who acted on the issue.
    pub actor: String,
    pub issue_id: IssueNumber,
    pub title: String,
    pub action: IssueAction,
    pub url: Option<String>,
}

impl Routable for IssueEvent {
    fn routing_key(&self) -> &RoutingKey {
        self.project.routing_key()
    }

    fn group_key(&self) -> Option<&GroupKey> {
        self.project.group_key()
    }
}

// ---------------------------------------------------------------------------
// Alert events
// ---------------------------------------------------------------------------

/// Alert status. Statuses other than `firing`/`resolved` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStatus {
    Firing,
    Resolved,
    Other(String),
}

impl AlertStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "firing" => Self::Firing,
            "resolved" => Self::Resolved,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
            Self::Other(status) => status,
        }
    }
}

/// A single alert within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub status: AlertStatus,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Alert {
    /// The `instance` label, or an empty string.
    pub fn instance(&self) -> &str {
        self.labels.get("instance").map(String::as_str).unwrap_or("")
    }

    /// The `alertname` label, or an empty string.
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map(String::as_str).unwrap_or("")
    }

    /// The `description` annotation, falling back to `summary`.
    pub fn description(&self) -> &str {
        self.annotations
            .get("description")
            .or_else(|| self.annotations.get("summary"))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// One Alertmanager notification: a group of alerts sent to one receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertBatch {
    /// Receiver name; doubles as the routing key.
    pub receiver: RoutingKey,
    /// Overall status of the group.
    pub status: AlertStatus,
    pub alerts: Vec<Alert>,
}

impl Routable for AlertBatch {
    fn routing_key(&self) -> &RoutingKey {
        &self.receiver
    }

    fn group_key(&self) -> Option<&GroupKey> {
        None
    }
}

// ---------------------------------------------------------------------------
// Normalised event
// ---------------------------------------------------------------------------

/// A decoded webhook event. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Push(PushEvent),
    Issue(IssueEvent),
    Alert(AlertBatch),
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Push(_) => EventKind::Push,
            Self::Issue(_) => EventKind::Issue,
            Self::Alert(_) => EventKind::Alert,
        }
    }

    fn routable(&self) -> &dyn Routable {
        match self {
            Self::Push(event) => event,
            Self::Issue(event) => event,
            Self::Alert(batch) => batch,
        }
    }
}

impl Routable for NormalizedEvent {
    fn routing_key(&self) -> &RoutingKey {
        self.routable().routing_key()
    }

    fn group_key(&self) -> Option<&GroupKey> {
        self.routable().group_key()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One formatted chat message.
///
/// Always a single line: CR, LF and NUL are replaced with spaces on
/// construction, so untrusted text cannot smuggle extra protocol commands.
/// IRC colour codes are left intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine(String);

impl RenderedLine {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.contains(['\r', '\n', '\0']) {
            Self(text.replace(['\r', '\n', '\0'], " "))
        } else {
            Self(text)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RenderedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_are_exact_and_case_sensitive() {
        assert_eq!(EventKind::from_tag("Push Hook"), Some(EventKind::Push));
        assert_eq!(EventKind::from_tag("Issue Hook"), Some(EventKind::Issue));
        assert_eq!(EventKind::from_tag("Alertmanager"), Some(EventKind::Alert));
        assert_eq!(EventKind::from_tag("push hook"), None);
        assert_eq!(EventKind::from_tag("Merge Request Hook"), None);
    }

    #[test]
    fn project_derives_routing_and_group_keys() {
        let project = Project::new("web", "acme", Some(String::new())).unwrap();
        assert_eq!(project.routing_key().as_str(), "acme/web");
        assert_eq!(project.group_key().map(GroupKey::as_str), Some("acme"));
        assert_eq!(project.web_url, None);
    }

    #[test]
    fn issue_actions_map_to_verbs_and_pass_unknown_codes_through() {
        assert_eq!(IssueAction::from_code("open").verb(), "opened");
        assert_eq!(IssueAction::from_code("update").verb(), "updated");
        assert_eq!(IssueAction::from_code("close").verb(), "closed");
        assert_eq!(IssueAction::from_code("reopen").verb(), "reopened");
        assert_eq!(IssueAction::from_code("moved").verb(), "moved");
    }

    #[test]
    fn alert_description_falls_back_to_summary() {
        let mut alert = Alert {
            status: AlertStatus::Firing,
            labels: BTreeMap::new(),
            annotations: BTreeMap::from([("summary".to_string(), "disk full".to_string())]),
        };
        assert_eq!(alert.description(), "disk full");
        alert
            .annotations
            .insert("description".to_string(), "/var is 99% full".to_string());
        assert_eq!(alert.description(), "/var is 99% full");
        assert_eq!(alert.instance(), "");
    }

    #[test]
    fn rendered_line_is_always_single_line() {
        let line = RenderedLine::new("title\r\nQUIT :bye\0");
        assert_eq!(line.as_str(), "title  QUIT :bye ");
    }
}
