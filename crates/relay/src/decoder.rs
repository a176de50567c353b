//! Event decoder: raw webhook body + event-type tag → [`NormalizedEvent`].
//!
//! The raw payload structs below mirror only the fields the relay reads; every
//! other field of the GitLab and Alertmanager schemas is ignored. Decoding is a
//! pure function of its inputs.
//!
//! Payload references:
//! - GitLab: <https://docs.gitlab.com/ee/user/project/integrations/webhook_events.html>
//! - Alertmanager: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::{
    Alert, AlertBatch, AlertStatus, CommitSha, CommitSummary, DecodeError, EventKind,
    IssueAction, IssueEvent, IssueNumber, NormalizedEvent, Project, PushEvent, RoutingKey,
};

// ---------------------------------------------------------------------------
// Raw payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawProject {
    name: String,
    namespace: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    #[serde(default)]
    message: String,
    author: RawPerson,
    #[serde(default)]
    added: Option<Vec<String>>,
    #[serde(default)]
    modified: Option<Vec<String>>,
    #[serde(default)]
    removed: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawPush {
    user_name: String,
    before: String,
    after: String,
    #[serde(rename = "ref")]
    git_ref: String,
    project: RawProject,
    #[serde(default)]
    commits: Vec<RawCommit>,
    #[serde(default)]
    total_commits_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawIssueAttributes {
    iid: u64,
    title: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    user: RawPerson,
    project: RawProject,
    object_attributes: RawIssueAttributes,
}

#[derive(Debug, Deserialize)]
struct RawAlert {
    status: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawAlertPost {
    receiver: String,
    status: String,
    #[serde(default)]
    alerts: Vec<RawAlert>,
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decodes webhook bodies into [`NormalizedEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDecoder {
    short_id_len: usize,
}

impl EventDecoder {
    /// Creates a decoder that abbreviates commit ids to `short_id_len`
    /// characters.
    pub fn new(short_id_len: usize) -> Self {
        Self { short_id_len }
    }

    /// Decodes `body` as the event type named by `tag`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::UnknownEventType`] if `tag` is not a recognised event type.
    /// - [`DecodeError::MalformedPayload`] if `body` is not JSON of the expected
    ///   shape, or a field cannot be interpreted.
    pub fn decode(&self, tag: &str, body: &[u8]) -> Result<NormalizedEvent, DecodeError> {
        let kind =
            EventKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownEventType(tag.to_string()))?;

        match kind {
            EventKind::Push => self.decode_push(parse(body)?).map(NormalizedEvent::Push),
            EventKind::Issue => decode_issue(parse(body)?).map(NormalizedEvent::Issue),
            EventKind::Alert => decode_alerts(parse(body)?).map(NormalizedEvent::Alert),
        }
    }

    fn decode_push(&self, raw: RawPush) -> Result<PushEvent, DecodeError> {
        let branch = branch_from_ref(&raw.git_ref)?;
        let project = decode_project(raw.project)?;

        let commits = raw
            .commits
            .into_iter()
            .map(|commit| self.decode_commit(commit))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PushEvent {
            project,
            author: raw.user_name,
            branch,
            before: commit_sha(raw.before, "before")?,
            after: commit_sha(raw.after, "after")?,
            total_commits: raw.total_commits_count.unwrap_or(commits.len()),
            commits,
        })
    }

    fn decode_commit(&self, raw: RawCommit) -> Result<CommitSummary, DecodeError> {
        let id = commit_sha(raw.id, "commits[].id")?;
        Ok(CommitSummary {
            short_id: id.short(self.short_id_len).to_string(),
            id,
            message: raw.message,
            author_name: raw.author.name,
            added: raw.added.map_or(0, |files| files.len()),
            modified: raw.modified.map_or(0, |files| files.len()),
            removed: raw.removed.map_or(0, |files| files.len()),
        })
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|err| DecodeError::MalformedPayload(err.to_string()))
}

fn decode_project(raw: RawProject) -> Result<Project, DecodeError> {
    Project::new(raw.name, &raw.namespace, raw.web_url)
        .ok_or_else(|| DecodeError::MalformedPayload("project.name is empty".to_string()))
}

fn commit_sha(value: String, field: &str) -> Result<CommitSha, DecodeError> {
    CommitSha::new(value).ok_or_else(|| DecodeError::MalformedPayload(format!("{field} is empty")))
}

/// Extracts the branch from `refs/<kind>/<name>`. Everything after the second
/// `/` is the name, so `refs/heads/feature/x` yields `feature/x`.
fn branch_from_ref(git_ref: &str) -> Result<String, DecodeError> {
    let mut segments = git_ref.splitn(3, '/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(_), Some(name)) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(DecodeError::MalformedPayload(format!(
            "ref '{git_ref}' is not of the form refs/<kind>/<name>"
        ))),
    }
}

fn decode_issue(raw: RawIssue) -> Result<IssueEvent, DecodeError> {
    let attributes = raw.object_attributes;
    Ok(IssueEvent {
        project: decode_project(raw.project)?,
        actor: raw.user.name,
        issue_id: IssueNumber::new(attributes.iid),
        title: attributes.title,
        // GitLab omits the action on some system-triggered hooks.
        action: attributes
            .action
            .as_deref()
            .map_or(IssueAction::Updated, IssueAction::from_code),
        url: attributes.url.filter(|url| !url.is_empty()),
    })
}

fn decode_alerts(raw: RawAlertPost) -> Result<AlertBatch, DecodeError> {
    let receiver = RoutingKey::new(raw.receiver)
        .ok_or_else(|| DecodeError::MalformedPayload("receiver is empty".to_string()))?;
    Ok(AlertBatch {
        receiver,
        status: AlertStatus::parse(&raw.status),
        alerts: raw
            .alerts
            .into_iter()
            .map(|alert| Alert {
                status: AlertStatus::parse(&alert.status),
                labels: alert.labels,
                annotations: alert.annotations,
            })
            .collect(),
    })
}
