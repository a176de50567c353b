//! Message renderer: [`NormalizedEvent`] → ordered [`RenderedLine`]s.
//!
//! Each event variant maps to one template of a [`TemplateSet`]:
//!
//! | Variant | Template | Lines |
//! |---------|----------|-------|
//! | Push | `push`, then `commit` per commit | 1 + commits |
//! | Issue | `issue` | 1 |
//! | Alert | `alert` per alert | alerts |
//!
//! Templates are Jinja2-style (minijinja) and embed mIRC colour codes
//! (`\x03NN` … `\x03`). Rendering never fails: a template that cannot be
//! evaluated yields a placeholder line and a [`RenderWarning`].
//!
//! Every line is forced onto one line (see [`RenderedLine::new`]) and truncated
//! at a char boundary to [`FormatSettings::max_line_bytes`], marker included.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::{
    AlertBatch, AlertStatus, CommitSummary, ConfigError, EventKind, IssueEvent, NormalizedEvent,
    PushEvent, RenderWarning, RenderedLine,
};

/// Default number of characters kept from a commit id.
pub const DEFAULT_SHORT_ID_LEN: usize = 7;

/// Default byte budget per line. IRC caps a full protocol line at 512 bytes
/// including the `PRIVMSG <channel> :` framing and the sender prefix the
/// server adds when relaying.
pub const DEFAULT_MAX_LINE_BYTES: usize = 400;

/// Appended to a line that was cut to fit its budget.
pub const TRUNCATION_MARKER: &str = "…";

const MIN_SHORT_ID_LEN: usize = 4;
const MAX_SHORT_ID_LEN: usize = 40;
const MIN_LINE_BYTES: usize = 64;
const MAX_LINE_BYTES: usize = 510;

// ---------------------------------------------------------------------------
// Settings and templates
// ---------------------------------------------------------------------------

/// Formatting limits shared by the decoder (short ids) and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSettings {
    short_id_len: usize,
    max_line_bytes: usize,
}

impl FormatSettings {
    /// # Errors
    ///
    /// [`ConfigError::InvalidRenderSetting`] if `short_id_len` is outside
    /// `4..=40` or `max_line_bytes` outside `64..=510`.
    pub fn new(short_id_len: usize, max_line_bytes: usize) -> Result<Self, ConfigError> {
        if !(MIN_SHORT_ID_LEN..=MAX_SHORT_ID_LEN).contains(&short_id_len) {
            return Err(ConfigError::InvalidRenderSetting {
                setting: "short_id_len",
                value: short_id_len,
                reason: "must be between 4 and 40",
            });
        }
        if !(MIN_LINE_BYTES..=MAX_LINE_BYTES).contains(&max_line_bytes) {
            return Err(ConfigError::InvalidRenderSetting {
                setting: "max_line_bytes",
                value: max_line_bytes,
                reason: "must be between 64 and 510",
            });
        }
        Ok(Self {
            short_id_len,
            max_line_bytes,
        })
    }

    pub fn short_id_len(&self) -> usize {
        self.short_id_len
    }

    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            short_id_len: DEFAULT_SHORT_ID_LEN,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

const PUSH_TEMPLATE: &str = "[\x0312{{ project }}\x03] {{ user_name }} pushed {{ total_commits }} new commit{{ 's' if total_commits != 1 else '' }} to \x0305{{ branch }}\x03{% if compare_url %} ({{ compare_url }}){% endif %}";

const COMMIT_TEMPLATE: &str = "\x0315{{ short_id }}\x03 (\x0303+{{ added }}\x03|\x0308±{{ modified }}\x03|\x0304-{{ removed }}\x03) \x0306{{ author }}\x03: {{ message }}";

const ISSUE_TEMPLATE: &str = "[\x0312{{ project }}\x03] {{ actor }} {{ action }} issue \x0308#{{ issue_id }}\x03: '{{ title }}'{% if url %} ({{ url }}){% endif %}";

const ALERT_TEMPLATE: &str = "[{{ status_color }}{{ status | upper }}\x03] {% if instance %}{{ instance }} {% endif %}\x0312{{ alertname }}\x03: {{ description }}";

/// mIRC colour prefixes for alert statuses.
const COLOR_RED: &str = "\x0304";
const COLOR_GREEN: &str = "\x0303";
const COLOR_GREY: &str = "\x0314";

/// The four message templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub push: String,
    pub commit: String,
    pub issue: String,
    pub alert: String,
}

impl TemplateSet {
    /// The built-in templates.
    pub fn builtin() -> Self {
        Self {
            push: PUSH_TEMPLATE.to_string(),
            commit: COMMIT_TEMPLATE.to_string(),
            issue: ISSUE_TEMPLATE.to_string(),
            alert: ALERT_TEMPLATE.to_string(),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("push", &self.push),
            ("commit", &self.commit),
            ("issue", &self.issue),
            ("alert", &self.alert),
        ]
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Template contexts
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PushContext<'a> {
    project: &'a str,
    user_name: &'a str,
    total_commits: usize,
    branch: &'a str,
    compare_url: Option<String>,
}

#[derive(Serialize)]
struct CommitContext<'a> {
    short_id: &'a str,
    added: usize,
    modified: usize,
    removed: usize,
    author: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct IssueContext<'a> {
    project: &'a str,
    actor: &'a str,
    action: &'a str,
    issue_id: u64,
    title: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct AlertContext<'a> {
    status: &'a str,
    status_color: &'static str,
    instance: &'a str,
    alertname: &'a str,
    description: &'a str,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Output of one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Lines in emission order.
    pub lines: Vec<RenderedLine>,
    /// One entry per placeholder that was substituted.
    pub warnings: Vec<RenderWarning>,
}

/// Renders events with a fixed [`TemplateSet`].
///
/// Undefined template variables are errors (strict mode) so a mistyped
/// override shows up as a placeholder rather than as silently blank text.
pub struct Renderer {
    env: Environment<'static>,
    templates: TemplateSet,
    settings: FormatSettings,
}

impl Renderer {
    /// Creates a renderer, checking that every template parses.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidTemplate`] naming the first template that fails
    /// to parse.
    pub fn new(templates: TemplateSet, settings: FormatSettings) -> Result<Self, ConfigError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        // Parsed in a scratch environment: templates are evaluated with
        // `render_str`, so nothing borrowed from `templates` is kept here.
        for (name, source) in templates.entries() {
            Environment::new()
                .template_from_str(source)
                .map(|_| ())
                .map_err(|err| ConfigError::InvalidTemplate {
                    template: name,
                    message: err.to_string(),
                })?;
        }

        Ok(Self {
            env,
            templates,
            settings,
        })
    }

    pub fn settings(&self) -> &FormatSettings {
        &self.settings
    }

    /// Renders every line for `event`. Never fails.
    pub fn render(&self, event: &NormalizedEvent) -> Rendered {
        let mut out = Rendered::default();
        match event {
            NormalizedEvent::Push(push) => self.render_push(push, &mut out),
            NormalizedEvent::Issue(issue) => self.render_issue(issue, &mut out),
            NormalizedEvent::Alert(batch) => self.render_alerts(batch, &mut out),
        }
        tracing::trace!(
            kind = %event.kind(),
            lines = out.lines.len(),
            warnings = out.warnings.len(),
            "Event rendered"
        );
        out
    }

    fn render_push(&self, push: &PushEvent, out: &mut Rendered) {
        let compare_url = match &push.project.web_url {
            Some(web_url) if !push.before.is_null() && !push.after.is_null() => Some(format!(
                "{}/compare/{}...{}",
                web_url.trim_end_matches('/'),
                push.before.short(self.settings.short_id_len),
                push.after.short(self.settings.short_id_len),
            )),
            _ => None,
        };
        let summary = PushContext {
            project: &push.project.name,
            user_name: &push.author,
            total_commits: push.total_commits,
            branch: &push.branch,
            compare_url,
        };
        self.emit(EventKind::Push, "push", &self.templates.push, summary, out);

        for commit in &push.commits {
            self.emit(
                EventKind::Push,
                "commit",
                &self.templates.commit,
                commit_context(commit),
                out,
            );
        }
    }

    fn render_issue(&self, issue: &IssueEvent, out: &mut Rendered) {
        let context = IssueContext {
            project: &issue.project.name,
            actor: &issue.actor,
            action: issue.action.verb(),
            issue_id: issue.issue_id.as_u64(),
            title: &issue.title,
            url: issue.url.as_deref().unwrap_or(""),
        };
        self.emit(EventKind::Issue, "issue", &self.templates.issue, context, out);
    }

    fn render_alerts(&self, batch: &AlertBatch, out: &mut Rendered) {
        for alert in &batch.alerts {
            let context = AlertContext {
                status: alert.status.as_str(),
                status_color: status_color(&alert.status),
                instance: alert.instance(),
                alertname: alert.name(),
                description: alert.description(),
            };
            self.emit(EventKind::Alert, "alert", &self.templates.alert, context, out);
        }
    }

    fn emit<C: Serialize>(
        &self,
        kind: EventKind,
        template: &'static str,
        source: &str,
        context: C,
        out: &mut Rendered,
    ) {
        let text = match self.env.render_str(source, context) {
            Ok(text) => text,
            Err(err) => {
                let warning = RenderWarning {
                    kind,
                    template,
                    message: err.to_string(),
                };
                tracing::warn!(
                    kind = %kind,
                    template = template,
                    error = %warning.message,
                    "Template render failed, using placeholder"
                );
                out.warnings.push(warning);
                format!("[{kind}] notification could not be rendered ({template} template)")
            }
        };
        out.lines.push(RenderedLine::new(truncate_to_budget(
            text,
            self.settings.max_line_bytes,
        )));
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("templates", &self.templates)
            .field("settings", &self.settings)
            .finish()
    }
}

fn commit_context(commit: &CommitSummary) -> CommitContext<'_> {
    CommitContext {
        short_id: &commit.short_id,
        added: commit.added,
        modified: commit.modified,
        removed: commit.removed,
        author: &commit.author_name,
        message: commit.message.lines().next().unwrap_or("").trim_end(),
    }
}

fn status_color(status: &AlertStatus) -> &'static str {
    match status {
        AlertStatus::Firing => COLOR_RED,
        AlertStatus::Resolved => COLOR_GREEN,
        AlertStatus::Other(_) => COLOR_GREY,
    }
}

/// Cuts `text` to at most `budget` bytes, marker included, never splitting a
/// UTF-8 sequence.
fn truncate_to_budget(text: String, budget: usize) -> String {
    if text.len() <= budget {
        return text;
    }
    let mut cut = budget.saturating_sub(TRUNCATION_MARKER.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
    truncated.push_str(&text[..cut]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
