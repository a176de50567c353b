//! Relay configuration: the YAML document and its validated form.
//!
//! ```yaml
//! default: "#general"
//! groups:
//!   acme: ["#acme"]
//! explicit:
//!   acme/web: ["#web-ci", "#acme"]
//! render:              # optional
//!   short_id_len: 8
//!   max_line_bytes: 400
//! templates:           # optional, any subset of push/commit/issue/alert
//!   issue: "{{ actor }} {{ action }} #{{ issue_id }}"
//! ```
//!
//! The document is parsed and validated once at start-up; any problem is a
//! [`ConfigError`]. Reading the file is the caller's job (this crate does no I/O).

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{ChannelMapping, ConfigError, EventDecoder, FormatSettings, Renderer, TemplateSet};

/// The configuration document as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    /// Fallback channel.
    pub default: String,
    /// Namespace → channels. `groups:` with no value is accepted as empty.
    #[serde(default)]
    pub groups: Option<BTreeMap<String, Vec<String>>>,
    /// `"<namespace>/<project>"` (or alert receiver) → channels.
    #[serde(default)]
    pub explicit: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub templates: TemplateOverrides,
}

/// Optional formatting limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderSection {
    pub short_id_len: Option<usize>,
    pub max_line_bytes: Option<usize>,
}

/// Optional replacements for the built-in templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateOverrides {
    pub push: Option<String>,
    pub commit: Option<String>,
    pub issue: Option<String>,
    pub alert: Option<String>,
}

impl TemplateOverrides {
    fn apply(self, base: TemplateSet) -> TemplateSet {
        TemplateSet {
            push: self.push.unwrap_or(base.push),
            commit: self.commit.unwrap_or(base.commit),
            issue: self.issue.unwrap_or(base.issue),
            alert: self.alert.unwrap_or(base.alert),
        }
    }
}

/// Validated, immutable relay configuration shared by every request.
#[derive(Debug)]
pub struct RelayConfig {
    mapping: ChannelMapping,
    renderer: Renderer,
}

impl RelayConfig {
    /// # Errors
    ///
    /// [`ConfigError::InvalidTemplate`] if a template does not parse.
    pub fn new(
        mapping: ChannelMapping,
        templates: TemplateSet,
        settings: FormatSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            mapping,
            renderer: Renderer::new(templates, settings)?,
        })
    }

    /// Parses and validates a YAML configuration document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for YAML or shape errors, otherwise the first
    /// validation error found.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument =
            serde_yaml::from_str(text).map_err(|err| ConfigError::Parse {
                message: err.to_string(),
            })?;
        Self::from_document(document)
    }

    /// Validates an already parsed document.
    pub fn from_document(document: ConfigDocument) -> Result<Self, ConfigError> {
        let mapping = ChannelMapping::from_sections(
            &document.default,
            &document.groups.unwrap_or_default(),
            &document.explicit.unwrap_or_default(),
        )?;

        let defaults = FormatSettings::default();
        let settings = FormatSettings::new(
            document
                .render
                .short_id_len
                .unwrap_or(defaults.short_id_len()),
            document
                .render
                .max_line_bytes
                .unwrap_or(defaults.max_line_bytes()),
        )?;

        let templates = document.templates.apply(TemplateSet::builtin());
        Self::new(mapping, templates, settings)
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn settings(&self) -> &FormatSettings {
        self.renderer.settings()
    }

    /// A decoder using this configuration's short-id length.
    pub fn decoder(&self) -> EventDecoder {
        EventDecoder::new(self.settings().short_id_len())
    }
}
