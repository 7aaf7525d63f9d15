use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    #[default]
    Text,
    Input,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredElement {
    pub id: ElementId,
    pub text: String,
    #[serde(default)]
    pub kind: ElementKind,
}

impl RegisteredElement {
    pub fn new(id: impl Into<ElementId>, text: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind,
        }
    }

    pub fn text(id: impl Into<ElementId>, text: impl Into<String>) -> Self {
        Self::new(id, text, ElementKind::Text)
    }

    pub fn input(id: impl Into<ElementId>, text: impl Into<String>) -> Self {
        Self::new(id, text, ElementKind::Input)
    }

    pub fn is_input(&self) -> bool {
        self.kind == ElementKind::Input
    }
}

/// Languages the app ships translations and voices for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "yo")]
    Yoruba,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Yoruba];

    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Yoruba => "yo",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Yoruba => "Yoruba",
        }
    }

    pub fn local_name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Yoruba => "Yorùbá",
        }
    }

    /// BCP-47 tag handed to the speech engine.
    pub fn speech_locale(self) -> &'static str {
        match self {
            Language::English => "en-GB",
            Language::Yoruba => "yo-NG",
        }
    }

    /// Accepts a language code or its English name, ignoring case.
    pub fn from_code(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|language| {
            raw.eq_ignore_ascii_case(language.code()) || raw.eq_ignore_ascii_case(language.name())
        })
    }

    /// Maps a device locale such as `yo-NG` or `en_US` onto a supported
    /// language, falling back to the default.
    pub fn from_locale(locale: &str) -> Self {
        let primary = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default();
        Self::from_code(primary).unwrap_or_default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidancePhase {
    #[default]
    Inactive,
    Speaking,
    WaitingForInput,
}

/// What a registered UI element reads to decide how to present itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuidanceSnapshot {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
    pub waiting_for_input: bool,
    pub phase: GuidancePhase,
}
