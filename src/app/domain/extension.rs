use serde::{Deserialize, Serialize};

/// A user-authored markdown extension, persisted per note.
///
/// `code` is opaque Lua source until it is compiled by the plugin runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub code: String,
}

fn default_enabled() -> bool {
    true
}

impl ExtensionSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            code: code.into(),
        }
    }

    /// Name shown to the author; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Per-note styling payload the host persists next to the note text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStyle {
    #[serde(default)]
    pub custom_css: Option<String>,

    #[serde(default)]
    pub markdown_plugins: Vec<ExtensionSpec>,
}

impl NoteStyle {
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &ExtensionSpec> {
        self.markdown_plugins.iter().filter(|spec| spec.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_enabled_defaults_to_true() {
        let spec: ExtensionSpec = serde_json::from_str(r#"{"id":"a","code":"return 1"}"#).unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.name, "");
        assert_eq!(spec.display_name(), "a");
    }

    #[test]
    fn test_note_style_camel_case() {
        let json = r#"{
            "customCss": ":root { --accent: red }",
            "markdownPlugins": [
                {"id": "p1", "name": "Callouts", "enabled": false, "code": "return {}"},
                {"id": "p2", "name": "Kbd", "enabled": true, "code": "return {}"}
            ]
        }"#;
        let style: NoteStyle = serde_json::from_str(json).unwrap();
        assert_eq!(style.custom_css.as_deref(), Some(":root { --accent: red }"));
        let enabled: Vec<&str> = style.enabled_plugins().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["p2"]);

        let out = serde_json::to_string(&style).unwrap();
        assert!(out.contains("\"markdownPlugins\""));
    }

    #[test]
    fn test_empty_note_style() {
        let style: NoteStyle = serde_json::from_str("{}").unwrap();
        assert_eq!(style, NoteStyle::default());
    }
}
