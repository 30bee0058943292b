//! Dynamically generated configuration fragments

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/clickhouse-server/config.d";
pub const DEFAULT_FRAGMENT_FILE: &str = "secrets.xml";
pub const PREPROCESSED_DIR: &str = "/var/lib/clickhouse/preprocessed_configs";

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

/// Fresh correlation id, safe to embed in grep patterns and XML comments
pub fn correlation_id() -> String {
    Uuid::new_v4().to_string().replace('-', "_")
}

/// A value in the secrets section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    Leaf(String),
    Group(SecretEntries),
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        SecretValue::Leaf(value.to_string())
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        SecretValue::Leaf(value)
    }
}

impl From<SecretEntries> for SecretValue {
    fn from(entries: SecretEntries) -> Self {
        SecretValue::Group(entries)
    }
}

/// Ordered named entries; a repeated name replaces the earlier value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretEntries(IndexMap<String, SecretValue>);

impl SecretEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<SecretValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SecretValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn render(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        for (name, value) in &self.0 {
            match value {
                SecretValue::Leaf(text) => {
                    out.push_str(&format!("{}<{}>{}</{}>\n", indent, name, escape_text(text), name));
                }
                SecretValue::Group(children) => {
                    out.push_str(&format!("{}<{}>\n", indent, name));
                    children.render(out, depth + 1);
                    out.push_str(&format!("{}</{}>\n", indent, name));
                }
            }
        }
    }
}

/// Options for rendering a secrets fragment
#[derive(Debug, Clone)]
pub struct FragmentOptions {
    pub config_dir: PathBuf,
    pub file_name: String,
    /// Put bare text directly inside the secrets section, making nested values unreachable
    pub inaccessible_text: Option<String>,
    /// Name of the merged config the server writes under the preprocessed directory
    pub preprocessed_name: String,
}

impl Default for FragmentOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            file_name: DEFAULT_FRAGMENT_FILE.to_string(),
            inaccessible_text: None,
            preprocessed_name: "config.xml".to_string(),
        }
    }
}

/// A configuration snippet together with the marker that identifies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFragment {
    pub content: String,
    pub target_path: PathBuf,
    pub display_name: String,
    pub correlation_id: String,
    /// Merged config the server regenerates after picking up the fragment
    pub expected_artifact_name: String,
}

impl ConfigFragment {
    /// Render a secrets fragment with a fresh correlation id
    pub fn secrets(entries: &SecretEntries, options: &FragmentOptions) -> Self {
        Self::secrets_with_id(entries, options, correlation_id())
    }

    pub fn secrets_with_id(entries: &SecretEntries, options: &FragmentOptions, id: String) -> Self {
        let mut content = String::from(XML_HEADER);
        content.push_str("<yandex>\n");
        content.push_str("  <secrets>");
        if let Some(text) = &options.inaccessible_text {
            content.push_str(&escape_text(text));
        }
        content.push('\n');
        content.push_str(&format!("    <!--config uid: {}-->\n", id));
        entries.render(&mut content, 2);
        content.push_str("  </secrets>\n");
        content.push_str("</yandex>\n");

        Self {
            content,
            target_path: options.config_dir.join(&options.file_name),
            display_name: options.file_name.clone(),
            correlation_id: id,
            expected_artifact_name: options.preprocessed_name.clone(),
        }
    }

    /// Path of the preprocessed artifact on the node
    pub fn artifact_path(&self) -> PathBuf {
        Path::new(PREPROCESSED_DIR).join(format!("_{}", self.expected_artifact_name))
    }

    /// Directory the server's main config lives in
    pub fn server_config_dir(&self) -> PathBuf {
        self.target_path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/etc/clickhouse-server"))
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
