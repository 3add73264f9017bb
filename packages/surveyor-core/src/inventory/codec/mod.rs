//! Text encodings of an [`InventoryTree`].
//!
//! YAML and JSON share the nested `children`/`hosts`/`vars` layout; INI is
//! the flat section-per-group layout. All three parse back into a tree equal
//! to the one rendered.

mod host;
mod ini;
mod nested;

use crate::error::{Result, SurveyError};
use crate::inventory::InventoryTree;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Supported inventory encodings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Nested mapping, YAML syntax
    #[default]
    Yaml,
    /// Nested mapping, JSON syntax
    Json,
    /// Flat records, INI syntax
    Ini,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Yaml => "yaml",
            Encoding::Json => "json",
            Encoding::Ini => "ini",
        }
    }

    /// Infer the encoding from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yml" | "yaml" => Some(Encoding::Yaml),
            "json" => Some(Encoding::Json),
            "ini" | "cfg" | "hosts" => Some(Encoding::Ini),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Encoding::Yaml),
            "json" => Ok(Encoding::Json),
            "ini" => Ok(Encoding::Ini),
            other => Err(format!("unknown encoding '{}'", other)),
        }
    }
}

/// Render a tree to text
pub fn render(tree: &InventoryTree, encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Yaml => nested::render_yaml(tree),
        Encoding::Json => nested::render_json(tree),
        Encoding::Ini => Ok(ini::render(tree)),
    }
}

/// Parse text into a validated tree
pub fn parse(content: &str, encoding: Encoding) -> Result<InventoryTree> {
    match encoding {
        Encoding::Yaml => nested::parse_yaml(content),
        Encoding::Json => nested::parse_json(content),
        Encoding::Ini => ini::parse(content),
    }
}

/// Render and write a tree to `path`
pub fn write_inventory(path: &Path, tree: &InventoryTree, encoding: Encoding) -> Result<()> {
    let content = render(tree, encoding)?;
    fs::write(path, content).map_err(|e| SurveyError::io(path, e))?;
    tracing::info!(
        "Inventory written to {} ({}, {} hosts)",
        path.display(),
        encoding,
        tree.host_count()
    );
    Ok(())
}

/// Read and parse a tree from `path`; the encoding is inferred from the
/// extension when not given.
pub fn read_inventory(path: &Path, encoding: Option<Encoding>) -> Result<InventoryTree> {
    let encoding = encoding
        .or_else(|| Encoding::from_path(path))
        .unwrap_or_default();
    let content = fs::read_to_string(path).map_err(|e| SurveyError::io(path, e))?;
    tracing::debug!("Parsing {} as {}", path.display(), encoding);
    parse(&content, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, OctetRangeClassifier};
    use crate::config::InventorySettings;
    use crate::inventory::InventoryBuilder;
    use std::net::IpAddr;

    pub(crate) fn sample_tree() -> InventoryTree {
        let classifier = OctetRangeClassifier::default();
        let mut settings = InventorySettings::default();
        settings
            .vars
            .insert("ansible_python_interpreter".into(), serde_json::json!("auto_silent"));
        settings.vars.insert("retries".into(), serde_json::json!(3));
        let mut builder = InventoryBuilder::new(&settings).with_catalog(&classifier.catalog());
        for addr in [
            "10.0.0.5",
            "10.0.0.2",
            "10.0.0.25",
            "10.0.0.35",
            "10.0.0.45",
            "10.0.0.55",
            "10.0.0.65",
            "10.0.0.200",
            "2001:db8::1",
        ] {
            let addr: IpAddr = addr.parse().unwrap();
            builder.add_device(addr, &classifier.classify(addr)).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_round_trip_every_encoding() {
        let tree = sample_tree();
        for encoding in [Encoding::Yaml, Encoding::Json, Encoding::Ini] {
            let text = render(&tree, encoding).unwrap();
            let parsed = parse(&text, encoding)
                .unwrap_or_else(|e| panic!("{} failed to parse: {}\n{}", encoding, e, text));
            assert_eq!(parsed, tree, "{} round trip differs:\n{}", encoding, text);
        }
    }

    #[test]
    fn test_round_trip_preserves_overlay_resolution() {
        let tree = sample_tree();
        let text = render(&tree, Encoding::Ini).unwrap();
        let parsed = parse(&text, Encoding::Ini).unwrap();
        for overlay in ["all_switches", "all_routers", "all_firewalls", "production"] {
            assert_eq!(parsed.resolve_hosts(overlay), tree.resolve_hosts(overlay));
        }
    }

    #[test]
    fn test_encoding_from_path() {
        assert_eq!(Encoding::from_path(Path::new("hosts.yml")), Some(Encoding::Yaml));
        assert_eq!(Encoding::from_path(Path::new("hosts.YAML")), Some(Encoding::Yaml));
        assert_eq!(Encoding::from_path(Path::new("out/inv.json")), Some(Encoding::Json));
        assert_eq!(Encoding::from_path(Path::new("hosts.ini")), Some(Encoding::Ini));
        assert_eq!(Encoding::from_path(Path::new("hosts")), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let tree = sample_tree();
        write_inventory(&path, &tree, Encoding::Json).unwrap();
        assert_eq!(read_inventory(&path, None).unwrap(), tree);
    }

    #[test]
    fn test_write_failure_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("inventory.yml");
        match write_inventory(&path, &sample_tree(), Encoding::Yaml) {
            Err(SurveyError::SerializationIo { path: failed, source }) => {
                assert_eq!(failed, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected SerializationIo, got {:?}", other),
        }
    }
}
