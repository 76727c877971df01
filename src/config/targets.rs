// src/config/targets.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Dashboard-only attributes; the fetcher carries them but never reads them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presentation {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
}

/// A tracked public figure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
    /// Account handle without the leading `@`.
    pub account: String,
    #[serde(flatten)]
    pub presentation: Presentation,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account: account.into(),
            presentation: Presentation::default(),
        }
    }
}

/// Load the ordered target registry. Supports TOML (`[[targets]]`) or a JSON array.
pub fn load_targets_from(path: &Path) -> Result<Vec<Target>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading targets from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let targets = parse_targets(&content, ext.as_str())
        .with_context(|| format!("parsing targets from {}", path.display()))?;
    validate_targets(targets)
}

fn parse_targets(s: &str, hint_ext: &str) -> Result<Vec<Target>> {
    let try_toml = hint_ext == "toml" || s.contains("[[targets]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported targets format"))
}

fn parse_toml(s: &str) -> Result<Vec<Target>> {
    #[derive(Deserialize)]
    struct TomlTargets {
        targets: Vec<Target>,
    }
    let v: TomlTargets = toml::from_str(s)?;
    Ok(v.targets)
}

fn parse_json(s: &str) -> Result<Vec<Target>> {
    Ok(serde_json::from_str(s)?)
}

/// Trim fields, drop a leading `@`, refuse empty or duplicate ids/accounts.
pub fn validate_targets(items: Vec<Target>) -> Result<Vec<Target>> {
    if items.is_empty() {
        bail!("target registry is empty");
    }
    let mut ids = HashSet::new();
    let mut accounts = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut t in items {
        t.id = t.id.trim().to_string();
        t.account = t.account.trim().trim_start_matches('@').to_string();
        if t.id.is_empty() {
            bail!("target with empty id (account {:?})", t.account);
        }
        if t.account.is_empty() {
            bail!("target {} has no account", t.id);
        }
        if !ids.insert(t.id.clone()) {
            bail!("duplicate target id {}", t.id);
        }
        if !accounts.insert(t.account.to_ascii_lowercase()) {
            bail!("duplicate target account {}", t.account);
        }
        out.push(t);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_formats_work() {
        let toml = r##"
[[targets]]
id = "pablo_casado"
name = "Pablo Casado"
account = "@pablocasado_"
color = "#53B3E3"
party = "PP"
"##;
        let json = r#"[{"id": "pedro_sanchez", "name": "Pedro Sanchez", "account": "sanchezcastejon"}]"#;

        let t = validate_targets(parse_toml(toml).unwrap()).unwrap();
        assert_eq!(t[0].account, "pablocasado_");
        assert_eq!(t[0].presentation.party.as_deref(), Some("PP"));

        let j = validate_targets(parse_json(json).unwrap()).unwrap();
        assert_eq!(j[0].id, "pedro_sanchez");
        assert_eq!(j[0].presentation, Presentation::default());
    }

    #[test]
    fn empty_and_duplicate_registries_fail() {
        assert!(validate_targets(vec![]).is_err());
        let dup = vec![Target::new("a", "A", "acc"), Target::new("b", "B", "ACC")];
        assert!(validate_targets(dup).is_err());
    }
}
