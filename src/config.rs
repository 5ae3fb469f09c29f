//! Stack file loading
//!
//! A stack is a TOML file declaring resources, free-form configuration
//! values, engine settings and exports. `${config.KEY}` is substituted at
//! load time; every other `${node.key}` becomes a reference resolved by the
//! engine.

use anyhow::{Context, Result, bail};
use declarative::{
    AttrValue, FileStateStore, Graph, ResourceNode, RetryConfig, build_graph,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Pseudo-node name reserved for configuration values
const CONFIG_NODE: &str = "config";

static CONFIG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{config\.([A-Za-z0-9_-]+)\}").expect("config pattern is valid")
});

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
struct StackFile {
    stack: StackMeta,
    #[serde(default)]
    config: BTreeMap<String, toml::Value>,
    #[serde(default)]
    engine: EngineSettings,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceDecl>,
    #[serde(default)]
    exports: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StackMeta {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceDecl {
    id: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    inputs: toml::Table,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub parallelism: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub state_dir: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            parallelism: 4,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            backoff_factor: retry.backoff_factor,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            state_dir: None,
        }
    }
}

impl EngineSettings {
    /// Reject settings the retry loop cannot use
    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            bail!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            );
        }
        if self.max_delay_ms < self.base_delay_ms {
            bail!(
                "max_delay_ms ({}) is smaller than base_delay_ms ({})",
                self.max_delay_ms,
                self.base_delay_ms
            );
        }
        Ok(())
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ============================================================================
// Loaded stack
// ============================================================================

/// A parsed stack, ready to build a graph from
#[derive(Debug)]
pub struct Stack {
    pub name: String,
    pub description: Option<String>,
    pub path: PathBuf,
    pub engine: EngineSettings,
    pub nodes: Vec<ResourceNode>,
    pub exports: BTreeMap<String, AttrValue>,
}

impl Stack {
    /// Load and parse a stack file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read stack file {}", path.display()))?;
        Self::parse(&content, path)
            .with_context(|| format!("Invalid stack file {}", path.display()))
    }

    /// Parse stack content; `path` anchors relative state directories
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: StackFile = toml::from_str(content)?;
        file.engine.validate().context("invalid [engine] settings")?;
        let config = file.config;

        let mut nodes = Vec::with_capacity(file.resources.len());
        for decl in file.resources {
            if decl.id == CONFIG_NODE {
                bail!("resource id `{CONFIG_NODE}` is reserved for configuration values");
            }
            let mut node = ResourceNode::new(&decl.id, &decl.resource_type);
            for (key, value) in &decl.inputs {
                let attr = to_attr(value, &config)
                    .with_context(|| format!("{}: input `{key}`", decl.id))?;
                node = node.input(key.as_str(), attr);
            }
            for key in decl.outputs {
                node = node.output(key);
            }
            for id in decl.depends_on {
                node = node.depends_on(id);
            }
            nodes.push(node);
        }

        let mut exports = BTreeMap::new();
        for (name, text) in file.exports {
            let attr = string_attr(&text, &config).with_context(|| format!("export `{name}`"))?;
            exports.insert(name, attr);
        }

        log::debug!(
            "loaded stack {} with {} resources and {} exports",
            file.stack.name,
            nodes.len(),
            exports.len()
        );

        Ok(Self {
            name: file.stack.name,
            description: file.stack.description,
            path: path.to_path_buf(),
            engine: file.engine,
            nodes,
            exports,
        })
    }

    /// Build the validated dependency graph
    pub fn graph(&self) -> Result<Graph> {
        Ok(build_graph(self.nodes.clone())?)
    }

    /// Directory holding this stack's state records
    ///
    /// An override wins; otherwise `[engine] state_dir` (tilde-expanded,
    /// relative to the stack file) or `.strata/<name>` next to the stack file.
    pub fn state_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            return dir.to_path_buf();
        }
        let base = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        match &self.engine.state_dir {
            Some(dir) => base.join(&*shellexpand::tilde(dir)),
            None => base.join(".strata").join(&self.name),
        }
    }

    pub fn state_store(&self, override_dir: Option<&Path>) -> FileStateStore {
        FileStateStore::new(self.state_dir(override_dir))
    }
}

// ============================================================================
// Value conversion
// ============================================================================

fn to_attr(value: &toml::Value, config: &BTreeMap<String, toml::Value>) -> Result<AttrValue> {
    Ok(match value {
        toml::Value::String(s) => string_attr(s, config)?,
        toml::Value::Array(items) => AttrValue::List(
            items
                .iter()
                .map(|v| to_attr(v, config))
                .collect::<Result<_>>()?,
        ),
        toml::Value::Table(table) => AttrValue::Map(
            table
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_attr(v, config)?)))
                .collect::<Result<_>>()?,
        ),
        other => AttrValue::Literal(to_json(other)?),
    })
}

/// Substitute configuration, then parse `${node.key}` references
fn string_attr(text: &str, config: &BTreeMap<String, toml::Value>) -> Result<AttrValue> {
    // A string that is exactly one config value keeps the value's type
    if let Some(caps) = CONFIG_RE.captures(text)
        && caps.get(0).is_some_and(|m| m.as_str().len() == text.len())
    {
        return Ok(AttrValue::Literal(to_json(config_value(&caps[1], config)?)?));
    }

    let mut missing = None;
    let substituted = CONFIG_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        match config.get(&caps[1]) {
            Some(toml::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    if let Some(key) = missing {
        bail!("unknown config value `{key}`");
    }

    AttrValue::template(&substituted).map_err(|e| anyhow::anyhow!(e))
}

fn config_value<'a>(
    key: &str,
    config: &'a BTreeMap<String, toml::Value>,
) -> Result<&'a toml::Value> {
    config
        .get(key)
        .with_context(|| format!("unknown config value `{key}`"))
}

fn to_json(value: &toml::Value) -> Result<serde_json::Value> {
    Ok(match value {
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        other => serde_json::to_value(other)?,
    })
}
