//! Stack exports resolved against the last applied state

use anyhow::{Context as _, Result};
use declarative::{Reference, StateStore};
use serde_json::Value;
use std::collections::BTreeMap;

use super::load_stack;
use crate::Context;
use crate::cli::OutputsArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &OutputsArgs) -> Result<()> {
    let stack = load_stack(ctx)?;
    let store = stack.state_store(ctx.state_dir.as_deref());
    let records = store.load()?;

    let lookup = |r: &Reference| {
        records
            .get(&r.node)
            .and_then(|record| record.last_outputs.get(&r.key))
            .cloned()
    };

    let mut resolved: BTreeMap<&str, Value> = BTreeMap::new();
    let mut pending = Vec::new();
    for (name, value) in &stack.exports {
        match value.resolve(&lookup) {
            Ok(v) => {
                resolved.insert(name, v);
            }
            Err(e) => {
                log::debug!("export {name} unresolved: {e:?}");
                pending.push(name.as_str());
            }
        }
    }

    if let Some(name) = &args.name {
        let value = resolved
            .get(name.as_str())
            .with_context(|| format!("No applied output named '{name}'"))?;
        println!("{}", ui::format_value(value));
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    ui::header(&format!("Outputs of stack {}", stack.name));
    if stack.exports.is_empty() {
        ui::dim("No exports declared");
    }
    for (name, value) in &resolved {
        ui::kv(name, &ui::format_value(value));
    }
    for name in pending {
        ui::kv(name, "(not yet applied)");
    }
    Ok(())
}
