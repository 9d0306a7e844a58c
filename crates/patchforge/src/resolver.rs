use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::registry::Registry;

/// Expand `requested` into a linear apply order: every prerequisite strictly
/// before its dependents, each reachable patch exactly once, positions fixed
/// by first encounter. Dependencies expand in declared order, requested ids
/// in request order.
pub fn resolve(registry: &Registry, requested: &[String]) -> Result<Vec<String>> {
    let mut resolved = BTreeSet::new();
    // Doubles as the in-progress marker set and the cycle diagnostic.
    let mut path: Vec<String> = Vec::new();
    let mut order = Vec::new();
    for id in requested {
        expand(registry, id, None, &mut resolved, &mut path, &mut order)?;
    }
    Ok(order)
}

fn expand(
    registry: &Registry,
    id: &str,
    wanted_by: Option<&str>,
    resolved: &mut BTreeSet<String>,
    path: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if resolved.contains(id) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|p| p == id) {
        let mut cycle: Vec<&str> = path[pos..].iter().map(String::as_str).collect();
        cycle.push(id);
        return Err(Error::config(format!(
            "dependency cycle: {}",
            cycle.join(" -> ")
        )));
    }
    let Some(patch) = registry.get(id) else {
        let detail = match wanted_by {
            Some(parent) => format!("unknown patch id '{id}' (dependency of '{parent}')"),
            None => format!("unknown patch id '{id}'"),
        };
        return Err(Error::config(detail));
    };

    path.push(id.to_string());
    for dep in &patch.dependencies {
        expand(registry, dep, Some(id), resolved, path, order)?;
    }
    path.pop();

    resolved.insert(id.to_string());
    order.push(id.to_string());
    Ok(())
}
