//! Guard over the profile reference graph.
//!
//! Component links, upstream transport ids and a brand's manufacturer id are
//! edges pointing upstream. Aggregation only reads one hop of pre-resolved
//! values, but a save must never close a cycle or build an unbounded chain.

use std::collections::{HashMap, HashSet};

use crate::error::LedgerError;

/// Batch read of outgoing (upstream) references per profile.
pub trait ReferenceSource {
    fn upstream_references(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, LedgerError>;
}

impl ReferenceSource for HashMap<String, Vec<String>> {
    fn upstream_references(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, LedgerError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.get(id).map(|refs| (id.clone(), refs.clone())))
            .collect())
    }
}

/// Reject `references` if they reach `profile_id` or go deeper than `max_depth`.
///
/// `profile_id` is `None` for a profile that does not exist yet; such a save
/// cannot close a cycle but is still depth-checked. One batch read per level.
pub fn check_references<S>(
    profile_id: Option<&str>,
    references: &[String],
    source: &S,
    max_depth: usize,
) -> Result<(), LedgerError>
where
    S: ReferenceSource + ?Sized,
{
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = Vec::new();

    for id in references {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        if Some(id) == profile_id {
            return Err(LedgerError::validation(format!("Profile {id} cannot reference itself.")));
        }
        if visited.insert(id.to_string()) {
            frontier.push(id.to_string());
        }
    }

    let mut depth = 1;
    while !frontier.is_empty() {
        if depth > max_depth {
            return Err(LedgerError::validation(format!(
                "Upstream reference chain is deeper than {max_depth} levels."
            )));
        }
        let edges = source.upstream_references(&frontier)?;
        let mut next = Vec::new();
        for from in &frontier {
            for to in edges.get(from).into_iter().flatten() {
                if Some(to.as_str()) == profile_id {
                    let path = cycle_path(&parent, from, to);
                    return Err(LedgerError::validation(format!(
                        "Saving would create a reference cycle: {path}"
                    )));
                }
                if visited.insert(to.clone()) {
                    parent.insert(to.clone(), from.clone());
                    next.push(to.clone());
                }
            }
        }
        frontier = next;
        depth += 1;
    }
    Ok(())
}

fn cycle_path(parent: &HashMap<String, String>, last: &str, target: &str) -> String {
    let mut chain = vec![last.to_string()];
    let mut cur = last;
    while let Some(p) = parent.get(cur) {
        chain.push(p.clone());
        cur = p.as_str();
    }
    chain.reverse();
    let mut path = vec![target.to_string()];
    path.extend(chain);
    path.push(target.to_string());
    path.join(" -> ")
}
