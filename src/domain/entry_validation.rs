//! Structural validation of configuration entries.
//!
//! Problems found here disable the entry until an operator fixes and
//! re-enables it. Linked-order cycles are reported as warnings only.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::config_entry::{ConfigEntry, ConfigSnapshot, EntryProblem};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub problems: Vec<EntryProblem>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.warnings.is_empty()
    }

    pub fn problem_for(&self, id: &str) -> Option<&EntryProblem> {
        self.problems.iter().find(|p| p.id == id)
    }
}

pub fn validate_entries(snapshot: &ConfigSnapshot, min_offset: Decimal) -> ValidationReport {
    let mut report = ValidationReport {
        problems: snapshot.problems.clone(),
        warnings: Vec::new(),
    };

    let ids: BTreeSet<&str> = snapshot
        .entries
        .iter()
        .map(|e| e.id.as_str())
        .chain(snapshot.problems.iter().map(|p| p.id.as_str()))
        .collect();

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &snapshot.entries {
        *seen.entry(entry.id.as_str()).or_default() += 1;
    }

    for entry in &snapshot.entries {
        let check = validate_pair(entry)
            .and_then(|_| validate_amounts(entry, min_offset))
            .and_then(|_| validate_link(entry, &ids));
        if let Err(reason) = check {
            report.problems.push(EntryProblem {
                id: entry.id.clone(),
                reason,
            });
        }
    }

    for (id, count) in seen {
        if count > 1 && report.problem_for(id).is_none() {
            report.problems.push(EntryProblem {
                id: id.to_string(),
                reason: format!("id appears {count} times"),
            });
        }
    }

    report.warnings.extend(find_link_cycles(&snapshot.entries));
    report
}

fn validate_pair(entry: &ConfigEntry) -> Result<(), String> {
    match entry.pair.split_once('/') {
        Some((base, quote))
            if !base.trim().is_empty()
                && !quote.trim().is_empty()
                && !quote.contains('/') =>
        {
            Ok(())
        }
        _ => Err(format!("invalid pair '{}', expected BASE/QUOTE", entry.pair)),
    }
}

fn validate_amounts(entry: &ConfigEntry, min_offset: Decimal) -> Result<(), String> {
    if entry.threshold_price <= Decimal::ZERO {
        return Err("threshold_price must be positive".to_string());
    }
    if entry.volume <= Decimal::ZERO {
        return Err("volume must be positive".to_string());
    }
    if entry.trailing_offset_percent < min_offset {
        return Err(format!(
            "trailing_offset_percent {} is below the minimum {}",
            entry.trailing_offset_percent, min_offset
        ));
    }
    if entry.trailing_offset_percent >= dec!(100) {
        return Err("trailing_offset_percent must be below 100".to_string());
    }
    Ok(())
}

fn validate_link(entry: &ConfigEntry, ids: &BTreeSet<&str>) -> Result<(), String> {
    match entry.linked_order_id.as_deref() {
        None => Ok(()),
        Some(link) if link == entry.id => Err("linked_order_id refers to itself".to_string()),
        Some(link) if !ids.contains(link) => {
            Err(format!("linked_order_id '{link}' does not exist"))
        }
        Some(_) => Ok(()),
    }
}

/// One warning per distinct cycle in the `linked_order_id` graph.
fn find_link_cycles(entries: &[ConfigEntry]) -> Vec<String> {
    let links: BTreeMap<&str, &str> = entries
        .iter()
        .filter_map(|e| {
            e.linked_order_id
                .as_deref()
                .filter(|l| *l != e.id)
                .map(|l| (e.id.as_str(), l))
        })
        .collect();

    let mut reported: BTreeSet<Vec<&str>> = BTreeSet::new();
    let mut warnings = Vec::new();
    for &start in links.keys() {
        let mut path: Vec<&str> = vec![start];
        let mut current = start;
        while let Some(&next) = links.get(current) {
            if let Some(pos) = path.iter().position(|id| *id == next) {
                let cycle = &path[pos..];
                let mut key = cycle.to_vec();
                key.sort_unstable();
                if reported.insert(key) {
                    warnings.push(format!("linked_order_id cycle: {}", cycle.join(" -> ")));
                }
                break;
            }
            path.push(next);
            current = next;
        }
    }
    warnings
}
