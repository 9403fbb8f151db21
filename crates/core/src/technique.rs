//! The technique catalog: a read-only tree of sales techniques keyed by
//! dot-separated numeric ids ("2.1.3"), loaded once from JSON at startup.
//!
//! Ordering is structural: ids are compared segment-by-segment as numbers,
//! and a parent ("2.1") sorts before all of its children ("2.1.1"). Phase
//! headers are part of the catalog but never part of the trainable order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

/// A single slot the coach must fill before roleplay can start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSlot {
    /// Stable key the answer is stored under ("sector", "product", ...).
    pub key: String,
    /// The question the coach asks for this slot, verbatim.
    pub question: String,
}

/// One node of the technique tree.
#[derive(Debug, Clone, Deserialize)]
pub struct TechniqueNode {
    #[serde(rename = "nummer")]
    pub id: String,
    #[serde(rename = "naam")]
    pub name: String,
    /// Phase headers ("1", "2", ...) group techniques but are not trainable.
    #[serde(rename = "is_fase", default)]
    pub is_phase_header: bool,
    /// Whether this technique can be practiced in roleplay. Theory-only
    /// techniques stay in coach chat.
    #[serde(default = "default_true")]
    pub roleplay_capable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    technieken: Vec<TechniqueNode>,
    /// Required context slots per phase, keyed by phase number as a string.
    #[serde(default)]
    context_slots: HashMap<String, Vec<ContextSlot>>,
}

/// The loaded catalog. Immutable after construction; the trainable order
/// is computed once and cached.
#[derive(Debug)]
pub struct TechniqueCatalog {
    nodes: HashMap<String, TechniqueNode>,
    ordered: Vec<String>,
    context_slots: HashMap<u8, Vec<ContextSlot>>,
}

/// Compares two technique ids segment-by-segment as numbers. A missing
/// segment sorts before any present one, so "2.1" precedes "2.1.1".
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let pa: Vec<i64> = a.split('.').filter_map(|s| s.parse().ok()).collect();
    let pb: Vec<i64> = b.split('.').filter_map(|s| s.parse().ok()).collect();
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let x = pa.get(i).copied().unwrap_or(-1);
        let y = pb.get(i).copied().unwrap_or(-1);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl TechniqueCatalog {
    pub fn from_nodes(
        nodes: Vec<TechniqueNode>,
        context_slots: HashMap<u8, Vec<ContextSlot>>,
    ) -> Self {
        let mut ordered: Vec<String> = nodes
            .iter()
            .filter(|n| !n.is_phase_header)
            .map(|n| n.id.clone())
            .collect();
        ordered.sort_by(|a, b| compare_ids(a, b));
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            nodes,
            ordered,
            context_slots,
        }
    }

    /// Loads the catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read technique catalog at {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(raw).context("technique catalog is not valid JSON")?;
        let mut slots = HashMap::new();
        for (phase, list) in file.context_slots {
            let phase: u8 = phase
                .parse()
                .with_context(|| format!("context_slots key {phase:?} is not a phase number"))?;
            slots.insert(phase, list);
        }
        Ok(Self::from_nodes(file.technieken, slots))
    }

    pub fn get(&self, id: &str) -> Option<&TechniqueNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All trainable technique ids in curriculum order.
    pub fn ordered_ids(&self) -> &[String] {
        &self.ordered
    }

    /// The trainable techniques that precede `id` in curriculum order.
    /// Unknown ids yield an empty slice.
    pub fn predecessors(&self, id: &str) -> &[String] {
        match self.ordered.iter().position(|t| t == id) {
            Some(idx) => &self.ordered[..idx],
            None => &[],
        }
    }

    /// The technique directly after `id` in curriculum order.
    pub fn next_after(&self, id: &str) -> Option<&str> {
        let idx = self.ordered.iter().position(|t| t == id)?;
        self.ordered.get(idx + 1).map(String::as_str)
    }

    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.nodes.get(id).map(|n| n.name.as_str()).unwrap_or(id)
    }

    /// The phase a technique belongs to: its first id segment.
    pub fn phase_of(&self, id: &str) -> u8 {
        id.split('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
    }

    /// Unknown ids are treated as roleplay-capable; access checks reject
    /// them before this matters.
    pub fn roleplay_capable(&self, id: &str) -> bool {
        self.nodes.get(id).map(|n| n.roleplay_capable).unwrap_or(true)
    }

    /// The context slots that must be gathered before roleplay in `phase`.
    pub fn slots_for_phase(&self, phase: u8) -> &[ContextSlot] {
        self.context_slots
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, header: bool) -> TechniqueNode {
        TechniqueNode {
            id: id.to_string(),
            name: format!("Techniek {id}"),
            is_phase_header: header,
            roleplay_capable: true,
        }
    }

    fn catalog() -> TechniqueCatalog {
        TechniqueCatalog::from_nodes(
            vec![
                node("1", true),
                node("1.2", false),
                node("1.1", false),
                node("2", true),
                node("2.1.1", false),
                node("2.1", false),
                node("2.10", false),
                node("2.2", false),
            ],
            HashMap::new(),
        )
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        assert_eq!(compare_ids("2.2", "2.10"), Ordering::Less);
        assert_eq!(compare_ids("10.1", "9.9"), Ordering::Greater);
    }

    #[test]
    fn parent_sorts_before_children() {
        assert_eq!(compare_ids("2.1", "2.1.1"), Ordering::Less);
        let c = catalog();
        assert_eq!(
            c.ordered_ids(),
            &["1.1", "1.2", "2.1", "2.1.1", "2.2", "2.10"]
        );
    }

    #[test]
    fn phase_headers_are_excluded_from_order() {
        let c = catalog();
        assert!(!c.ordered_ids().iter().any(|id| id == "1" || id == "2"));
        assert!(c.contains("1"));
    }

    #[test]
    fn predecessors_are_the_order_prefix() {
        let c = catalog();
        assert_eq!(c.predecessors("2.1"), &["1.1", "1.2"]);
        assert!(c.predecessors("1.1").is_empty());
        assert!(c.predecessors("nope").is_empty());
    }

    #[test]
    fn next_after_follows_the_order() {
        let c = catalog();
        assert_eq!(c.next_after("1.2"), Some("2.1"));
        assert_eq!(c.next_after("2.10"), None);
        assert_eq!(c.next_after("nope"), None);
    }

    #[test]
    fn display_name_falls_back_to_the_id() {
        let c = catalog();
        assert_eq!(c.display_name("2.1"), "Techniek 2.1");
        let unknown = String::from("9.9");
        assert_eq!(c.display_name(&unknown), "9.9");
    }

    #[test]
    fn parses_catalog_json() {
        let raw = r#"{
            "technieken": [
                {"nummer": "1", "naam": "Opening", "is_fase": true},
                {"nummer": "1.1", "naam": "Begroeting"},
                {"nummer": "1.2", "naam": "Agenderen", "roleplay_capable": false}
            ],
            "context_slots": {
                "1": [{"key": "sector", "question": "In welke sector verkoop je?"}]
            }
        }"#;
        let c = TechniqueCatalog::from_json(raw).unwrap();
        assert_eq!(c.ordered_ids(), &["1.1", "1.2"]);
        assert!(!c.roleplay_capable("1.2"));
        assert!(c.roleplay_capable("1.1"));
        assert_eq!(c.phase_of("1.2"), 1);
        assert_eq!(c.slots_for_phase(1).len(), 1);
        assert!(c.slots_for_phase(3).is_empty());
    }
}
