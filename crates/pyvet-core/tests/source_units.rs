//! Extraction properties over a few realistic Python modules.

use pyvet_core::SourceUnit;

const SERVICE: &str = r#""""Inventory service."""
import json
from dataclasses import dataclass


@dataclass
class Item:
    sku: str
    qty: int


class Inventory:
    def __init__(self):
        self.items = {}

    def duplicates(self, other):
        found = []
        for a in self.items.values():
            for b in other:
                if a.sku == b.sku:
                    found.append(a)
        return found


def load(path):
    with open(path) as fh:
        return [Item(**row) for row in json.load(fh)]


async def refresh(client, inventory):
    for sku in inventory.items:
        await client.ping(sku)


if __name__ == '__main__':
    print(load("items.json"))
"#;

/// Test: every extracted unit is a verbatim slice of the input.
#[test]
fn units_and_hotspots_are_verbatim_slices() {
    let unit = SourceUnit::parse(SERVICE);
    assert!(unit.is_syntactically_valid());
    assert!(!unit.top_level_units().is_empty());
    for slice in unit.top_level_units().iter().chain(unit.hotspots()) {
        assert!(SERVICE.contains(slice.as_str()), "not a slice: {}", slice);
    }
}

/// Test: decorated classes, plain classes, functions, coroutines and the guard.
#[test]
fn top_level_units_cover_all_definition_kinds() {
    let unit = SourceUnit::parse(SERVICE);
    let heads: Vec<&str> = unit
        .top_level_units()
        .iter()
        .map(|u| u.lines().next().unwrap_or_default())
        .collect();
    assert_eq!(
        heads,
        vec![
            "@dataclass",
            "class Inventory:",
            "def load(path):",
            "async def refresh(client, inventory):",
            "if __name__ == '__main__':",
        ]
    );
}

/// Test: only the doubly nested loop is a hotspot.
#[test]
fn only_nested_loops_are_hotspots() {
    let unit = SourceUnit::parse(SERVICE);
    assert_eq!(unit.hotspots().len(), 1);
    assert!(unit.hotspots()[0].starts_with("for a in self.items.values():"));
}

/// Test: the skeleton keeps module context and elides bodies.
#[test]
fn skeleton_outlines_the_module() {
    let unit = SourceUnit::parse(SERVICE);
    let skeleton = unit.skeleton();
    assert!(skeleton.starts_with("\"\"\"Inventory service.\"\"\""));
    assert!(skeleton.contains("from dataclasses import dataclass"));
    assert!(skeleton.contains("@dataclass\nclass Item:\n    ..."));
    assert!(skeleton.contains("async def refresh(client, inventory):\n    ..."));
    assert!(!skeleton.contains("found.append(a)"));
}

/// Test: one broken signature degrades the whole file.
#[test]
fn broken_module_degrades() {
    let broken = "def ok():\n    return 1\n\ndef bad(:\n    pass\n";
    let unit = SourceUnit::parse(broken);
    assert!(!unit.is_syntactically_valid());
    assert_eq!(unit.top_level_units(), &[broken.to_string()]);
    assert_eq!(unit.hotspots(), &[broken.to_string()]);
    assert!(unit.parse_error().is_some());
}

/// Test: empty input is valid and falls back to the (empty) text.
#[test]
fn empty_input() {
    let unit = SourceUnit::parse("");
    assert!(unit.is_syntactically_valid());
    assert_eq!(unit.top_level_units(), &[String::new()]);
    assert_eq!(unit.skeleton(), "");
}
