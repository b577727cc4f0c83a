//! Directional structural diff: does the live object already satisfy the desired one?
//!
//! Only keys that appear in the desired mappings are inspected, so server-populated
//! extras (`metadata.uid`, `status`, ...) never count as drift. Below a desired
//! non-mapping value (a sequence, say) the live value is taken verbatim and compared
//! in full, extra live keys included.

use kstate_core::{FieldChange, FieldPath, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Existing object restricted to the key shape of a desired mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Desired key not present on the live object.
    Missing,
    /// Live value taken verbatim.
    Leaf(Json),
    /// Desired mapping; entries follow the desired key order.
    Map(Vec<(String, Projection)>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffReport {
    pub matches: bool,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffReport {
    /// Counts for human output: missing on live = add, missing on desired = remove.
    pub fn summary(&self) -> DiffSummary {
        let mut s = DiffSummary::default();
        for c in &self.changes {
            match (&c.old, &c.new) {
                (None, _) => s.adds += 1,
                (_, None) => s.removes += 1,
                _ => s.updates += 1,
            }
        }
        s
    }
}

/// Project `existing` onto the keys of `desired`.
///
/// A desired mapping always yields a nested projection: an absent or `null` live key
/// projects as an empty mapping. A live non-mapping under a desired mapping is kept as
/// a leaf so the mismatch is reported once at that path.
pub fn project(existing: &Map<String, Json>, desired: &Map<String, Json>) -> Projection {
    let empty = Map::new();
    let entries = desired
        .iter()
        .map(|(key, want)| {
            let have = existing.get(key);
            let p = match (want, have) {
                (Json::Object(want_map), Some(Json::Object(have_map))) => project(have_map, want_map),
                (Json::Object(want_map), None | Some(Json::Null)) => project(&empty, want_map),
                (_, Some(v)) => Projection::Leaf(v.clone()),
                (_, None) => Projection::Missing,
            };
            (key.clone(), p)
        })
        .collect();
    Projection::Map(entries)
}

/// Compare `existing` against `desired`, reporting every leaf where desired is not met.
pub fn diff(existing: &Json, desired: &Json) -> DiffReport {
    let mut changes = Vec::new();
    let mut path = FieldPath::new();
    walk_value(desired, existing, &mut path, &mut changes);
    DiffReport { matches: changes.is_empty(), changes }
}

fn walk_projection(desired: &Map<String, Json>, projected: &[(String, Projection)], path: &mut FieldPath, out: &mut Vec<FieldChange>) {
    for ((key, want), (_, have)) in desired.iter().zip(projected) {
        path.push(PathSegment::Key(key.clone()));
        match (want, have) {
            (Json::Object(want_map), Projection::Map(entries)) => walk_projection(want_map, entries, path, out),
            (_, Projection::Missing) => out.push(change(path, None, Some(want))),
            (_, Projection::Leaf(v)) => walk_verbatim(want, v, path, out),
            // a projection mirrors desired, so a Map entry always faces a desired mapping
            (_, Projection::Map(_)) => {}
        }
        path.pop();
    }
}

fn walk_value(desired: &Json, existing: &Json, path: &mut FieldPath, out: &mut Vec<FieldChange>) {
    match (desired, existing) {
        (Json::Object(want), Json::Object(have)) => {
            if let Projection::Map(entries) = project(have, want) {
                walk_projection(want, &entries, path, out);
            }
        }
        _ => walk_verbatim(desired, existing, path, out),
    }
}

/// Full comparison of a verbatim live value: keys on either side only, positions past
/// either end and differing scalars are all reported.
fn walk_verbatim(desired: &Json, existing: &Json, path: &mut FieldPath, out: &mut Vec<FieldChange>) {
    match (desired, existing) {
        (Json::Object(want), Json::Object(have)) => {
            let mut keys: Vec<&String> = want.keys().chain(have.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(PathSegment::Key(key.clone()));
                match (want.get(key), have.get(key)) {
                    (Some(w), Some(h)) => walk_verbatim(w, h, path, out),
                    (Some(w), None) => out.push(change(path, None, Some(w))),
                    (None, Some(h)) => out.push(change(path, Some(h), None)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (Json::Array(want), Json::Array(have)) => {
            for i in 0..want.len().max(have.len()) {
                path.push(PathSegment::Index(i));
                match (want.get(i), have.get(i)) {
                    (Some(w), Some(h)) => walk_verbatim(w, h, path, out),
                    (Some(w), None) => out.push(change(path, None, Some(w))),
                    (None, Some(h)) => out.push(change(path, Some(h), None)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (want, have) => {
            if want != have {
                out.push(change(path, Some(have), Some(want)));
            }
        }
    }
}

fn change(path: &FieldPath, old: Option<&Json>, new: Option<&Json>) -> FieldChange {
    FieldChange { path: path.clone(), old: old.cloned(), new: new.cloned() }
}
