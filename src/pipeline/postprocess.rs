//! Post-processing: deterministic cleanup of backend output.
//!
//! Even with a strict schema in the prompt, models wrap JSON in
//! ` ```json ` fences, add a sentence before the object, emit boxes outside
//! `[0, 1]`, or drop optional arrays. Each rule here is a pure function with
//! no further backend calls, so it is independently testable.
//!
//! ## Icon classification
//!
//! [`icon_for_type`] maps a free-text component type to a [`ComponentIcon`]
//! through [`ICON_RULES`], an ordered keyword table. The type is lowercased
//! and the first rule with a matching keyword wins, so the table order is
//! the tie-break (an "LED driver IC" is a diode, not a chip).

use crate::model::{BoundingBox, ComponentIcon};
use once_cell::sync::Lazy;
use regex::Regex;

// ── Rule 1: Icon table ───────────────────────────────────────────────────────

/// Keyword rules in priority order. Matching is substring-based on the
/// lowercased type.
pub const ICON_RULES: &[(ComponentIcon, &[&str])] = &[
    (ComponentIcon::Resistor, &["resist"]),
    (ComponentIcon::Capacitor, &["cap"]),
    (ComponentIcon::Inductor, &["induct", "coil"]),
    (ComponentIcon::Diode, &["diode", "led", "rectifier"]),
    (ComponentIcon::Transistor, &["transistor", "fet", "bjt", "igbt"]),
    (
        ComponentIcon::Chip,
        &["ic", "chip", "processor", "controller", "op-amp", "opamp"],
    ),
    (ComponentIcon::Switch, &["switch", "button", "relay"]),
    (
        ComponentIcon::Connector,
        &["conn", "head", "jack", "plug", "socket"],
    ),
    (ComponentIcon::Ground, &["gnd", "ground"]),
    (
        ComponentIcon::Power,
        &["volt", "sourc", "batt", "cell", "pwr", "vcc"],
    ),
];

/// Derive the icon category for a free-text component type.
pub fn icon_for_type(kind: &str) -> ComponentIcon {
    let kind = kind.to_lowercase();
    ICON_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| kind.contains(k)))
        .map(|(icon, _)| *icon)
        .unwrap_or(ComponentIcon::Generic)
}

// ── Rule 2: Strip code fences ────────────────────────────────────────────────

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*?)\n?```\s*$").unwrap());

/// Remove an outer ```` ```json ```` fence if the whole answer is wrapped in one.
pub fn strip_json_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_JSON_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or(trimmed),
        None => trimmed,
    }
}

// ── Rule 3: Isolate the JSON payload ─────────────────────────────────────────

/// Best-effort isolation of the JSON value in a model answer.
///
/// Strips fences first; if prose surrounds the value, keeps the span from
/// the first `{` or `[` to the matching last `}` or `]`.
pub fn json_payload(input: &str) -> &str {
    let s = strip_json_fences(input);
    if s.starts_with('{') || s.starts_with('[') {
        return s;
    }
    let start = s.find(['{', '[']);
    let end = s.rfind(['}', ']']);
    match (start, end) {
        (Some(a), Some(b)) if a < b => &s[a..=b],
        _ => s,
    }
}

// ── Rule 4: Bounding boxes ───────────────────────────────────────────────────

/// Turn a raw `[top, left, bottom, right]` array into a normalised box.
///
/// Returns `None` unless there are exactly four finite numbers. Values are
/// clamped to `[0, 1]`, and inverted edges are swapped.
pub fn normalise_bounding_box(raw: &[f64]) -> Option<BoundingBox> {
    let [top, left, bottom, right]: [f64; 4] = raw.try_into().ok()?;
    if ![top, left, bottom, right].iter().all(|v| v.is_finite()) {
        return None;
    }
    let clamp = |v: f64| v.clamp(0.0, 1.0);
    let (top, bottom) = (clamp(top.min(bottom)), clamp(top.max(bottom)));
    let (left, right) = (clamp(left.min(right)), clamp(left.max(right)));
    Some(BoundingBox {
        top,
        left,
        bottom,
        right,
    })
}
