//! Deep equality with mismatch diffs.
//!
//! Values are compared as `serde_json::Value`. Custom testers get the first
//! say at every node; the [`DiffBuilder`] records one line per mismatch,
//! addressed by a `$`-rooted path (`$[0].name`).

use serde_json::{Map, Value};
use std::fmt;
use std::rc::Rc;

/// Custom equality: `Some(verdict)` decides, `None` defers
pub type CustomTester = Rc<dyn Fn(&Value, &Value) -> Option<bool>>;

/// Collects mismatch lines during a comparison
#[derive(Debug, Clone, Default)]
pub struct DiffBuilder {
    lines: Vec<String>,
}

impl DiffBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Recorded mismatches, one per line
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Nothing recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Deep equality over JSON values
#[derive(Clone, Default)]
pub struct Equality {
    testers: Vec<CustomTester>,
}

impl fmt::Debug for Equality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equality")
            .field("testers", &self.testers.len())
            .finish()
    }
}

impl Equality {
    /// Plain structural equality
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom tester
    #[must_use]
    pub fn with_tester(mut self, tester: impl Fn(&Value, &Value) -> Option<bool> + 'static) -> Self {
        self.testers.push(Rc::new(tester));
        self
    }

    /// Compare `actual` with `expected`, recording mismatches in `diff`
    pub fn equals(&self, actual: &Value, expected: &Value, diff: &mut DiffBuilder) -> bool {
        self.compare("$", actual, expected, diff)
    }

    fn custom(&self, actual: &Value, expected: &Value) -> Option<bool> {
        self.testers.iter().find_map(|tester| tester(actual, expected))
    }

    fn compare(&self, path: &str, actual: &Value, expected: &Value, diff: &mut DiffBuilder) -> bool {
        if let Some(verdict) = self.custom(actual, expected) {
            if !verdict {
                diff.record(leaf_mismatch(path, actual, expected));
            }
            return verdict;
        }
        match (actual, expected) {
            (Value::Array(a), Value::Array(e)) => {
                let mut equal = true;
                if a.len() != e.len() {
                    diff.record(format!(
                        "Expected {path}.length = {} to equal {}.",
                        a.len(),
                        e.len()
                    ));
                    equal = false;
                }
                for (i, (av, ev)) in a.iter().zip(e).enumerate() {
                    equal &= self.compare(&format!("{path}[{i}]"), av, ev, diff);
                }
                equal
            }
            (Value::Object(a), Value::Object(e)) => self.compare_objects(path, a, e, diff),
            _ => {
                let equal = actual == expected;
                if !equal {
                    diff.record(leaf_mismatch(path, actual, expected));
                }
                equal
            }
        }
    }

    fn compare_objects(
        &self,
        path: &str,
        actual: &Map<String, Value>,
        expected: &Map<String, Value>,
        diff: &mut DiffBuilder,
    ) -> bool {
        let missing: Vec<_> = expected.iter().filter(|(k, _)| !actual.contains_key(*k)).collect();
        let extra: Vec<_> = actual.iter().filter(|(k, _)| !expected.contains_key(*k)).collect();
        if !missing.is_empty() {
            diff.record(format!("Expected {path} to have properties{}", property_list(&missing)));
        }
        if !extra.is_empty() {
            diff.record(format!("Expected {path} not to have properties{}", property_list(&extra)));
        }
        let mut equal = missing.is_empty() && extra.is_empty();
        for (key, av) in actual {
            if let Some(ev) = expected.get(key) {
                equal &= self.compare(&format!("{path}.{key}"), av, ev, diff);
            }
        }
        equal
    }
}

fn leaf_mismatch(path: &str, actual: &Value, expected: &Value) -> String {
    format!("Expected {path} = {} to equal {}.", pretty(actual), pretty(expected))
}

fn property_list(entries: &[(&String, &Value)]) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("\n    {k}: {}", pretty(v)))
        .collect()
}

/// Jasmine-style rendering: `'str'`, `[ 1, 2 ]`, `Object({ k: v })`
#[must_use]
pub fn pretty(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{s}'"),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(pretty).collect();
            format!("[ {} ]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {}", pretty(v))).collect();
            format!("Object({{ {} }})", inner.join(", "))
        }
    }
}

/// [`pretty`] framed by blank lines, as matcher messages embed values
#[must_use]
pub fn pp(value: &Value) -> String {
    format!("\n\n{}\n\n", pretty(value))
}

/// The diff text, but only when both sides are arrays or both are objects
#[must_use]
pub fn extra_info(diff: &DiffBuilder, actual: &Value, expected: &Value) -> String {
    let comparable = matches!(
        (actual, expected),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_))
    );
    if comparable {
        diff.message()
    } else {
        String::new()
    }
}
