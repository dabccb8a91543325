//! Variable store — a string-keyed string map with integer coercion.
//!
//! Values are always stored as strings; the integer accessors coerce on
//! the way in and out. Insertion order is preserved so `show` output is
//! stable.

use std::io::{self, Write};

pub struct Store {
    pairs: Vec<(String, String)>,
}

impl Store {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Current value of a variable, if set.
    pub fn get(&self, var: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == var)
            .map(|(_, v)| v.as_str())
    }

    /// Set a variable, replacing any existing value.
    pub fn set(&mut self, var: &str, val: &str) {
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| k == var) {
            pair.1 = val.to_string();
            return;
        }
        self.pairs.push((var.to_string(), val.to_string()));
    }

    /// Remove a variable; the variable becomes un-set.
    pub fn unset(&mut self, var: &str) {
        self.pairs.retain(|(k, _)| k != var);
    }

    /// Current value of a variable as an integer. Accepts an optional
    /// leading `-` followed by decimal digits; anything else (or an
    /// unset variable) yields `None`.
    pub fn get_int(&self, var: &str) -> Option<i64> {
        let val = self.get(var)?;
        let (negative, digits) = match val.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, val),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut build: i64 = 0;
        for b in digits.bytes() {
            build = build.checked_mul(10)?.checked_add((b - b'0') as i64)?;
        }
        Some(if negative { -build } else { build })
    }

    /// Set a variable to the decimal rendering of an integer.
    pub fn set_int(&mut self, var: &str, val: i64) {
        self.set(var, &val.to_string());
    }

    /// Dump the store contents. Debugging aid; the format is not part
    /// of any contract.
    pub fn show(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Data store:")?;
        for (key, val) in &self.pairs {
            writeln!(out, "\t{}:\t\"{}\"", key, val)?;
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_unset_is_none() {
        let store = Store::new();
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn set_then_get() {
        let mut store = Store::new();
        store.set("x", "hello");
        assert_eq!(store.get("x"), Some("hello"));
    }

    #[test]
    fn set_replaces_existing() {
        let mut store = Store::new();
        store.set("x", "one");
        store.set("x", "two");
        assert_eq!(store.get("x"), Some("two"));
    }

    #[test]
    fn unset_removes() {
        let mut store = Store::new();
        store.set("x", "1");
        store.unset("x");
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn int_round_trip() {
        let mut store = Store::new();
        store.set_int("n", -42);
        assert_eq!(store.get("n"), Some("-42"));
        assert_eq!(store.get_int("n"), Some(-42));
    }

    #[test]
    fn get_int_rejects_non_numeric() {
        let mut store = Store::new();
        for bad in ["", "-", "12x", "x12", "1.5", "--3", " 1"] {
            store.set("v", bad);
            assert_eq!(store.get_int("v"), None, "accepted {:?}", bad);
        }
    }

    #[test]
    fn get_int_rejects_overflow() {
        let mut store = Store::new();
        store.set("v", "99999999999999999999999999");
        assert_eq!(store.get_int("v"), None);
    }

    #[test]
    fn show_lists_in_insertion_order() {
        let mut store = Store::new();
        store.set("b", "2");
        store.set("a", "1");
        let mut out = Vec::new();
        store.show(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Data store:\n\tb:\t\"2\"\n\ta:\t\"1\"\n");
    }
}
