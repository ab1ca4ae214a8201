//! Ordered list of known participant names.
//!
//! The roster seeds the all-drivers reconciler with placeholders so that every
//! expected driver is visible before any telemetry arrives. It is injected
//! from configuration rather than compiled in.

use std::str::FromStr;

/// An ordered, duplicate-free list of driver names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    /// Build a roster, dropping blank entries and later duplicates.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roster = Self::default();
        for name in names {
            roster.push(name);
        }
        roster
    }

    /// Append a name unless it is blank or already present.
    pub fn push(&mut self, name: impl Into<String>) {
        let name = name.into().trim().to_string();
        if !name.is_empty() && !self.contains(&name) {
            self.names.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Render as the comma-separated form used in the config file.
    pub fn to_config_value(&self) -> String {
        self.names.join(", ")
    }
}

impl FromStr for Roster {
    type Err = std::convert::Infallible;

    /// Parse a comma-separated list, e.g. `"Oscar Piastri, Lando Norris"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.split(',')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_separated() {
        let roster: Roster = "Oscar Piastri, Lando Norris ,Max Verstappen".parse().unwrap();
        assert_eq!(
            roster.names(),
            &["Oscar Piastri", "Lando Norris", "Max Verstappen"]
        );
    }

    #[test]
    fn test_blank_and_duplicate_entries_dropped() {
        let roster = Roster::new(["A", "", "B", "A", "  "]);
        assert_eq!(roster.names(), &["A", "B"]);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_empty_string_is_empty_roster() {
        let roster: Roster = "".parse().unwrap();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_config_value_round_trip() {
        let roster = Roster::new(["A", "B"]);
        let parsed: Roster = roster.to_config_value().parse().unwrap();
        assert_eq!(parsed, roster);
    }
}
