//! The scenario filter language.
//!
//! A filter is either built structurally or parsed from a compact string of
//! whitespace-separated tokens: the first bare identifier is the
//! scenario-name constraint, `key:value` adds an include element and
//! `!key:value` adds an exclude element.

use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::matrix::{Element, Vector};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioFilter {
    name: Option<String>,
    include: Vec<Element>,
    exclude: Vec<Element>,
}

impl ScenarioFilter {
    pub fn new(
        name: Option<String>,
        include: Vec<Element>,
        exclude: Vec<Element>,
    ) -> Self {
        Self {
            name,
            include,
            exclude,
        }
    }

    /// A filter constraining only the scenario name.
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn parse(input: &str) -> Result<Self, Error> {
        input.parse()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn includes(&self) -> &[Element] {
        &self.include
    }

    pub fn excludes(&self) -> &[Element] {
        &self.exclude
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.include.is_empty() && self.exclude.is_empty()
    }

    /// Name match, the cheap reject applied before any matrix work.
    pub fn matches_name(&self, name: &str) -> bool {
        match self.name.as_deref() {
            Some(want) => want == name,
            None => true,
        }
    }

    /// Full match against a scenario's name and variant vector.
    pub fn matches(&self, name: &str, variants: Option<&Vector>) -> bool {
        if !self.matches_name(name) {
            return false;
        }

        match variants {
            Some(vector) => {
                self.include.iter().all(|e| vector.contains_element(e))
                    && !self.exclude.iter().any(|e| vector.contains_element(e))
            }
            // A scenario without variants matches unless the filter demands
            // elements.
            None => self.include.is_empty(),
        }
    }
}

impl FromStr for ScenarioFilter {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut filter = ScenarioFilter::default();

        for token in input.split_whitespace() {
            if let Some(rest) = token.strip_prefix('!') {
                let (key, value) = split_element(rest).ok_or_else(|| {
                    Error::InvalidFilterToken {
                        token: token.to_string(),
                        reason: "exclusions must take the form `!key:value`".to_string(),
                    }
                })?;
                filter.exclude.push(Element::new(key, value));
                continue;
            }

            if token.contains(':') {
                let (key, value) =
                    split_element(token).ok_or_else(|| Error::InvalidFilterToken {
                        token: token.to_string(),
                        reason: "element constraints must take the form `key:value`".to_string(),
                    })?;
                filter.include.push(Element::new(key, value));
                continue;
            }

            if filter.name.is_some() {
                return Err(Error::InvalidFilterToken {
                    token: token.to_string(),
                    reason: "a filter can name at most one scenario".to_string(),
                });
            }
            filter.name = Some(token.to_string());
        }

        Ok(filter)
    }
}

fn split_element(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once(':')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

impl fmt::Display for ScenarioFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Vec::new();
        if let Some(name) = &self.name {
            tokens.push(name.clone());
        }
        for element in &self.include {
            tokens.push(element.to_string());
        }
        for element in &self.exclude {
            tokens.push(format!("!{element}"));
        }
        f.write_str(&tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_includes_and_excludes() {
        let filter = ScenarioFilter::parse("smoke distro:ubuntu !arch:arm64").unwrap();
        assert_eq!(filter.name(), Some("smoke"));
        assert_eq!(filter.includes(), &[Element::new("distro", "ubuntu")]);
        assert_eq!(filter.excludes(), &[Element::new("arch", "arm64")]);
    }

    #[test]
    fn name_can_follow_elements() {
        let filter = ScenarioFilter::parse("distro:ubuntu smoke").unwrap();
        assert_eq!(filter.name(), Some("smoke"));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(ScenarioFilter::parse("!missingvalue").is_err());
        assert!(ScenarioFilter::parse("!key:").is_err());
        assert!(ScenarioFilter::parse(":value").is_err());
        assert!(ScenarioFilter::parse("one two").is_err());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ScenarioFilter::default();
        assert!(filter.matches("anything", None));

        let vector: Vector = [Element::new("distro", "ubuntu")].into_iter().collect();
        assert!(filter.matches("anything", Some(&vector)));
    }

    #[test]
    fn matches_requires_includes_and_forbids_excludes() {
        let filter = ScenarioFilter::parse("smoke distro:ubuntu !arch:arm64").unwrap();

        let good: Vector = [
            Element::new("distro", "ubuntu"),
            Element::new("arch", "amd64"),
        ]
        .into_iter()
        .collect();
        let excluded: Vector = [
            Element::new("distro", "ubuntu"),
            Element::new("arch", "arm64"),
        ]
        .into_iter()
        .collect();

        assert!(filter.matches("smoke", Some(&good)));
        assert!(!filter.matches("smoke", Some(&excluded)));
        assert!(!filter.matches("other", Some(&good)));
    }

    #[test]
    fn display_round_trips() {
        let input = "smoke distro:ubuntu !arch:arm64";
        let filter = ScenarioFilter::parse(input).unwrap();
        assert_eq!(filter.to_string(), input);
        assert_eq!(ScenarioFilter::parse(&filter.to_string()).unwrap(), filter);
    }
}
