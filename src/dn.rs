//! Distinguished name: an ordered sequence of
//! (attribute-type, value) pairs, e.g. `o`, `ou`, `cn`.

use std::fmt;

/// Value-equal when sequences are pointwise equal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DistinguishedName {
    attributes: Vec<(String, String)>,
}

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, attribute_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((attribute_type.into(), value.into()));
        self
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn get(&self, attribute_type: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(attribute_type))
            .map(|(_, v)| v.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get("cn")
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .attributes
            .iter()
            .map(|(t, v)| format!("{t}={v}"))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_pointwise_and_order_sensitive() {
        let a = DistinguishedName::new().push("o", "Acme").push("cn", "alice");
        let b = DistinguishedName::new().push("o", "Acme").push("cn", "alice");
        let reordered = DistinguishedName::new().push("cn", "alice").push("o", "Acme");
        assert_eq!(a, b);
        assert_ne!(a, reordered);
    }

    #[test]
    fn common_name_lookup_is_case_insensitive() {
        let dn = DistinguishedName::new().push("CN", "bob");
        assert_eq!(dn.common_name(), Some("bob"));
    }
}
