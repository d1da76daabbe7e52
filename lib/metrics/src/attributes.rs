use std::borrow::Cow;
use std::collections::BTreeMap;
use std::collections::btree_map::Iter;

/// An ordered set of key/value pairs identifying one series of a metric.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Attributes(BTreeMap<&'static str, Cow<'static, str>>);

impl Attributes {
    pub fn iter(&self) -> Iter<'_, &'static str, Cow<'static, str>> {
        self.0.iter()
    }

    /// Sets `key`, replacing the previous value if any.
    pub fn insert(&mut self, key: &'static str, value: impl Into<Cow<'static, str>>) {
        assert_legal_key(key);
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|value| value.as_ref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<&[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: &[(&'static str, &'static str); N]) -> Self {
        let mut attributes = Attributes::default();
        for &(key, value) in pairs {
            attributes.insert(key, value);
        }

        attributes
    }
}

impl<const N: usize> From<[(&'static str, Cow<'static, str>); N]> for Attributes {
    fn from(pairs: [(&'static str, Cow<'static, str>); N]) -> Self {
        let mut attributes = Attributes::default();
        for (key, value) in pairs {
            attributes.insert(key, value);
        }

        attributes
    }
}

/// Panics unless `key` matches `[0-9a-z_]+`.
pub(crate) fn assert_legal_key(key: &str) {
    assert!(!key.is_empty(), "key must not be empty");
    assert!(
        key.bytes()
            .all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'z' | b'_')),
        "key must match [0-9a-z_]+, got: \"{key}\""
    );
}
