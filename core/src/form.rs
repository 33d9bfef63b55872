//! `application/x-www-form-urlencoded` serialization.
//!
//! # Design
//! Encoding is delegated to `url::form_urlencoded`, which applies the
//! WHATWG byte set. `Form` keeps fields in insertion order so the wire
//! output is predictable; a descriptor only ever sees the serialized text.

use url::form_urlencoded;

/// Serialize pairs in the order given. Spaces become `+`, every byte outside
/// `[A-Za-z0-9*-._]` is percent-encoded. Keys follow the same rules, so the
/// output always decodes back to the input pairs.
pub fn encode_form<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

/// Insertion-ordered form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, String)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. The key is trimmed; an existing key keeps its position
    /// and takes the new value.
    pub fn add(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = key.as_ref().trim();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some(field) => field.1 = value,
            None => self.fields.push((key.to_string(), value)),
        }
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn serialize(&self) -> String {
        encode_form(self.fields.iter().map(|(k, v)| (k, v)))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Form {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter().fold(Form::new(), |form, (k, v)| form.add(k, v))
    }
}
