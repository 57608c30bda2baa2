//! Cache key derivation for method calls.
//!
//! ## Key Format
//!
//! `{qualifier}:{method}:[{positional,...}]{keyword}`, e.g.
//! `UserRepository:get_user:[1]` or `Search:find:["rust"]{"limit":10}`
//!
//! The qualifier and method name have `\` and `:` backslash-escaped, so the
//! first two unescaped colons always delimit them. Argument values are
//! rendered as canonical JSON (object keys sorted at every depth), which is
//! self-delimiting, so distinct argument tuples never share a key.
//!
//! The same [`KeyBuilder`] is used on the read path and on the invalidation
//! path, which is what makes an invalidation rule address the entry a
//! cached call wrote.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-derived key (used by backends and tests).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Explicit call-site argument record.
///
/// Positional arguments keep call order and are bound to parameter names;
/// keyword arguments are kept sorted by name. Values are captured as JSON
/// when they are recorded, so an argument that cannot be serialized fails
/// here, before any backend is touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<(String, Value)>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        let name = name.into();
        let value = capture(&name, value)?;
        self.push_positional(name, value)?;
        Ok(self)
    }

    /// Record a keyword argument.
    pub fn kwarg<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        let name = name.into();
        let value = capture(&name, value)?;
        self.ensure_unique(&name)?;
        self.keyword.insert(name, value);
        Ok(self)
    }

    pub(crate) fn push_positional(&mut self, name: String, value: Value) -> Result<()> {
        self.ensure_unique(&name)?;
        self.positional.push((name, value));
        Ok(())
    }

    /// Remove a keyword argument, returning its value.
    pub(crate) fn take_keyword(&mut self, name: &str) -> Option<Value> {
        self.keyword.remove(name)
    }

    pub(crate) fn has_keyword(&self, name: &str) -> bool {
        self.keyword.contains_key(name)
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.get(name).is_some() {
            return Err(CacheError::key_derivation(format!(
                "argument '{name}' recorded more than once"
            )));
        }
        Ok(())
    }

    /// Look up an argument value by parameter name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.positional
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.keyword.get(name))
    }

    /// Names of the positional arguments, in call order.
    pub fn positional_names(&self) -> impl Iterator<Item = &str> {
        self.positional.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn capture<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        CacheError::key_derivation(format!("argument '{name}' is not serializable: {e}"))
    })
}

/// Derives cache keys for the methods of one class or namespace.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    qualifier: String,
}

impl KeyBuilder {
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
        }
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Prefix shared by every key of `method`, whatever its arguments.
    pub fn method_prefix(&self, method: &str) -> String {
        format!(
            "{}:{}:",
            escape_component(&self.qualifier),
            escape_component(method)
        )
    }

    /// Derive the key for a call of `method` with `args`.
    pub fn derive(&self, method: &str, args: &CallArgs) -> CacheKey {
        let mut key = self.method_prefix(method);

        key.push('[');
        for (i, (_, value)) in args.positional.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            write_canonical(value, &mut key);
        }
        key.push(']');

        if !args.keyword.is_empty() {
            key.push('{');
            for (i, (name, value)) in args.keyword.iter().enumerate() {
                if i > 0 {
                    key.push(',');
                }
                write_json_string(name, &mut key);
                key.push(':');
                write_canonical(value, &mut key);
            }
            key.push('}');
        }

        CacheKey(key)
    }
}

fn escape_component(raw: &str) -> Cow<'_, str> {
    if !raw.contains([':', '\\']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        if c == ':' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Compact JSON with object keys sorted, independent of map insertion order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(name, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(raw: &str, out: &mut String) {
    out.push_str(&Value::from(raw).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn user_args(id: u64) -> CallArgs {
        CallArgs::new().arg("user_id", &id).unwrap()
    }

    #[test]
    fn test_equal_calls_share_key() {
        let keys = KeyBuilder::new("UserRepository");
        assert_eq!(
            keys.derive("get_user", &user_args(1)),
            keys.derive("get_user", &user_args(1))
        );
        assert_eq!(
            keys.derive("get_user", &user_args(1)).as_str(),
            "UserRepository:get_user:[1]"
        );
    }

    #[test]
    fn test_different_arguments_differ() {
        let keys = KeyBuilder::new("UserRepository");
        assert_ne!(
            keys.derive("get_user", &user_args(1)),
            keys.derive("get_user", &user_args(2))
        );

        // 1 and "1" must not collide
        let as_string = CallArgs::new().arg("user_id", "1").unwrap();
        assert_ne!(
            keys.derive("get_user", &user_args(1)),
            keys.derive("get_user", &as_string)
        );
    }

    #[test]
    fn test_positional_order_matters() {
        let keys = KeyBuilder::new("Svc");
        let a = CallArgs::new().arg("a", &1).unwrap().arg("b", &2).unwrap();
        let b = CallArgs::new().arg("a", &2).unwrap().arg("b", &1).unwrap();
        assert_ne!(keys.derive("f", &a), keys.derive("f", &b));
    }

    #[test]
    fn test_keyword_order_is_irrelevant() {
        let keys = KeyBuilder::new("Svc");
        let a = CallArgs::new()
            .kwarg("limit", &10)
            .unwrap()
            .kwarg("offset", &0)
            .unwrap();
        let b = CallArgs::new()
            .kwarg("offset", &0)
            .unwrap()
            .kwarg("limit", &10)
            .unwrap();
        assert_eq!(keys.derive("list", &a), keys.derive("list", &b));
        assert_eq!(
            keys.derive("list", &a).as_str(),
            r#"Svc:list:[]{"limit":10,"offset":0}"#
        );
    }

    #[test]
    fn test_map_arguments_are_canonical() {
        let keys = KeyBuilder::new("Svc");
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }
        let a = CallArgs::new().arg("filters", &first).unwrap();
        let b = CallArgs::new().arg("filters", &second).unwrap();
        assert_eq!(keys.derive("search", &a), keys.derive("search", &b));
    }

    #[test]
    fn test_unserializable_argument_fails() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not valid JSON object keys");
        let err = CallArgs::new().arg("coords", &bad).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_duplicate_argument_rejected() {
        let err = CallArgs::new()
            .arg("user_id", &1)
            .unwrap()
            .kwarg("user_id", &2)
            .unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_delimiters_are_escaped() {
        let a = KeyBuilder::new("a:b").derive("c", &CallArgs::new());
        let b = KeyBuilder::new("a").derive("b:c", &CallArgs::new());
        assert_ne!(a, b);
        assert_eq!(a.as_str(), r"a\:b:c:[]");
        assert_eq!(b.as_str(), r"a:b\:c:[]");
    }

    #[test]
    fn test_method_prefix_matches_only_its_method() {
        let keys = KeyBuilder::new("Repo");
        let prefix = keys.method_prefix("get_user");
        assert!(keys.derive("get_user", &user_args(7)).as_str().starts_with(&prefix));
        assert!(
            !keys
                .derive("get_user_count", &CallArgs::new())
                .as_str()
                .starts_with(&prefix)
        );
    }

    #[test]
    fn test_lookup_by_name() {
        let args = CallArgs::new()
            .arg("user_id", &5)
            .unwrap()
            .kwarg("verbose", &true)
            .unwrap();
        assert_eq!(args.get("user_id"), Some(&Value::from(5)));
        assert_eq!(args.get("verbose"), Some(&Value::from(true)));
        assert_eq!(args.get("missing"), None);
        assert_eq!(args.len(), 2);
        assert_eq!(args.positional_names().collect::<Vec<_>>(), vec!["user_id"]);
    }
}
