//! Method annotations and per-instance cache binding.
//!
//! A class declares its annotated methods once in a [`ClassSpec`]; each
//! instance owns a [`CacheBinding`] that is bound to exactly one
//! [`CacheLayer`] during construction. Method bodies are run through
//! [`CacheBinding::invoke`], which applies the declared annotations:
//!
//! - `cache(ttl)`: read-through on the key derived from the call arguments
//! - `invalidate(target)` / `invalidate_mapped(target, mapping)`: after the
//!   body succeeds, delete the `target` entry addressed by this call's
//!   arguments
//! - `invalidate_method(target)`: after success, delete every `target` entry
//! - `invalidate_all()`: after success, clear the bound cache
//!
//! ```ignore
//! static USERS: LazyLock<Arc<ClassSpec>> = LazyLock::new(|| {
//!     ClassSpec::builder("UserRepository")
//!         .method(MethodSpec::new("get_user").params(["user_id"]).cache(Some(Duration::from_secs(300))))
//!         .method(MethodSpec::new("update_user").params(["user_id", "name"]).invalidate("get_user"))
//!         .build()
//! });
//!
//! async fn get_user(&self, user_id: u64) -> Result<User, RepoError> {
//!     let args = CallArgs::new().arg("user_id", &user_id)?;
//!     self.cache.invoke("get_user", args, || self.fetch_user(user_id)).await
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::coordinator::{CacheLayer, read_through};
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, CallArgs, KeyBuilder};

/// Read-through caching for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// `None` keeps entries until they are invalidated.
    pub ttl: Option<Duration>,
}

/// Links a caller's arguments to the cache key of another method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRule {
    pub target: String,
    /// Caller parameter name → target parameter name. Target parameters not
    /// mentioned here are looked up under their own name.
    pub param_mapping: Vec<(String, String)>,
}

impl InvalidationRule {
    /// Build the target call's arguments from the caller's arguments.
    ///
    /// Returns `None` when any target parameter has no value in `args`;
    /// the rule then does not apply to this call.
    pub fn resolve(&self, target: &MethodSpec, args: &CallArgs) -> Option<CallArgs> {
        let mut resolved = CallArgs::new();
        for param in &target.params {
            let source = self
                .param_mapping
                .iter()
                .find(|(_, to)| to == param)
                .map_or(param.as_str(), |(from, _)| from.as_str());
            let value = args.get(source)?;
            resolved.push_positional(param.clone(), value.clone()).ok()?;
        }
        Some(resolved)
    }
}

/// Work done after a method body succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Delete the single entry addressed through a parameter mapping.
    Key(InvalidationRule),
    /// Delete every entry of a method.
    Method { target: String },
    /// Clear the whole bound cache.
    All,
}

/// Declaration of one method: its parameters and annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    name: String,
    params: Vec<String>,
    cache: Option<CachePolicy>,
    invalidations: Vec<Invalidation>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            cache: None,
            invalidations: Vec::new(),
        }
    }

    /// Declared parameter names, in positional order (receiver excluded).
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache(mut self, ttl: Option<Duration>) -> Self {
        self.cache = Some(CachePolicy { ttl });
        self
    }

    /// Invalidate `target`, taking its parameters from same-named arguments.
    pub fn invalidate(self, target: impl Into<String>) -> Self {
        self.invalidate_mapped(target, std::iter::empty::<(String, String)>())
    }

    /// Invalidate `target`, mapping caller parameters to target parameters.
    pub fn invalidate_mapped<I, A, B>(mut self, target: impl Into<String>, mapping: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        self.invalidations.push(Invalidation::Key(InvalidationRule {
            target: target.into(),
            param_mapping: mapping
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }));
        self
    }

    pub fn invalidate_method(mut self, target: impl Into<String>) -> Self {
        self.invalidations.push(Invalidation::Method {
            target: target.into(),
        });
        self
    }

    pub fn invalidate_all(mut self) -> Self {
        self.invalidations.push(Invalidation::All);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.params
    }

    pub fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache
    }

    pub fn invalidations(&self) -> &[Invalidation] {
        &self.invalidations
    }

    /// Arguments in the form keys are derived from: declared parameters
    /// passed as keywords move into their positional slots, so a call keys
    /// the same entry whichever way its arguments were recorded.
    fn canonical_args(&self, args: &CallArgs) -> Result<CallArgs> {
        self.check_args(args)?;

        let mut canonical = args.clone();
        let recorded = args.positional_names().count();
        for param in &self.params[recorded..] {
            match canonical.take_keyword(param) {
                Some(value) => canonical.push_positional(param.clone(), value)?,
                None => break,
            }
        }

        if let Some(param) = self.params.iter().find(|p| canonical.has_keyword(p)) {
            return Err(CacheError::key_derivation(format!(
                "argument '{param}' of '{}' follows an omitted parameter",
                self.name
            )));
        }
        Ok(canonical)
    }

    /// Positional arguments must follow the declared parameters. Trailing
    /// parameters may be omitted.
    fn check_args(&self, args: &CallArgs) -> Result<()> {
        let mut declared = self.params.iter();
        for name in args.positional_names() {
            match declared.next() {
                Some(param) if param == name => {}
                Some(param) => {
                    return Err(CacheError::key_derivation(format!(
                        "argument '{name}' of '{}' is out of order, expected '{param}'",
                        self.name
                    )));
                }
                None => {
                    return Err(CacheError::key_derivation(format!(
                        "argument '{name}' is not a declared parameter of '{}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Annotated methods of one class, plus the key builder they share.
#[derive(Debug, Clone)]
pub struct ClassSpec {
    keys: KeyBuilder,
    methods: HashMap<String, MethodSpec>,
}

impl ClassSpec {
    pub fn builder(name: impl Into<String>) -> ClassSpecBuilder {
        ClassSpecBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.keys.qualifier()
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }
}

pub struct ClassSpecBuilder {
    name: String,
    methods: Vec<MethodSpec>,
}

impl ClassSpecBuilder {
    /// Declare a method. A later declaration with the same name replaces it.
    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    pub fn build(self) -> Arc<ClassSpec> {
        let methods = self
            .methods
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        Arc::new(ClassSpec {
            keys: KeyBuilder::new(self.name),
            methods,
        })
    }
}

/// An instance's link to the cache serving its annotated methods.
///
/// Bound at most once; the binding cannot be replaced afterwards.
pub struct CacheBinding {
    class: Arc<ClassSpec>,
    layer: OnceLock<Arc<dyn CacheLayer>>,
}

impl CacheBinding {
    /// A binding that is bound immediately.
    pub fn new(class: Arc<ClassSpec>, layer: Arc<dyn CacheLayer>) -> Self {
        let binding = Self::unbound(class);
        let _ = binding.layer.set(layer);
        binding
    }

    /// A binding whose cache is supplied later with [`bind`](Self::bind).
    pub fn unbound(class: Arc<ClassSpec>) -> Self {
        Self {
            class,
            layer: OnceLock::new(),
        }
    }

    pub fn bind(&self, layer: Arc<dyn CacheLayer>) -> Result<()> {
        self.layer.set(layer).map_err(|_| CacheError::AlreadyBound {
            class: self.class.name().to_string(),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.layer.get().is_some()
    }

    pub fn layer(&self) -> Result<&Arc<dyn CacheLayer>> {
        self.layer
            .get()
            .ok_or_else(|| CacheError::unbound(self.class.name()))
    }

    pub fn class(&self) -> &ClassSpec {
        &self.class
    }

    /// Key a call of `method` with `args` reads and writes.
    pub fn key_for(&self, method: &str, args: &CallArgs) -> Result<CacheKey> {
        let spec = self.spec(method)?;
        let canonical = spec.canonical_args(args)?;
        Ok(self.class.keys.derive(method, &canonical))
    }

    fn spec(&self, method: &str) -> Result<&MethodSpec> {
        self.class
            .method(method)
            .ok_or_else(|| CacheError::UndeclaredMethod {
                class: self.class.name().to_string(),
                method: method.to_string(),
            })
    }

    /// Run `body` as the implementation of `method`, applying its annotations.
    ///
    /// Key derivation and binding errors are raised before `body` runs or the
    /// cache is touched, for annotated and invalidation-only methods alike.
    /// Declared parameters may be recorded positionally or as keywords. If
    /// `body` fails, its error is returned and no invalidation happens.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        method: &str,
        args: CallArgs,
        body: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let layer = self.layer()?;
        let spec = self.spec(method)?;
        let args = spec.canonical_args(&args)?;

        let value = match spec.cache {
            Some(policy) => {
                let key = self.class.keys.derive(method, &args);
                read_through(layer.as_ref(), &key, policy.ttl, body).await?
            }
            None => body().await?,
        };

        self.apply_invalidations(layer.as_ref(), spec, &args)
            .await?;
        Ok(value)
    }

    /// Run every invalidation of `spec`. All are attempted; the first
    /// failure is returned.
    async fn apply_invalidations(
        &self,
        layer: &dyn CacheLayer,
        spec: &MethodSpec,
        args: &CallArgs,
    ) -> Result<()> {
        let mut first_error = None;

        for invalidation in &spec.invalidations {
            let outcome = match invalidation {
                Invalidation::Key(rule) => self.invalidate_rule(layer, spec, rule, args).await,
                Invalidation::Method { target } => {
                    if self.class.method(target).is_none() {
                        tracing::debug!(method = spec.name(), target = %target, "invalidation target not declared, skipping");
                        Ok(())
                    } else {
                        let prefix = self.class.keys.method_prefix(target);
                        layer.invalidate_prefix(&prefix).await.map(|_| ())
                    }
                }
                Invalidation::All => layer.invalidate_all().await,
            };

            if let Err(e) = outcome {
                tracing::warn!(method = spec.name(), error = %e, "cache invalidation failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn invalidate_rule(
        &self,
        layer: &dyn CacheLayer,
        spec: &MethodSpec,
        rule: &InvalidationRule,
        args: &CallArgs,
    ) -> Result<()> {
        let Some(target) = self.class.method(&rule.target) else {
            tracing::debug!(method = spec.name(), target = %rule.target, "invalidation target not declared, skipping");
            return Ok(());
        };
        let Some(target_args) = rule.resolve(target, args) else {
            tracing::debug!(method = spec.name(), target = %rule.target, "invalidation parameters unresolved, skipping");
            return Ok(());
        };
        let key = self.class.keys.derive(&rule.target, &target_args);
        layer.invalidate(&key).await
    }
}

/// Implemented by types whose methods run through a [`CacheBinding`].
///
/// The binding must be created during construction and bound before any
/// annotated method is called; calls on an unbound instance fail with
/// [`CacheError::Unbound`].
pub trait Cacheable {
    fn cache_binding(&self) -> &CacheBinding;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::coordinator::CacheCoordinator;

    fn orders() -> Arc<ClassSpec> {
        ClassSpec::builder("Orders")
            .method(
                MethodSpec::new("get_order")
                    .params(["customer_id", "order_id"])
                    .cache(None),
            )
            .method(
                MethodSpec::new("cancel")
                    .params(["client", "order_id"])
                    .invalidate_mapped("get_order", [("client", "customer_id")]),
            )
            .build()
    }

    fn layer() -> Arc<dyn CacheLayer> {
        Arc::new(CacheCoordinator::new(Arc::new(MemoryBackend::new())))
    }

    #[test]
    fn test_rule_resolves_mapped_and_same_name_params() {
        let spec = orders();
        let target = spec.method("get_order").unwrap();
        let rule = InvalidationRule {
            target: "get_order".to_string(),
            param_mapping: vec![("client".to_string(), "customer_id".to_string())],
        };

        let args = CallArgs::new()
            .arg("client", &7)
            .unwrap()
            .arg("order_id", &99)
            .unwrap();
        let resolved = rule.resolve(target, &args).unwrap();
        let expected = CallArgs::new()
            .arg("customer_id", &7)
            .unwrap()
            .arg("order_id", &99)
            .unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_rule_with_missing_param_does_not_apply() {
        let spec = orders();
        let target = spec.method("get_order").unwrap();
        let rule = InvalidationRule {
            target: "get_order".to_string(),
            param_mapping: Vec::new(),
        };
        let args = CallArgs::new().arg("order_id", &99).unwrap();
        assert!(rule.resolve(target, &args).is_none());
    }

    #[test]
    fn test_args_must_follow_declared_order() {
        let binding = CacheBinding::new(orders(), layer());

        let swapped = CallArgs::new()
            .arg("order_id", &1)
            .unwrap()
            .arg("customer_id", &2)
            .unwrap();
        assert!(matches!(
            binding.key_for("get_order", &swapped),
            Err(CacheError::KeyDerivation(_))
        ));

        let prefix = CallArgs::new().arg("customer_id", &2).unwrap();
        assert!(binding.key_for("get_order", &prefix).is_ok());

        let extra = CallArgs::new()
            .arg("customer_id", &2)
            .unwrap()
            .arg("order_id", &1)
            .unwrap()
            .arg("region", "eu")
            .unwrap();
        assert!(binding.key_for("get_order", &extra).is_err());
    }

    #[test]
    fn test_keyword_params_key_like_positional() {
        let binding = CacheBinding::new(orders(), layer());

        let positional = CallArgs::new()
            .arg("customer_id", &2)
            .unwrap()
            .arg("order_id", &1)
            .unwrap();
        let keyword = CallArgs::new()
            .kwarg("order_id", &1)
            .unwrap()
            .kwarg("customer_id", &2)
            .unwrap();
        let mixed = CallArgs::new()
            .arg("customer_id", &2)
            .unwrap()
            .kwarg("order_id", &1)
            .unwrap();

        let expected = binding.key_for("get_order", &positional).unwrap();
        assert_eq!(binding.key_for("get_order", &keyword).unwrap(), expected);
        assert_eq!(binding.key_for("get_order", &mixed).unwrap(), expected);

        let with_extra = mixed.kwarg("trace", &true).unwrap();
        assert_ne!(binding.key_for("get_order", &with_extra).unwrap(), expected);
    }

    #[test]
    fn test_keyword_after_omitted_param_is_rejected() {
        let binding = CacheBinding::new(orders(), layer());
        let gap = CallArgs::new().kwarg("order_id", &1).unwrap();
        assert!(matches!(
            binding.key_for("get_order", &gap),
            Err(CacheError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_bind_once() {
        let binding = CacheBinding::unbound(orders());
        assert!(!binding.is_bound());
        assert!(matches!(binding.layer(), Err(CacheError::Unbound { .. })));

        binding.bind(layer()).unwrap();
        assert!(binding.is_bound());
        assert!(matches!(
            binding.bind(layer()),
            Err(CacheError::AlreadyBound { .. })
        ));
    }

    #[tokio::test]
    async fn test_undeclared_method_is_rejected() {
        let binding = CacheBinding::new(orders(), layer());
        let result: std::result::Result<u32, CacheError> = binding
            .invoke("missing", CallArgs::new(), || async { Ok(1) })
            .await;
        assert!(matches!(result, Err(CacheError::UndeclaredMethod { .. })));
    }
}
