//! MethodRegistry: the immutable table of callable methods.
//!
//! Built once at startup, then shared behind an `Arc` by the dispatcher, the
//! job bridge and the front door. Nothing mutates it after that.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ccrpc_protocol::methods::{PseudoKind, parse_pseudo};
use ccrpc_protocol::{AuthRequirement, RequestContext, RpcError};
use ccrpc_services::Handler;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

/// Expected JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Bool,
    List,
    Object,
    Any,
}

impl ParamType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Object => "mapping",
            Self::Any => "any",
        }
    }
}

/// Number of positional arguments a method accepts. `max: None` is
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    fn check(&self, given: usize) -> Result<(), RpcError> {
        if given < self.min {
            return Err(RpcError::invalid_params("not enough arguments"));
        }
        if self.max.is_some_and(|max| given > max) {
            return Err(RpcError::invalid_params("too many arguments"));
        }
        Ok(())
    }
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// Object-safe wrapper for the Handler trait.
trait HandlerDyn: Send + Sync {
    fn call_dyn<'a>(&'a self, ctx: &'a RequestContext, args: Vec<Value>) -> HandlerFuture<'a>;
}

impl<T: Handler> HandlerDyn for T {
    fn call_dyn<'a>(&'a self, ctx: &'a RequestContext, args: Vec<Value>) -> HandlerFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}

/// Everything the server knows about one method.
#[derive(Clone)]
pub struct MethodSpec {
    name: String,
    handler: Arc<dyn HandlerDyn>,
    arity: Arity,
    param_names: Vec<String>,
    param_types: Option<Vec<ParamType>>,
    auth: AuthRequirement,
    sync_callable: bool,
    async_enabled: bool,
}

impl MethodSpec {
    /// A method with no declared parameters, no authentication, callable
    /// synchronously and not exposed through the job bridge.
    pub fn new<H: Handler + 'static>(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            arity: Arity::at_least(0),
            param_names: Vec::new(),
            param_types: None,
            auth: AuthRequirement::None,
            sync_callable: true,
            async_enabled: false,
        }
    }

    pub fn with_arity(mut self, min: usize, max: Option<usize>) -> Self {
        self.arity = Arity { min, max };
        self
    }

    /// Names used to bind named parameters to positions.
    pub fn with_param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_param_types(mut self, types: impl Into<Vec<ParamType>>) -> Self {
        self.param_types = Some(types.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthRequirement) -> Self {
        self.auth = auth;
        self
    }

    /// Expose `<name>_async` / `<name>_check` through the job bridge.
    pub fn with_async(mut self, enabled: bool) -> Self {
        self.async_enabled = enabled;
        self
    }

    pub fn sync_callable(mut self, callable: bool) -> Self {
        self.sync_callable = callable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn auth(&self) -> AuthRequirement {
        self.auth
    }

    pub fn is_sync_callable(&self) -> bool {
        self.sync_callable
    }

    pub fn is_async_enabled(&self) -> bool {
        self.async_enabled
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn param_types(&self) -> Option<&[ParamType]> {
        self.param_types.as_deref()
    }

    pub(crate) fn invoke<'a>(&'a self, ctx: &'a RequestContext, args: Vec<Value>) -> HandlerFuture<'a> {
        self.handler.call_dyn(ctx, args)
    }

    pub(crate) fn check_arity(&self, given: usize) -> Result<(), RpcError> {
        self.arity.check(given)
    }

    pub(crate) fn check_types(&self, args: &[Value]) -> Result<(), RpcError> {
        let Some(types) = &self.param_types else {
            return Ok(());
        };
        for (index, (value, expected)) in args.iter().zip(types).enumerate() {
            if !expected.matches(value) {
                let label = self
                    .param_names
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", index + 1));
                return Err(RpcError::invalid_params(format!(
                    "argument {label} is not of expected type {}: {value}",
                    expected.name()
                )));
            }
        }
        Ok(())
    }

    /// Map named parameters onto positions using the declared names. Names
    /// must form a prefix of the declaration; trailing ones may be left out.
    pub(crate) fn bind_named(&self, named: &Map<String, Value>) -> Result<Vec<Value>, RpcError> {
        if let Some(unknown) = named.keys().find(|key| !self.param_names.contains(key)) {
            return Err(RpcError::invalid_params(format!(
                "{} got an unexpected keyword argument '{unknown}'",
                self.name
            )));
        }
        let mut args = Vec::with_capacity(named.len());
        for name in &self.param_names {
            match named.get(name) {
                Some(value) => args.push(value.clone()),
                None => break,
            }
        }
        if args.len() < named.len() {
            let missing = &self.param_names[args.len()];
            return Err(RpcError::invalid_params(format!(
                "{} is missing argument '{missing}'",
                self.name
            )));
        }
        Ok(args)
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("param_names", &self.param_names)
            .field("param_types", &self.param_types)
            .field("auth", &self.auth)
            .field("sync_callable", &self.sync_callable)
            .field("async_enabled", &self.async_enabled)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("method {0} is already registered")]
    Duplicate(String),
    #[error("method {name}: minimum arity {min} exceeds maximum {max}")]
    InvalidArity { name: String, min: usize, max: usize },
    #[error("method {name}: {types} parameter types declared for at most {max} arguments")]
    TooManyTypes { name: String, types: usize, max: usize },
}

/// Maps method names to their specs.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodSpec>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Registering the same name twice is a
    /// configuration error.
    pub fn register(&mut self, spec: MethodSpec) -> Result<(), RegistryError> {
        if self.methods.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }
        if let Some(max) = spec.arity.max {
            if spec.arity.min > max {
                return Err(RegistryError::InvalidArity {
                    name: spec.name,
                    min: spec.arity.min,
                    max,
                });
            }
            if let Some(types) = &spec.param_types {
                if types.len() > max {
                    return Err(RegistryError::TooManyTypes {
                        name: spec.name.clone(),
                        types: types.len(),
                        max,
                    });
                }
            }
        }
        info!(
            "Registering method: {} (auth: {}, async: {})",
            spec.name, spec.auth, spec.async_enabled
        );
        self.methods.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    pub fn lookup(&self, name: &str) -> Result<&MethodSpec, RpcError> {
        self.get(name).ok_or_else(|| RpcError::method_not_found(name))
    }

    /// Authentication requirement of a registered method; `None` for
    /// anything unknown so the failure happens at dispatch instead.
    pub fn auth_requirement_for(&self, name: &str) -> AuthRequirement {
        self.get(name).map(MethodSpec::auth).unwrap_or_default()
    }

    /// Resolve an async pseudo-method to its target. A name that is itself
    /// registered is never treated as a pseudo-method.
    pub fn resolve_pseudo(&self, name: &str) -> Option<(PseudoKind, &MethodSpec)> {
        if self.methods.contains_key(name) {
            return None;
        }
        let (kind, target) = parse_pseudo(name)?;
        self.get(target)
            .filter(|spec| spec.async_enabled)
            .map(|spec| (kind, spec))
    }

    /// Name used for the authentication check: the target for pseudo-methods,
    /// the name itself otherwise.
    pub fn effective_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.resolve_pseudo(name)
            .map(|(_, spec)| spec.name())
            .unwrap_or(name)
    }
}
