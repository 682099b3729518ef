//! Named, versioned processing functions.
//!
//! Jobs are registered explicitly in a [`JobRegistry`](registry::JobRegistry) and invoked by name
//! with JSON arguments. Every invocation receives a [`JobContext`] holding the configuration it
//! may depend on (content store, optional result cache, snippet parameters), so that no state is
//! shared implicitly between calls.
//!
//! # Examples
//!
//! ```
//! use rusty_ephys::core::snippets::SnippetConfig;
//! use rusty_ephys::error::EphysError;
//! use rusty_ephys::jobs::registry::JobRegistry;
//! use rusty_ephys::jobs::{FunctionJob, JobContext};
//! use rusty_ephys::storage::content::ContentStore;
//! use serde_json::json;
//!
//! fn double(_ctx: &JobContext, x: f64) -> Result<f64, EphysError> {
//!     Ok(2.0 * x)
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register(FunctionJob::new("double", "0.1.0", double)).unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ContentStore::new(dir.path()).unwrap();
//! let snippets = SnippetConfig::default();
//! let ctx = JobContext::new(&registry, &store, &snippets);
//! assert_eq!(ctx.run("double", json!(1.5)).unwrap(), json!(3.0));
//! ```
use std::any::type_name;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::snippets::SnippetConfig;
use crate::error::EphysError;
use crate::storage::content::ContentStore;

pub mod builtin;
pub mod cache;
pub mod registry;

use cache::JobCache;
use registry::JobRegistry;

/// The name, version and declared input/output types of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSignature {
    pub name: String,
    pub version: String,
    pub input: String,
    pub output: String,
}

/// A processing function callable by name with JSON arguments.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Results of different versions of a job are cached separately.
    fn version(&self) -> &str;

    fn signature(&self) -> JobSignature;

    /// The part of the context the result depends on, hashed with the arguments when the result
    /// is cached. Jobs which only depend on their arguments return `None`.
    fn context_key(&self, _ctx: &JobContext) -> Result<Option<Value>, EphysError> {
        Ok(None)
    }

    /// Run the job. The function returns an error if the arguments do not match the job input.
    fn run(&self, ctx: &JobContext, args: Value) -> Result<Value, EphysError>;
}

/// The typed function behind a [`FunctionJob`].
pub type JobFn<I, O> = fn(&JobContext, I) -> Result<O, EphysError>;

/// Extracts the part of the context a [`FunctionJob`] depends on.
pub type ContextFn = fn(&JobContext) -> Result<Value, EphysError>;

/// A job backed by a plain function with typed (serde) input and output.
pub struct FunctionJob<I, O> {
    name: String,
    version: String,
    function: JobFn<I, O>,
    context: Option<ContextFn>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> FunctionJob<I, O> {
    pub fn new(name: &str, version: &str, function: JobFn<I, O>) -> Self {
        FunctionJob {
            name: name.to_string(),
            version: version.to_string(),
            function,
            context: None,
            _types: PhantomData,
        }
    }

    /// Declare the part of the context the function reads, so that cached results are not
    /// shared between different contexts.
    pub fn with_context(self, context: ContextFn) -> Self {
        FunctionJob {
            context: Some(context),
            ..self
        }
    }
}

impl<I, O> Job for FunctionJob<I, O>
where
    I: DeserializeOwned,
    O: Serialize,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn signature(&self) -> JobSignature {
        JobSignature {
            name: self.name.clone(),
            version: self.version.clone(),
            input: type_name::<I>().to_string(),
            output: type_name::<O>().to_string(),
        }
    }

    fn context_key(&self, ctx: &JobContext) -> Result<Option<Value>, EphysError> {
        self.context.map(|context| context(ctx)).transpose()
    }

    fn run(&self, ctx: &JobContext, args: Value) -> Result<Value, EphysError> {
        let input: I = serde_json::from_value(args).map_err(|e| EphysError::InvalidJobArguments {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        let output = (self.function)(ctx, input)?;
        Ok(serde_json::to_value(output)?)
    }
}

/// The configuration of a job invocation.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub registry: &'a JobRegistry,
    pub store: &'a ContentStore,
    pub cache: Option<&'a JobCache>,
    pub snippets: &'a SnippetConfig,
}

impl<'a> JobContext<'a> {
    /// A context without result cache.
    pub fn new(registry: &'a JobRegistry, store: &'a ContentStore, snippets: &'a SnippetConfig) -> Self {
        JobContext {
            registry,
            store,
            cache: None,
            snippets,
        }
    }

    pub fn with_cache(self, cache: &'a JobCache) -> Self {
        JobContext {
            cache: Some(cache),
            ..self
        }
    }

    /// Run a job of the registry within this context.
    pub fn run(&self, name: &str, args: Value) -> Result<Value, EphysError> {
        self.registry.run(name, args, self)
    }

    /// Run a job with typed arguments and output.
    pub fn call<I: Serialize, O: DeserializeOwned>(&self, name: &str, args: &I) -> Result<O, EphysError> {
        let output = self.run(name, serde_json::to_value(args)?)?;
        Ok(serde_json::from_value(output)?)
    }
}
