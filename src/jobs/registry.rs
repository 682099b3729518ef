//! The registry mapping job names to jobs.
use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EphysError;
use crate::jobs::cache::JobCache;
use crate::jobs::{builtin, Job, JobContext, JobSignature};

/// A job invocation, as found in batch files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Jobs indexed by name.
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Box<dyn Job>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with all built-in jobs.
    pub fn with_builtins() -> Result<Self, EphysError> {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register a job. The function returns an error if a job with the same name exists.
    pub fn register<J: Job + 'static>(&mut self, job: J) -> Result<(), EphysError> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(EphysError::InvalidParameter(format!(
                "a job named {} is already registered",
                name
            )));
        }
        log::debug!("Registered job {} (version {})", name, job.version());
        self.jobs.insert(name, Box::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Job> {
        self.jobs.get(name).map(|job| job.as_ref())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The signatures of all registered jobs, ordered by name.
    pub fn signatures(&self) -> Vec<JobSignature> {
        self.jobs.values().map(|job| job.signature()).collect()
    }

    /// Run a job by name.
    ///
    /// If the context has a cache, a cached result for the same name, version, arguments and
    /// relevant context is returned without running the job. Successful results are cached,
    /// failures are not.
    pub fn run(&self, name: &str, args: Value, ctx: &JobContext) -> Result<Value, EphysError> {
        let job = self
            .get(name)
            .ok_or_else(|| EphysError::UnknownJob(name.to_string()))?;

        let Some(cache) = ctx.cache else {
            log::info!("Running job {} (version {})", name, job.version());
            return job.run(ctx, args);
        };

        let context = job.context_key(ctx)?;
        let key = JobCache::key(name, job.version(), &args, context.as_ref())?;
        if let Some(result) = cache.get(&key)? {
            log::info!("Job {} (version {}): cache hit", name, job.version());
            return Ok(result);
        }
        log::info!("Running job {} (version {})", name, job.version());
        let result = job.run(ctx, args)?;
        cache.put(&key, &result)?;
        Ok(result)
    }

    /// Run independent jobs in parallel. Results are returned in the order of the calls.
    pub fn run_batch(&self, calls: &[JobCall], ctx: &JobContext) -> Vec<Result<Value, EphysError>> {
        calls
            .par_iter()
            .map(|call| self.run(&call.name, call.args.clone(), ctx))
            .collect()
    }
}
