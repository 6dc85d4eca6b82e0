//! Query execution.
//!
//! [`QueryExecutor`] ties the pieces together: it compiles (or fetches from
//! the cache) a query, binds the parameters of one execution, runs the
//! pipeline through a [`DocumentSource`] and shapes every result document.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use prax_model::Model;
use prax_query::{
    Expr, ParameterValues, QueryContext, QueryError, QueryOperator, QueryResult,
    ResultCardinality, TypeRef, Value,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cache::{CompiledQuery, QueryCache};
use crate::config::ProviderOptions;
use crate::context::{MaterializationContext, QueryOutput};
use crate::diagnostics::{QueryLogger, TracingQueryLogger, pipeline_to_json};
use crate::source::DocumentSource;
use crate::translate::NativeQuery;

/// Detects overlapping use of a session.
#[derive(Debug, Default)]
pub struct ConcurrencyDetector {
    in_use: AtomicBool,
}

impl ConcurrencyDetector {
    /// Create an idle detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session busy until the guard is dropped.
    pub fn enter(&self) -> QueryResult<ConcurrencyGuard<'_>> {
        self.in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| QueryError::concurrent_session_use())?;
        Ok(ConcurrencyGuard { detector: self })
    }

    /// Check if an operation is in progress.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Marks a session busy while alive.
#[derive(Debug)]
pub struct ConcurrencyGuard<'a> {
    detector: &'a ConcurrencyDetector,
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.detector.in_use.store(false, Ordering::Release);
    }
}

/// A unit of work that runs one query at a time.
#[derive(Debug)]
pub struct QuerySession {
    id: Uuid,
    detector: ConcurrencyDetector,
    thread_safety_checks: bool,
}

impl QuerySession {
    /// Create a session.
    pub fn new(thread_safety_checks: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            detector: ConcurrencyDetector::new(),
            thread_safety_checks,
        }
    }

    /// Session identifier, as it appears in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's detector.
    pub fn detector(&self) -> &ConcurrencyDetector {
        &self.detector
    }

    fn enter(&self) -> QueryResult<Option<ConcurrencyGuard<'_>>> {
        if !self.thread_safety_checks {
            return Ok(None);
        }
        self.detector.enter().map(Some)
    }
}

impl Default for QuerySession {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Compiles, runs and shapes queries against one model.
pub struct QueryExecutor {
    model: Arc<Model>,
    source: Arc<dyn DocumentSource>,
    cache: QueryCache,
    options: ProviderOptions,
    logger: Arc<dyn QueryLogger>,
}

impl QueryExecutor {
    /// Create an executor with default options, logging through `tracing`.
    pub fn new(model: Arc<Model>, source: Arc<dyn DocumentSource>) -> Self {
        let options = ProviderOptions::default();
        Self {
            model,
            source,
            cache: QueryCache::new(options.query_cache_capacity),
            options,
            logger: Arc::new(TracingQueryLogger),
        }
    }

    /// Replace the provider options. Resets the compiled query cache.
    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.cache = QueryCache::new(options.query_cache_capacity);
        self.options = options;
        self
    }

    /// Replace the event logger.
    pub fn with_logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// The model queries run against.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Provider options in effect.
    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// The compiled query cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Open a session honoring the configured thread safety checks.
    pub fn session(&self) -> QuerySession {
        QuerySession::new(self.options.thread_safety_checks)
    }

    /// Compile a query, reusing a cached compilation when available.
    pub fn compile(&self, expr: &Expr) -> QueryResult<Arc<CompiledQuery>> {
        self.cache.get_or_compile(&self.model, expr)
    }

    /// Translate a query for the given parameters without running it.
    pub fn translate(&self, expr: &Expr, parameters: ParameterValues) -> QueryResult<NativeQuery> {
        let compiled = self.compile(expr)?;
        compiled.translate(&self.context(parameters), self.logger.as_ref())
    }

    /// Compile and run a query.
    pub async fn execute(
        &self,
        session: &QuerySession,
        expr: &Expr,
        parameters: ParameterValues,
    ) -> QueryResult<QueryOutput> {
        let compiled = self.compile(expr)?;
        self.execute_compiled(session, &compiled, parameters).await
    }

    /// Run a compiled query.
    #[instrument(skip_all, fields(session = %session.id(), collection = %compiled.query().collection))]
    pub async fn execute_compiled(
        &self,
        session: &QuerySession,
        compiled: &CompiledQuery,
        parameters: ParameterValues,
    ) -> QueryResult<QueryOutput> {
        let _guard = session.enter()?;

        let context = self.context(parameters);
        let native = compiled.translate(&context, self.logger.as_ref())?;
        if self.options.log_queries {
            let parameters = context
                .sensitive_data_logging
                .then(|| format_parameters(&context.parameters));
            self.logger
                .executing_query(&native.collection, &native.pipeline, parameters);
        }

        let documents = self
            .source
            .aggregate(&native.collection, native.pipeline.clone())
            .await
            .map_err(|err| {
                let err = err.with_context(format!("Running pipeline on `{}`", native.collection));
                if context.sensitive_data_logging {
                    err.with_pipeline(pipeline_to_json(&native.pipeline))
                } else {
                    err
                }
            })?;
        debug!(documents = documents.len(), "Pipeline returned");
        if documents.is_empty() {
            if let Some(target) = &native.vector_search {
                self.logger.vector_search_returned_zero_results(
                    &native.collection,
                    &target.index_name,
                    &target.path,
                );
            }
        }

        let mut ctx = MaterializationContext::new(self.model.clone(), context.parameters);
        let mut values = Vec::with_capacity(documents.len());
        for document in &documents {
            values.push(compiled.shaper().shape(&mut ctx, document)?);
        }
        let result = reduce(&native, compiled.shaper().result_type(), values)?;

        Ok(QueryOutput {
            result,
            context: ctx,
        })
    }

    fn context(&self, parameters: ParameterValues) -> QueryContext {
        QueryContext::new(parameters).with_sensitive_data_logging(self.options.sensitive_data_logging)
    }
}

fn format_parameters(parameters: &ParameterValues) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turn the shaped documents into the query's result.
fn reduce(native: &NativeQuery, result_type: &TypeRef, mut values: Vec<Value>) -> QueryResult<Value> {
    if native.cardinality == ResultCardinality::Enumerable {
        return Ok(Value::List(values));
    }
    let operator = native.result_operator.as_ref();
    if values.len() > 1
        && matches!(
            operator,
            Some(QueryOperator::Single | QueryOperator::SingleOrDefault)
        )
    {
        return Err(QueryError::more_than_one_element());
    }
    if values.is_empty() {
        return empty_result(operator, native.cardinality, result_type);
    }
    Ok(values.swap_remove(0))
}

/// Result of a single-valued query over no documents.
fn empty_result(
    operator: Option<&QueryOperator>,
    cardinality: ResultCardinality,
    result_type: &TypeRef,
) -> QueryResult<Value> {
    match operator {
        Some(QueryOperator::Count) => Ok(Value::Int32(0)),
        Some(QueryOperator::LongCount) => Ok(Value::Int64(0)),
        Some(QueryOperator::Any | QueryOperator::Contains) => Ok(Value::Bool(false)),
        Some(QueryOperator::All) => Ok(Value::Bool(true)),
        Some(QueryOperator::Sum) => Ok(result_type
            .scalar_kind()
            .map(|kind| Value::default_for(kind, false))
            .unwrap_or(Value::Null)),
        Some(QueryOperator::Average | QueryOperator::Min | QueryOperator::Max) => {
            if result_type.is_nullable() {
                Ok(Value::Null)
            } else {
                Err(QueryError::no_elements())
            }
        }
        _ if cardinality == ResultCardinality::SingleOrDefault => Ok(match result_type {
            TypeRef::Scalar { kind, nullable } => Value::default_for(*kind, *nullable),
            _ => Value::Null,
        }),
        _ => Err(QueryError::no_elements()),
    }
}
