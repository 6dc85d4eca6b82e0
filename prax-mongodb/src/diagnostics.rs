//! Provider diagnostics.
//!
//! Every event the provider reports is a struct wrapped in [`LogEvent`].
//! Message templates live in a process-wide registry built on first use.
//! Events are delivered through a [`QueryLogger`]; [`TracingQueryLogger`]
//! forwards them to `tracing` and [`RecordingQueryLogger`] keeps them for
//! inspection.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use bson::{Bson, Document};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Information,
    /// Something the user should look at.
    Warning,
}

/// Identity of an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    /// A vector search produced no documents.
    VectorSearchReturnedZeroResults,
    /// A vector search named an index the model does not declare.
    VectorIndexNotDefined,
    /// A query was translated to a pipeline.
    QueryCompiled,
    /// A pipeline is about to be sent to the database.
    ExecutingQuery,
}

impl EventId {
    /// Numeric code of the event.
    pub fn code(&self) -> u32 {
        match self {
            Self::VectorSearchReturnedZeroResults => 30101,
            Self::VectorIndexNotDefined => 30102,
            Self::QueryCompiled => 30201,
            Self::ExecutingQuery => 30202,
        }
    }
}

/// Level and message template of one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    /// Event kind.
    pub id: EventId,
    /// Severity.
    pub level: EventLevel,
    /// Message with `{name}` placeholders.
    pub template: &'static str,
}

static DEFINITIONS: OnceLock<HashMap<EventId, EventDefinition>> = OnceLock::new();

/// The definition of an event kind.
pub fn definition(id: EventId) -> &'static EventDefinition {
    let definitions = DEFINITIONS.get_or_init(|| {
        [
            EventDefinition {
                id: EventId::VectorSearchReturnedZeroResults,
                level: EventLevel::Warning,
                template: "The vector search on '{path}' in collection '{collection}' using index '{index}' returned zero results. Check that the index exists, has finished building and uses the expected dimensions and similarity.",
            },
            EventDefinition {
                id: EventId::VectorIndexNotDefined,
                level: EventLevel::Warning,
                template: "The vector index '{index}' for '{path}' is not defined on entity type '{entity}'. The query will be sent to the server as written.",
            },
            EventDefinition {
                id: EventId::QueryCompiled,
                level: EventLevel::Debug,
                template: "Compiled query against '{collection}': {pipeline}",
            },
            EventDefinition {
                id: EventId::ExecutingQuery,
                level: EventLevel::Information,
                template: "Executing query against '{collection}' with parameters [{parameters}]: {pipeline}",
            },
        ]
        .into_iter()
        .map(|d| (d.id, d))
        .collect()
    });
    // Every id is registered above.
    &definitions[&id]
}

fn render(template: &str, args: &[(&str, &str)]) -> String {
    let mut message = template.to_string();
    for (name, value) in args {
        message = message.replace(&format!("{{{}}}", name), value);
    }
    message
}

/// Render a pipeline as relaxed extended JSON.
pub fn pipeline_to_json(pipeline: &[Document]) -> String {
    Bson::Array(pipeline.iter().cloned().map(Bson::Document).collect())
        .into_relaxed_extjson()
        .to_string()
}

/// A vector search produced no documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSearchReturnedZeroResults {
    /// Collection searched.
    pub collection: SmolStr,
    /// Index used.
    pub index_name: SmolStr,
    /// Dotted path of the searched vector field.
    pub path: String,
}

/// A named vector index is not declared in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndexNotDefined {
    /// Entity type searched.
    pub entity_type: SmolStr,
    /// Requested index.
    pub index_name: SmolStr,
    /// Dotted property path of the searched vector.
    pub path: String,
}

/// A query was translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCompiled {
    /// Target collection.
    pub collection: SmolStr,
    /// Pipeline as JSON.
    pub pipeline: String,
}

/// A query is being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutingQuery {
    /// Target collection.
    pub collection: SmolStr,
    /// Pipeline as JSON.
    pub pipeline: String,
    /// Parameter values, present only with sensitive data logging.
    pub parameters: Option<String>,
}

/// Any provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// See [`VectorSearchReturnedZeroResults`].
    VectorSearchReturnedZeroResults(VectorSearchReturnedZeroResults),
    /// See [`VectorIndexNotDefined`].
    VectorIndexNotDefined(VectorIndexNotDefined),
    /// See [`QueryCompiled`].
    QueryCompiled(QueryCompiled),
    /// See [`ExecutingQuery`].
    ExecutingQuery(ExecutingQuery),
}

impl LogEvent {
    /// Event kind.
    pub fn id(&self) -> EventId {
        match self {
            Self::VectorSearchReturnedZeroResults(_) => EventId::VectorSearchReturnedZeroResults,
            Self::VectorIndexNotDefined(_) => EventId::VectorIndexNotDefined,
            Self::QueryCompiled(_) => EventId::QueryCompiled,
            Self::ExecutingQuery(_) => EventId::ExecutingQuery,
        }
    }

    /// Severity.
    pub fn level(&self) -> EventLevel {
        definition(self.id()).level
    }

    /// Rendered message.
    pub fn message(&self) -> String {
        let template = definition(self.id()).template;
        match self {
            Self::VectorSearchReturnedZeroResults(e) => render(
                template,
                &[
                    ("path", &e.path),
                    ("collection", &e.collection),
                    ("index", &e.index_name),
                ],
            ),
            Self::VectorIndexNotDefined(e) => render(
                template,
                &[
                    ("index", &e.index_name),
                    ("path", &e.path),
                    ("entity", &e.entity_type),
                ],
            ),
            Self::QueryCompiled(e) => render(
                template,
                &[("collection", &e.collection), ("pipeline", &e.pipeline)],
            ),
            Self::ExecutingQuery(e) => render(
                template,
                &[
                    ("collection", &e.collection),
                    ("parameters", e.parameters.as_deref().unwrap_or("?")),
                    ("pipeline", &e.pipeline),
                ],
            ),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Receives provider events.
pub trait QueryLogger: Send + Sync {
    /// Deliver one event.
    fn log(&self, event: LogEvent);

    /// A vector search produced no documents.
    fn vector_search_returned_zero_results(&self, collection: &str, index_name: &str, path: &str) {
        self.log(LogEvent::VectorSearchReturnedZeroResults(
            VectorSearchReturnedZeroResults {
                collection: SmolStr::new(collection),
                index_name: SmolStr::new(index_name),
                path: path.to_string(),
            },
        ));
    }

    /// A named vector index is not declared in the model.
    fn vector_index_not_defined(&self, entity_type: &str, index_name: &str, path: &str) {
        self.log(LogEvent::VectorIndexNotDefined(VectorIndexNotDefined {
            entity_type: SmolStr::new(entity_type),
            index_name: SmolStr::new(index_name),
            path: path.to_string(),
        }));
    }

    /// A query was translated.
    fn query_compiled(&self, collection: &str, pipeline: &[Document]) {
        self.log(LogEvent::QueryCompiled(QueryCompiled {
            collection: SmolStr::new(collection),
            pipeline: pipeline_to_json(pipeline),
        }));
    }

    /// A query is being executed.
    fn executing_query(&self, collection: &str, pipeline: &[Document], parameters: Option<String>) {
        self.log(LogEvent::ExecutingQuery(ExecutingQuery {
            collection: SmolStr::new(collection),
            pipeline: pipeline_to_json(pipeline),
            parameters,
        }));
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingQueryLogger;

impl QueryLogger for TracingQueryLogger {
    fn log(&self, event: LogEvent) {
        let code = event.id().code();
        let message = event.message();
        match event.level() {
            EventLevel::Debug => debug!(event_id = code, "{}", message),
            EventLevel::Information => info!(event_id = code, "{}", message),
            EventLevel::Warning => warn!(event_id = code, "{}", message),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingQueryLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingQueryLogger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind.
    pub fn events_of(&self, id: EventId) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.id() == id)
            .cloned()
            .collect()
    }

    /// Drop recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl QueryLogger for RecordingQueryLogger {
    fn log(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_definitions_registered() {
        for id in [
            EventId::VectorSearchReturnedZeroResults,
            EventId::VectorIndexNotDefined,
            EventId::QueryCompiled,
            EventId::ExecutingQuery,
        ] {
            assert_eq!(definition(id).id, id);
        }
        assert_eq!(
            definition(EventId::VectorIndexNotDefined).level,
            EventLevel::Warning
        );
    }

    #[test]
    fn test_recording_logger() {
        let logger = RecordingQueryLogger::new();
        logger.vector_index_not_defined("Movie", "plots", "PlotEmbedding");
        logger.query_compiled("movies", &[doc! { "$limit": 1_i64 }]);

        let warnings = logger.events_of(EventId::VectorIndexNotDefined);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].message(),
            "The vector index 'plots' for 'PlotEmbedding' is not defined on entity type 'Movie'. The query will be sent to the server as written."
        );
        assert_eq!(logger.events().len(), 2);

        logger.clear();
        assert!(logger.events().is_empty());
    }

    #[test]
    fn test_parameters_hidden_without_sensitive_logging() {
        let event = LogEvent::ExecutingQuery(ExecutingQuery {
            collection: "movies".into(),
            pipeline: "[]".into(),
            parameters: None,
        });
        assert!(event.message().contains("parameters [?]"));
    }

    #[test]
    fn test_pipeline_json() {
        let json = pipeline_to_json(&[doc! { "$match": { "Year": 2000 } }]);
        assert_eq!(json, r#"[{"$match":{"Year":2000}}]"#);
    }
}
