//! Integration tests for query capture and pipeline translation.
//!
//! These tests drive the public facade end to end:
//! - Operator chains captured into a provider query expression
//! - Aggregation pipelines produced for each terminal operator
//! - Vector search index resolution
//! - Compiled query caching

use std::sync::Arc;

use bson::doc;
use prax_docdb::model::{ModelBuilder, ScalarKind, Similarity};
use prax_docdb::mongodb::{InMemoryDocumentSource, NativeQuery, QueryExecutor};
use prax_docdb::query::{
    ErrorCode, Expr, ParameterValues, QueryBuilder, QueryResult, QueryableMethodCapture,
    ResultCardinality, TypeRef, VectorQueryOptions,
};
use pretty_assertions::assert_eq;

fn model() -> prax_docdb::Model {
    ModelBuilder::new()
        .entity("Movie", |e| {
            e.collection("movies")
                .property("Id", ScalarKind::ObjectId)
                .property("Title", ScalarKind::String)
                .property("Year", ScalarKind::Int32)
                .optional("Rating", ScalarKind::Double)
                .property("Embedding", ScalarKind::Vector)
                .property("PlotEmbedding", ScalarKind::Vector)
                .property("PosterEmbedding", ScalarKind::Vector)
                .key(["Id"])
                .default_vector_index(["Embedding"], 3, Similarity::Cosine)
                .vector_index("plots", ["PlotEmbedding"], 3, Similarity::Cosine)
                .vector_index("plots_dot", ["PlotEmbedding"], 3, Similarity::DotProduct);
        })
        .build()
        .unwrap()
}

fn executor() -> QueryExecutor {
    QueryExecutor::new(Arc::new(model()), Arc::new(InMemoryDocumentSource::new()))
}

fn m() -> Expr {
    Expr::param("m")
}

fn translate(query: &Expr) -> QueryResult<NativeQuery> {
    executor().translate(query, ParameterValues::new())
}

fn search(selector: &str, options: Option<VectorQueryOptions>) -> Expr {
    QueryBuilder::root("Movie")
        .vector_search(
            Expr::lambda("m", m().member(selector)),
            Expr::constant(vec![0.5f64, 0.25, 0.125]),
            Expr::constant(10),
            options,
        )
        .build()
}

#[test]
fn test_captured_expression_is_the_input_chain() {
    let model = model();
    let query = QueryBuilder::root("Movie")
        .filter(Expr::lambda("m", m().member("Year").gte(Expr::constant(1980))))
        .order_by_descending(Expr::lambda("m", m().member("Rating")))
        .skip(Expr::constant(10))
        .take(Expr::constant(10))
        .build();

    let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
    assert_eq!(shaped.query.captured_expression(), Some(&query));
    assert_eq!(shaped.query.collection, "movies");
    assert_eq!(shaped.query.operations.len(), 4);
}

#[test]
fn test_paged_listing_pipeline() {
    let query = QueryBuilder::root("Movie")
        .filter(Expr::lambda("m", m().member("Year").gte(Expr::constant(1980))))
        .order_by_descending(Expr::lambda("m", m().member("Rating")))
        .skip(Expr::constant(10))
        .take(Expr::constant(10))
        .build();

    let native = translate(&query).unwrap();
    assert_eq!(
        native.pipeline,
        vec![
            doc! { "$match": { "Year": { "$gte": 1980 } } },
            doc! { "$sort": { "Rating": -1 } },
            doc! { "$skip": 10_i64 },
            doc! { "$limit": 10_i64 },
        ]
    );
    assert_eq!(native.cardinality, ResultCardinality::Enumerable);
}

#[test]
fn test_terminal_operator_cardinality() {
    let cases = [
        (QueryBuilder::root("Movie").first(), ResultCardinality::Single),
        (QueryBuilder::root("Movie").first_or_default(), ResultCardinality::SingleOrDefault),
        (QueryBuilder::root("Movie").single(), ResultCardinality::Single),
        (QueryBuilder::root("Movie").count(), ResultCardinality::Single),
        (QueryBuilder::root("Movie").long_count(), ResultCardinality::Single),
        (QueryBuilder::root("Movie").any(), ResultCardinality::Single),
        (QueryBuilder::root("Movie").build(), ResultCardinality::Enumerable),
    ];
    for (query, expected) in cases {
        assert_eq!(translate(&query).unwrap().cardinality, expected, "{}", query);
    }

    let first = translate(&QueryBuilder::root("Movie").first()).unwrap();
    assert_eq!(first.pipeline, vec![doc! { "$limit": 1_i64 }]);
    let single = translate(&QueryBuilder::root("Movie").single()).unwrap();
    assert_eq!(single.pipeline, vec![doc! { "$limit": 2_i64 }]);
}

#[test]
fn test_scalar_projection_uses_value_alias() {
    let model = model();
    let query = QueryBuilder::root("Movie")
        .select(Expr::lambda("m", m().member("Title")))
        .build();
    let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
    assert_eq!(shaped.query.projection()[0].alias, "_v");

    let native = translate(&query).unwrap();
    assert_eq!(
        native.pipeline,
        vec![doc! { "$project": { "_v": "$Title", "_id": 0 } }]
    );
}

#[test]
fn test_parameters_bind_per_execution() {
    let executor = executor();
    let query = QueryBuilder::root("Movie")
        .filter(Expr::lambda(
            "m",
            m().member("Year")
                .lt(Expr::query_param("__year_0", TypeRef::scalar(ScalarKind::Int32))),
        ))
        .build();

    for year in [1950, 2020] {
        let native = executor
            .translate(&query, ParameterValues::new().with("__year_0", year))
            .unwrap();
        assert_eq!(native.pipeline, vec![doc! { "$match": { "Year": { "$lt": year } } }]);
    }
    assert_eq!(executor.cache().len(), 1);

    let err = executor.translate(&query, ParameterValues::new()).unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingParameter);
}

#[test]
fn test_vector_search_resolves_single_index() {
    let native = translate(&search("Embedding", None)).unwrap();
    let body = native.pipeline[0].get_document("$vectorSearch").unwrap();
    assert_eq!(body.get_str("index").unwrap(), "EmbeddingVectorIndex");
    assert_eq!(body.get_str("path").unwrap(), "Embedding");
    assert_eq!(body.get_i64("limit").unwrap(), 10);
    assert_eq!(body.get_i64("numCandidates").unwrap(), 100);
    assert_eq!(
        native.pipeline[1],
        doc! { "$addFields": { "__score": { "$meta": "vectorSearchScore" } } }
    );
}

#[test]
fn test_vector_search_without_index_fails() {
    let err = translate(&search("PosterEmbedding", None)).unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingVectorIndex);
}

#[test]
fn test_vector_search_with_several_indexes_needs_a_name() {
    let err = translate(&search("PlotEmbedding", None)).unwrap_err();
    assert_eq!(err.code, ErrorCode::AmbiguousVectorIndex);
    assert!(err.message.contains("plots"));
    assert!(err.message.contains("plots_dot"));

    let native = translate(&search(
        "PlotEmbedding",
        Some(VectorQueryOptions::new().index("plots_dot")),
    ))
    .unwrap();
    let body = native.pipeline[0].get_document("$vectorSearch").unwrap();
    assert_eq!(body.get_str("index").unwrap(), "plots_dot");
}

#[test]
fn test_exact_search_rejects_candidate_count() {
    let err = translate(&search(
        "Embedding",
        Some(VectorQueryOptions::new().exact().candidates(200)),
    ))
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConflictingVectorOptions);

    let native = translate(&search("Embedding", Some(VectorQueryOptions::new().exact()))).unwrap();
    let body = native.pipeline[0].get_document("$vectorSearch").unwrap();
    assert!(body.get_bool("exact").unwrap());
    assert!(!body.contains_key("numCandidates"));
}

#[test]
fn test_compilation_is_cached_and_idempotent() {
    let executor = executor();
    let query = QueryBuilder::root("Movie")
        .select(Expr::lambda("m", m().member("Title")))
        .first();

    let first = executor.compile(&query).unwrap();
    let second = executor.compile(&query).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(executor.cache().stats().hits, 1);
    assert_eq!(executor.cache().stats().misses, 1);

    let a = executor.translate(&query, ParameterValues::new()).unwrap();
    let b = executor.translate(&query, ParameterValues::new()).unwrap();
    assert_eq!(a.pipeline, b.pipeline);
}
