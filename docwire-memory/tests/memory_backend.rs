use bson::doc;
use docwire_core::{
    backend::{Backend, BackendBuilder, Collection, CreateCollectionParams, QueryParams},
    context::Context,
    contract::ContractBackend,
    document::Document,
    error::{DocWireError, ErrorCode},
    iterator::DocumentIterator,
    value::Value,
};
use docwire_memory::MemoryBackend;
use docwire_query::{Evaluator, Pipeline};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn d(bson: bson::Document) -> Document {
    Document::try_from(bson).unwrap()
}

fn ids(docs: &[Document]) -> Vec<i32> {
    docs.iter().map(|doc| doc["_id"].as_i32().unwrap()).collect()
}

async fn collection(backend: &MemoryBackend, name: &str) -> Box<dyn Collection> {
    let ctx = Context::background();
    backend.database(&ctx, "test").await.unwrap().collection(&ctx, name).await.unwrap()
}

#[tokio::test]
async fn insert_query_update_delete() {
    init_tracing();
    let ctx = Context::background();
    let backend = MemoryBackend::builder().build().await.unwrap();
    let coll = collection(&backend, "items").await;

    let res = coll
        .insert_all(&ctx, vec![d(doc! { "_id": 2, "v": "b" }), d(doc! { "_id": 1, "v": "a" })])
        .await
        .unwrap();
    assert_eq!(res.inserted_count, 2);

    let all = coll.query(&ctx, QueryParams::new()).await.unwrap();
    assert!(!all.filter_pushdown);
    assert_eq!(ids(&all.iter.collect(&ctx).await.unwrap()), vec![2, 1]);

    let updated = coll
        .update_all(&ctx, vec![d(doc! { "_id": 1, "v": "z" }), d(doc! { "_id": 9 })])
        .await
        .unwrap();
    assert_eq!(updated.updated_count, 1);

    let one = coll.query(&ctx, QueryParams::new().filter(d(doc! { "_id": 1 }))).await.unwrap();
    assert!(one.filter_pushdown);
    assert_eq!(one.iter.collect(&ctx).await.unwrap(), vec![d(doc! { "_id": 1, "v": "z" })]);

    let deleted = coll.delete_all(&ctx, vec![Value::Int32(2), Value::Int32(7)]).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);
    assert_eq!(backend.list_databases(&ctx).await.unwrap(), vec!["test".to_string()]);
}

#[tokio::test]
async fn duplicate_key_keeps_earlier_documents() {
    let ctx = Context::background();
    let backend = MemoryBackend::new();
    let coll = collection(&backend, "items").await;

    coll.insert_all(&ctx, vec![d(doc! { "_id": 1 })]).await.unwrap();
    let err = coll
        .insert_all(&ctx, vec![d(doc! { "_id": 2 }), d(doc! { "_id": 1 }), d(doc! { "_id": 3 })])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateKey);

    let docs = coll.query(&ctx, QueryParams::new()).await.unwrap().iter.collect(&ctx).await.unwrap();
    assert_eq!(ids(&docs), vec![1, 2]);
}

#[tokio::test]
async fn collection_lifecycle() {
    let ctx = Context::background();
    let backend = MemoryBackend::builder()
        .collection("test", CreateCollectionParams::new("log").capped(4096, Some(10)))
        .build()
        .await
        .unwrap();
    let db = backend.database(&ctx, "test").await.unwrap();

    db.create_collection(&ctx, CreateCollectionParams::new("plain")).await.unwrap();
    let err = db.create_collection(&ctx, CreateCollectionParams::new("plain")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceExists);

    let infos = db.list_collections(&ctx).await.unwrap();
    let names: Vec<&str> = infos.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, vec!["log", "plain"]);
    assert!(infos[0].is_capped());
    assert!(!infos[1].is_capped());

    db.drop_collection(&ctx, "plain").await.unwrap();
    let err = db.drop_collection(&ctx, "plain").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceNotFound);

    db.drop_collection(&ctx, "log").await.unwrap();
    assert!(backend.list_databases(&ctx).await.unwrap().is_empty());

    let err = backend.drop_database(&ctx, "test").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceNotFound);
}

#[tokio::test]
async fn missing_collection_reads_empty() {
    let ctx = Context::background();
    let backend = MemoryBackend::new();
    let coll = collection(&backend, "nothing").await;

    let docs = coll.query(&ctx, QueryParams::new()).await.unwrap().iter.collect(&ctx).await.unwrap();
    assert!(docs.is_empty());
    assert_eq!(coll.delete_all(&ctx, vec![Value::Int32(1)]).await.unwrap().deleted_count, 0);
    assert!(backend.list_databases(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn tail_iterator_follows_inserts() {
    let ctx = Context::background();
    let backend = MemoryBackend::builder()
        .collection("test", CreateCollectionParams::new("log").capped(1 << 20, Some(100)))
        .build()
        .await
        .unwrap();
    let coll = collection(&backend, "log").await;

    coll.insert_all(&ctx, vec![d(doc! { "_id": 1 })]).await.unwrap();
    let mut iter = coll.query(&ctx, QueryParams::new().tailable(true)).await.unwrap().iter;

    let (index, first) = iter.next(&ctx).await.unwrap().unwrap();
    assert_eq!((index, first), (0, d(doc! { "_id": 1 })));
    assert!(iter.next(&ctx).await.unwrap().is_none());

    coll.insert_all(&ctx, vec![d(doc! { "_id": 2 })]).await.unwrap();
    let (index, second) = iter.next(&ctx).await.unwrap().unwrap();
    assert_eq!((index, second), (1, d(doc! { "_id": 2 })));
}

#[tokio::test]
async fn tailable_requires_capped() {
    let ctx = Context::background();
    let backend = MemoryBackend::new();
    let coll = collection(&backend, "plain").await;
    coll.insert_all(&ctx, vec![d(doc! { "_id": 1 })]).await.unwrap();

    let err = coll.query(&ctx, QueryParams::new().tailable(true)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadValue);
}

#[tokio::test]
async fn explain_reports_plan() {
    let ctx = Context::background();
    let backend = MemoryBackend::new();
    let coll = collection(&backend, "items").await;
    coll.insert_all(&ctx, vec![d(doc! { "_id": 1 }), d(doc! { "_id": 2 })]).await.unwrap();

    let lookup = coll.explain(&ctx, QueryParams::new().filter(d(doc! { "_id": 1 }))).await.unwrap();
    assert!(lookup.filter_pushdown);
    assert_eq!(lookup.query_plan.get("stage"), Some(&Value::from("IDHACK")));
    assert_eq!(lookup.query_plan.get("documents"), Some(&Value::Int64(2)));

    let scan = coll.explain(&ctx, QueryParams::new().filter(d(doc! { "_id": { "$gt": 1 } }))).await.unwrap();
    assert!(!scan.filter_pushdown);
    assert_eq!(scan.query_plan.get("stage"), Some(&Value::from("COLLSCAN")));
}

#[tokio::test]
async fn contract_wrapper_rejects_bad_input() {
    let ctx = Context::background();
    let backend = ContractBackend::new(MemoryBackend::new());

    let err = backend.database(&ctx, "bad name").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidNamespace);

    let db = backend.database(&ctx, "test").await.unwrap();
    let err = db.collection(&ctx, "system.users").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidNamespace);

    let coll = db.collection(&ctx, "items").await.unwrap();
    let err = coll.insert_all(&ctx, vec![d(doc! { "_id": 1, "$bad": 1 })]).await.unwrap_err();
    assert!(matches!(err, DocWireError::Validation(_)));
}

#[tokio::test]
async fn pipeline_reapplies_filter_and_sort() {
    let ctx = Context::background();
    let backend = MemoryBackend::new();
    let coll = collection(&backend, "items").await;
    let docs: Vec<Document> = (0..6).map(|i| d(doc! { "_id": i, "v": (i % 3) })).collect();
    coll.insert_all(&ctx, docs).await.unwrap();

    let evaluator = Evaluator::new().unwrap();
    let filter = d(doc! { "v": { "$gte": 1 } });
    let sort = d(doc! { "v": -1, "_id": 1 });

    let result = coll
        .query(&ctx, QueryParams::new().filter(filter.clone()).sort(sort.clone()))
        .await
        .unwrap();
    let pipeline = Pipeline {
        filter: Some(evaluator.compile_filter(&filter).unwrap()),
        sort: Some(docwire_query::sort::SortSpec::compile(&sort).unwrap()),
        ..Default::default()
    };

    let iter = pipeline.wrap(result.iter, result.filter_pushdown, result.sort_pushdown);
    assert_eq!(ids(&iter.collect(&ctx).await.unwrap()), vec![2, 5, 1, 4]);
}
