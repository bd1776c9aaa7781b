//! ChecksumedRepository against a recording executor: what reaches the engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use checksumed_storage::{
    ChecksumOptions, ChecksumedRepository, FieldDefinition, FieldKind, Filter, Lookup,
    ModelSchema, Query, QueryExecutor, Row, SchemaBuilder, StorageError, Value, digest,
};

const URL: &str = "http://AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const URL_CHECKSUM: &str = "7aea54fe73fda6bca28f47ea57f1af1a6bc7b28ef323a3b85763131baad46e8e";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Fetch(Query),
    Insert(Row),
    Update(Value, Row),
}

#[derive(Default, Clone)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_writes: bool,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for Recorder {
    async fn initialize(&self, _schema: &ModelSchema) -> Result<(), StorageError> {
        Ok(())
    }

    async fn fetch(&self, _schema: &ModelSchema, query: Query) -> Result<Vec<Row>, StorageError> {
        self.calls.lock().unwrap().push(Call::Fetch(query));
        Ok(Vec::new())
    }

    async fn insert(&self, _schema: &ModelSchema, row: &Row) -> Result<Value, StorageError> {
        self.calls.lock().unwrap().push(Call::Insert(row.clone()));
        if self.fail_writes {
            return Err(StorageError::StorageError("disk full".to_string()));
        }
        Ok(Value::Int(1))
    }

    async fn update(
        &self,
        _schema: &ModelSchema,
        key: &Value,
        changes: &Row,
    ) -> Result<u64, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Update(key.clone(), changes.clone()));
        Ok(1)
    }
}

fn schema() -> Arc<ModelSchema> {
    SchemaBuilder::new("urls")
        .key("id")
        .field(FieldDefinition::new("url", FieldKind::Text).required())
        .unwrap()
        .field(FieldDefinition::new("note", FieldKind::Text))
        .unwrap()
        .checksum("url", ChecksumOptions::default())
        .unwrap()
        .build()
        .unwrap()
        .into_shared()
}

fn repository(recorder: &Recorder) -> ChecksumedRepository<Recorder> {
    ChecksumedRepository::new(recorder.clone(), schema())
}

#[tokio::test]
async fn first_and_all_query_by_checksum() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    urls.first([("url", URL)]).await.unwrap();
    urls.all([("url", URL)]).await.unwrap();

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    for call in calls {
        let Call::Fetch(query) = call else {
            panic!("expected a fetch");
        };
        assert_eq!(query.table, "urls");
        assert_eq!(
            query.filters,
            vec![Filter::Eq(
                "url_checksum".to_string(),
                Value::from(URL_CHECKSUM)
            )]
        );
    }
}

#[tokio::test]
async fn unchecksumed_predicates_pass_through() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    urls.all(Lookup::equals([
        ("id", Value::Int(2)),
        ("url", Value::from(URL)),
    ]))
    .await
    .unwrap();

    let Call::Fetch(query) = &recorder.calls()[0] else {
        panic!("expected a fetch");
    };
    assert!(query.filters.contains(&Filter::Eq("id".to_string(), Value::Int(2))));
    assert!(query.filters.iter().all(|f| f.field() != "url"));
}

#[tokio::test]
async fn structured_queries_are_not_rewritten() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    let query = Query::new("urls").eq("url", URL);
    urls.all(query.clone()).await.unwrap();
    urls.all(Lookup::Unfiltered).await.unwrap();

    let calls = recorder.calls();
    let Call::Fetch(sent) = &calls[0] else {
        panic!("expected a fetch");
    };
    assert_eq!(sent.filters, query.filters);
    let Call::Fetch(unfiltered) = &calls[1] else {
        panic!("expected a fetch");
    };
    assert!(unfiltered.filters.is_empty());
}

#[tokio::test]
async fn insert_carries_checksum() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    let resource = urls.create([("url", URL)]).await.unwrap();
    assert!(!resource.is_new());
    assert_eq!(resource.key(), Some(&Value::Int(1)));

    let Call::Insert(row) = &recorder.calls()[0] else {
        panic!("expected an insert");
    };
    assert_eq!(row.get("url_checksum"), Some(&Value::from(URL_CHECKSUM)));
}

#[tokio::test]
async fn update_sends_only_changed_attributes() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    let mut resource = urls.create([("url", URL)]).await.unwrap();

    resource.set("note", "unrelated").unwrap();
    assert!(urls.save(&mut resource).await.unwrap());

    resource.set("url", "http://quix.com/").unwrap();
    assert!(urls.save(&mut resource).await.unwrap());

    assert!(!urls.save(&mut resource).await.unwrap());

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3);
    let Call::Update(key, changes) = &calls[1] else {
        panic!("expected an update");
    };
    assert_eq!(key, &Value::Int(1));
    assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["note"]);

    let Call::Update(_, changes) = &calls[2] else {
        panic!("expected an update");
    };
    assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["url", "url_checksum"]);
    assert_eq!(
        changes.get("url_checksum"),
        Some(&Value::from(digest("http://quix.com/").unwrap()))
    );
}

#[tokio::test]
async fn failed_save_leaves_record_untouched() {
    let recorder = Recorder {
        fail_writes: true,
        ..Recorder::default()
    };
    let urls = repository(&recorder);

    let mut resource = urls.new_resource();
    resource.set("url", URL).unwrap();
    assert!(urls.save(&mut resource).await.is_err());

    assert!(resource.is_new());
    assert!(resource.key().is_none());
    assert!(!resource.values().contains_key("url_checksum"));
}

#[tokio::test]
async fn conversion_failure_aborts_before_engine() {
    let recorder = Recorder::default();
    let urls = repository(&recorder);

    let mut resource = urls.new_resource();
    resource.set("url", Value::Bytes(vec![0xff])).unwrap();
    let err = urls.save(&mut resource).await.unwrap_err();

    assert!(matches!(err, StorageError::AttributeConversion { attribute, .. } if attribute == "url"));
    assert!(recorder.calls().is_empty());
}
