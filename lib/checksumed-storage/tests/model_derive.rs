//! Schema declaration through `#[derive(Checksumed)]`.

use checksumed_storage::{
    Checksumed, FieldConstraint, FieldDefault, FieldKind, Model, Resource, StorageDatetime,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Checksumed)]
#[model(table = "urls")]
struct Url {
    #[key]
    id: Option<i64>,
    #[checksum]
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Checksumed)]
struct MediaAsset {
    id: Option<i64>,
    #[checksum(unique = false)]
    body: String,
    #[checksum]
    source: Option<String>,
    #[column(index)]
    kind: String,
    size: u64,
    captured_at: Option<StorageDatetime>,
    #[column(skip)]
    #[serde(skip)]
    scratch: Option<String>,
}

const URL: &str = "http://AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const URL_CHECKSUM: &str = "7aea54fe73fda6bca28f47ea57f1af1a6bc7b28ef323a3b85763131baad46e8e";

#[test]
fn declares_unique_checksum_field() {
    let schema = Url::define().unwrap();

    assert_eq!(schema.table(), "urls");
    assert_eq!(schema.key(), "id");
    assert!(schema.is_checksumed("url"));
    assert!(!schema.is_checksumed("id"));
    assert_eq!(Url::CHECKSUMED_ATTRIBUTES, &["url"]);

    let field = schema.field("url_checksum").unwrap();
    assert_eq!(field.kind, FieldKind::FixedString { length: 64 });
    assert!(field.required);
    assert_eq!(field.constraint, FieldConstraint::Unique);
    assert_eq!(
        field.default,
        Some(FieldDefault::ChecksumOf("url".to_string()))
    );
}

#[test]
fn maps_field_types_and_options() {
    let schema = MediaAsset::define().unwrap();

    assert_eq!(schema.table(), "media_assets");
    assert_eq!(schema.key(), "id");
    assert_eq!(schema.field("id").unwrap().kind, FieldKind::Serial);
    assert_eq!(schema.field("size").unwrap().kind, FieldKind::BigInt);
    assert!(schema.field("size").unwrap().required);
    assert_eq!(
        schema.field("captured_at").unwrap().kind,
        FieldKind::Datetime
    );
    assert!(!schema.field("captured_at").unwrap().required);
    assert_eq!(
        schema.field("kind").unwrap().constraint,
        FieldConstraint::Index
    );
    assert!(!schema.has_field("scratch"));

    assert_eq!(
        schema.field("body_checksum").unwrap().constraint,
        FieldConstraint::Index
    );
    assert_eq!(
        schema.field("source_checksum").unwrap().constraint,
        FieldConstraint::Unique
    );
    assert!(schema.field("source_checksum").unwrap().required);
}

#[test]
fn new_records_expose_checksum_before_save() {
    let schema = Url::define().unwrap().into_shared();
    let url = Url {
        id: None,
        url: URL.to_string(),
    };

    let resource = Resource::from_model(schema, &url).unwrap();
    assert!(resource.is_new());
    assert_eq!(
        resource.string("url_checksum").unwrap().as_deref(),
        Some(URL_CHECKSUM)
    );
}
