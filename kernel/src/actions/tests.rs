use super::*;

#[test]
fn parse_add_roundtrip() {
    let line = r#"{"add":{"path":"part-00000.parquet","partitionValues":{"c1":"4"},"size":452,"modificationTime":1670892998135,"dataChange":true,"stats":"{\"numRecords\":1,\"minValues\":{\"c3\":5},\"maxValues\":{\"c3\":5},\"nullCount\":{\"c3\":0}}"}}"#;
    let action = Action::parse_line(line).unwrap();
    let Action::Add(add) = action else {
        panic!("expected Add");
    };
    assert_eq!(add.path, "part-00000.parquet");
    assert_eq!(add.partition_values.get("c1"), Some(&"4".to_string()));
    assert_eq!(add.size, 452);
    assert!(add.data_change);

    let stats = add.parsed_stats().unwrap();
    assert_eq!(stats.num_records, 1);

    let rewritten = Action::Add(add).to_log_line().unwrap();
    let reparsed = Action::parse_line(&rewritten).unwrap();
    assert_eq!(reparsed, Action::parse_line(line).unwrap());
}

#[test]
fn parse_metadata_and_protocol() {
    let metadata_line = r#"{"metaData":{"id":"testId","format":{"provider":"parquet","options":{}},"schemaString":"{\"fields\":[{\"name\":\"value\",\"data_type\":\"integer\",\"nullable\":true}]}","partitionColumns":[],"configuration":{},"createdTime":1677811175819}}"#;
    let protocol_line = r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#;

    let Action::Metadata(m) = Action::parse_line(metadata_line).unwrap() else {
        panic!("expected Metadata");
    };
    assert_eq!(m.id, "testId");
    let schema = m.schema().unwrap();
    assert_eq!(schema.fields.len(), 1);

    let Action::Protocol(p) = Action::parse_line(protocol_line).unwrap() else {
        panic!("expected Protocol");
    };
    assert_eq!(p.min_reader_version, 1);
    assert_eq!(p.min_writer_version, 2);
}

#[test]
fn unknown_discriminator_is_ignored_not_an_error() {
    let line = r#"{"domainMetadata":{"domain":"delta.foo","configuration":"{}"}}"#;
    let action = Action::parse_line(line).unwrap();
    assert_eq!(action, Action::Unknown);
}

#[test]
fn txn_and_commit_info_roundtrip() {
    let txn_line = r#"{"txn":{"appId":"writer-1","version":42,"lastUpdated":1600000000000}}"#;
    let Action::Txn(t) = Action::parse_line(txn_line).unwrap() else {
        panic!("expected Txn");
    };
    assert_eq!(t.app_id, "writer-1");
    assert_eq!(t.version, 42);

    let ci_line = r#"{"commitInfo":{"timestamp":1600000000000,"operation":"MERGE","operationParameters":{"predicate":"s.k = t.k"}}}"#;
    let Action::CommitInfo(ci) = Action::parse_line(ci_line).unwrap() else {
        panic!("expected CommitInfo");
    };
    assert_eq!(ci.operation.as_deref(), Some("MERGE"));
    assert_eq!(
        ci.operation_parameters.get("predicate"),
        Some(&"s.k = t.k".to_string())
    );
}
