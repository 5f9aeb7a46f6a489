//! Exercises `LogStore::open` against a real local filesystem through `object_store`'s
//! `LocalFileSystem` backend -- the one code path the in-memory test double (used by every other
//! test in this crate) never touches.

use test_log::test;

use table_kernel::actions::{Action, Add, Format, Metadata, Protocol};
use table_kernel::log_store::LogStore;

fn table_url(dir: &tempfile::TempDir) -> String {
    format!("file://{}", dir.path().display())
}

#[test]
fn open_writes_and_reads_back_a_commit_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let log_store = LogStore::open(&table_url(&dir)).unwrap();

    let metadata = Metadata {
        id: "t".into(),
        name: None,
        description: None,
        format: Format::default(),
        schema_string: r#"{"fields":[{"name":"k","data_type":"integer","nullable":true}]}"#.into(),
        partition_columns: vec![],
        configuration: Default::default(),
        created_time: None,
    };
    let protocol = Protocol {
        min_reader_version: 1,
        min_writer_version: 2,
    };
    log_store
        .write(
            0,
            &[
                Action::Metadata(metadata).to_log_line().unwrap(),
                Action::Protocol(protocol).to_log_line().unwrap(),
            ],
        )
        .unwrap();

    log_store
        .write(
            1,
            &[Action::Add(Add {
                path: "part-0.parquet".into(),
                partition_values: Default::default(),
                size: 128,
                modification_time: 0,
                data_change: true,
                stats: None,
                tags: None,
            })
            .to_log_line()
            .unwrap()],
        )
        .unwrap();

    assert_eq!(log_store.latest_version().unwrap(), Some(1));
    let lines = log_store.read(1).unwrap();
    assert_eq!(lines.len(), 1);
    assert!(matches!(Action::parse_line(&lines[0]).unwrap(), Action::Add(_)));

    // The commit really landed on disk under `dir`, not just in an in-process object_store view.
    assert!(dir.path().join("_delta_log/00000000000000000000.json").exists());
    assert!(dir.path().join("_delta_log/00000000000000000001.json").exists());
}

#[test]
fn racing_writers_at_the_same_version_on_disk_only_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let log_store = LogStore::open(&table_url(&dir)).unwrap();

    log_store.write(0, &["{}".to_string()]).unwrap();
    let err = log_store.write(0, &["{}".to_string()]).unwrap_err();
    assert!(matches!(err, table_kernel::Error::FileAlreadyExists(0)));
}
