use apache_avro::types::{Record, Value};
use apache_avro::Schema;
use avrokit::concat::concat;
use avrokit::count::fast_count;
use avrokit::io::{AvroFileReader, AvroFileWriter};
use avrokit::partition::{partition, PartitionedReader};
use avrokit::repair::repair;
use avrokit::schema::validate_evolution;
use avrokit::url::Url;
use tempfile::tempdir;

fn user_schema() -> Schema {
    Schema::parse_str(
        r#"{"type":"record","name":"User","fields":[
            {"name":"name","type":"string"},
            {"name":"age","type":"int"},
            {"name":"emails","type":{"type":"array","items":"string"}}
        ]}"#,
    )
    .unwrap()
}

fn write_users(url: &Url, schema: &Schema, count: usize) {
    let mut writer = AvroFileWriter::create(url, schema).unwrap();
    for i in 0..count {
        let mut record = Record::new(schema).unwrap();
        record.put("name", format!("user-{i}"));
        record.put("age", i as i32);
        record.put(
            "emails",
            Value::Array(vec![
                Value::String(format!("user-{i}@a.com")),
                Value::String(format!("user-{i}@b.com")),
                Value::String(format!("user-{i}@c.com")),
            ]),
        );
        writer.append(record.into()).unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn scenario_write_then_read_back_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.avro");
    let url = Url::parse(path.to_str().unwrap()).unwrap();
    let schema = user_schema();

    write_users(&url, &schema, 100);

    let reader = AvroFileReader::open(&url).unwrap();
    let mut seen = 0;
    for (i, record) in reader.enumerate() {
        let record = record.unwrap();
        if let Value::Record(fields) = record {
            let name = fields.iter().find(|(n, _)| n == "name").unwrap();
            assert_eq!(name.1, Value::String(format!("user-{i}")));
            let emails = fields.iter().find(|(n, _)| n == "emails").unwrap();
            if let Value::Array(items) = &emails.1 {
                assert_eq!(items.len(), 3);
            } else {
                panic!("expected array");
            }
        }
        seen += 1;
    }
    assert_eq!(seen, 100);
}

#[test]
fn scenario_partitioned_reader_over_directory() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let schema = user_schema();

    for f in 0..10 {
        let path = data_dir.join(format!("f{f}.avro"));
        let url = Url::parse(path.to_str().unwrap()).unwrap();
        write_users(&url, &schema, 10);
    }

    let dir_url = Url::parse(data_dir.to_str().unwrap()).unwrap();
    let reader = PartitionedReader::open(&dir_url).unwrap();
    let total = reader.count();
    assert_eq!(total, 100);
}

#[test]
fn scenario_repair_recovers_from_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.avro");
    let url = Url::parse(path.to_str().unwrap()).unwrap();
    let schema = user_schema();
    write_users(&url, &schema, 500);

    let original_count = AvroFileReader::open(&url).unwrap().count();

    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(8192.min(std::fs::metadata(&path).unwrap().len() / 2)))
            .unwrap();
        f.write_all(&[0u8; 32]).unwrap();
    }

    let out_path = dir.path().join("out.avro");
    let out_url = Url::parse(out_path.to_str().unwrap()).unwrap();
    let reports = repair(&url, &out_url, false).unwrap();
    assert_eq!(reports.len(), 1);

    let repaired_count = AvroFileReader::open(&out_url).unwrap().count();
    assert!(repaired_count <= original_count);
}

#[test]
fn scenario_schema_evolution_rejects_missing_default() {
    let old = Schema::parse_str(r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#).unwrap();
    let new = Schema::parse_str(
        r#"{"type":"record","name":"R","fields":[
            {"name":"id","type":"int"},
            {"name":"email","type":"string"}
        ]}"#,
    )
    .unwrap();
    let err = validate_evolution(&old, &new).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("email"));
    assert!(msg.contains("missing a default value"));
}

#[test]
fn scenario_partition_then_read_back_all_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.avro");
    let url = Url::parse(path.to_str().unwrap()).unwrap();
    let schema = user_schema();
    write_users(&url, &schema, 100);

    let dest_dir = dir.path().join("parts");
    std::fs::create_dir_all(&dest_dir).unwrap();
    let dest = Url::parse(dest_dir.to_str().unwrap()).unwrap();

    partition(&[url], &dest, 3, false).unwrap();

    let reader = PartitionedReader::open(&dest).unwrap();
    assert_eq!(reader.count(), 100);
}

#[test]
fn scenario_fast_count_matches_decoded_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.avro");
    let url = Url::parse(path.to_str().unwrap()).unwrap();
    let schema = user_schema();
    write_users(&url, &schema, 257);

    let decoded_count = AvroFileReader::open(&url).unwrap().count() as u64;
    assert_eq!(fast_count(&url).unwrap(), decoded_count);
}

#[test]
fn scenario_block_concat_preserves_all_records() {
    let dir = tempdir().unwrap();
    let schema = user_schema();

    let a_path = dir.path().join("a.avro");
    let a_url = Url::parse(a_path.to_str().unwrap()).unwrap();
    write_users(&a_url, &schema, 40);

    let b_path = dir.path().join("b.avro");
    let b_url = Url::parse(b_path.to_str().unwrap()).unwrap();
    write_users(&b_url, &schema, 60);

    let out_path = dir.path().join("out.avro");
    let out_url = Url::parse(out_path.to_str().unwrap()).unwrap();

    concat(&[a_url, b_url], &out_url, "null").unwrap();

    let total = AvroFileReader::open(&out_url).unwrap().count();
    assert_eq!(total, 100);
}
