//! Schema flattening and forward-compatibility validation, plus small
//! introspection helpers (parsing from JSON, appending fields, reading the
//! schema embedded in an OCF header).

use std::collections::BTreeMap;

use apache_avro::schema::{Name, RecordField, Schema};
use apache_avro::Reader as AvroReader;

use crate::error::{Error, Result};
use crate::url::{Mode, Url};

/// One entry of a flattened schema: the dot-path at which a field is
/// reachable, and the field itself.
#[derive(Debug, Clone)]
pub struct FlattenedField {
    pub path: String,
    pub field: RecordField,
}

/// Flattens a record schema into `{dot_path: field}`. Nested records
/// recurse with the field name appended to the path. Unions emit one
/// entry for the union field itself, plus, for each record branch, a
/// recursive flattening nested under `__union__/<branch-index>`.
pub fn flatten(schema: &Schema) -> BTreeMap<String, RecordField> {
    let mut out = BTreeMap::new();
    flatten_into(schema, "", &mut out);
    out
}

fn flatten_into(schema: &Schema, prefix: &str, out: &mut BTreeMap<String, RecordField>) {
    if let Schema::Record(record) = schema {
        for field in &record.fields {
            let path = join(prefix, &field.name);
            if !matches!(field.schema, Schema::Record(_)) {
                out.insert(path.clone(), field.clone());
            }
            flatten_field_type(&field.schema, &path, out);
        }
    }
}

fn flatten_field_type(schema: &Schema, path: &str, out: &mut BTreeMap<String, RecordField>) {
    match schema {
        Schema::Record(_) => flatten_into(schema, path, out),
        Schema::Union(union) => {
            for (i, branch) in union.variants().iter().enumerate() {
                if matches!(branch, Schema::Record(_)) {
                    let branch_path = join(path, &format!("__union__/{i}"));
                    flatten_into(branch, &branch_path, out);
                }
            }
        }
        _ => {}
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Checks whether `new_schema` is a forward-compatible successor of
/// `old_schema`: new readers constructed from `new_schema` must be able to
/// read data written under `old_schema`. Returns the first violation
/// found, naming the offending path.
pub fn validate_evolution(old_schema: &Schema, new_schema: &Schema) -> Result<()> {
    let old = flatten(old_schema);
    let new = flatten(new_schema);

    for (path, new_field) in &new {
        match old.get(path) {
            None => {
                if new_field.default.is_none() {
                    return Err(Error::schema(format!(
                        "field `{path}` is new and missing a default value"
                    )));
                }
            }
            Some(old_field) => {
                if old_field.default.is_some() && new_field.default.is_none() {
                    return Err(Error::schema(format!(
                        "field `{path}` dropped a default value present in the old schema"
                    )));
                }
                check_type_compatible(path, &old_field.schema, &new_field.schema)?;
            }
        }
    }

    for (path, old_field) in &old {
        if !new.contains_key(path) && old_field.default.is_none() {
            return Err(Error::schema(format!(
                "field `{path}` was removed but has no default value in the old schema"
            )));
        }
    }

    Ok(())
}

fn check_type_compatible(path: &str, old_type: &Schema, new_type: &Schema) -> Result<()> {
    if schemas_equal(old_type, new_type) {
        return Ok(());
    }

    if let (Schema::Enum(old_enum), Schema::Enum(new_enum)) = (old_type, new_type) {
        let old_symbols: std::collections::HashSet<_> = old_enum.symbols.iter().collect();
        let new_symbols: std::collections::HashSet<_> = new_enum.symbols.iter().collect();
        if old_symbols.is_subset(&new_symbols) {
            return Ok(());
        }
        return Err(Error::schema(format!(
            "field `{path}` enum symbols are not a superset of the old enum symbols"
        )));
    }

    if let (Schema::Union(old_union), Schema::Union(new_union)) = (old_type, new_type) {
        let is_superset = old_union
            .variants()
            .iter()
            .all(|ov| new_union.variants().iter().any(|nv| schemas_equal(ov, nv)));
        if is_superset {
            return Ok(());
        }
        return Err(Error::schema(format!(
            "field `{path}` union branches are not a superset of the old union branches"
        )));
    }

    if let Schema::Union(new_union) = new_type {
        let variants = new_union.variants();
        if variants.len() == 2
            && variants.iter().any(|v| matches!(v, Schema::Null))
            && variants.iter().any(|v| schemas_equal(v, old_type))
        {
            return Ok(());
        }
        return Err(Error::schema(format!(
            "field `{path}` was widened to a union that is not exactly [null, {{old type}}]"
        )));
    }

    Err(Error::schema(format!(
        "field `{path}` changed incompatibly from its old type"
    )))
}

fn schemas_equal(a: &Schema, b: &Schema) -> bool {
    a.canonical_form() == b.canonical_form()
}

/// Parses a schema from a JSON string.
pub fn avro_schema(json: &str) -> Result<Schema> {
    Schema::parse_str(json).map_err(Error::from)
}

/// Returns a new record schema with `fields` appended to the existing
/// field list, round-tripping through JSON the way schema mutation is
/// commonly done when no field-builder API is available.
pub fn add_avro_schema_fields(schema: &Schema, fields: &[(String, Schema)]) -> Result<Schema> {
    let mut value: serde_json::Value = serde_json::from_str(
        &serde_json::to_string(schema).map_err(|e| Error::schema(e.to_string()))?,
    )
    .map_err(|e| Error::schema(e.to_string()))?;

    let existing_fields = value
        .get_mut("fields")
        .and_then(|f| f.as_array_mut())
        .ok_or_else(|| Error::schema("add_avro_schema_fields requires a record schema"))?;

    for (name, field_schema) in fields {
        let field_schema_json: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(field_schema).map_err(|e| Error::schema(e.to_string()))?,
        )
        .map_err(|e| Error::schema(e.to_string()))?;
        existing_fields.push(serde_json::json!({
            "name": name,
            "type": field_schema_json,
        }));
    }

    Schema::parse_str(&value.to_string()).map_err(Error::from)
}

/// Opens `url` and returns the schema embedded in its OCF header. Read
/// mode never writes anything back, so the stream is simply dropped once
/// the schema has been copied out.
pub fn read_avro_schema(url: &Url) -> Result<Schema> {
    let url = url.with_mode(Mode::Read);
    let stream = url.open()?;
    let reader = AvroReader::new(stream)?;
    Ok(reader.writer_schema().clone())
}

/// Returns the schema of the first URL in `urls` that both exists and has
/// nonzero size, or `None` if none qualify.
pub fn read_avro_schema_from_first_nonempty_file(urls: &[Url]) -> Result<Option<Schema>> {
    for url in urls {
        if url.exists()? && url.size()? > 0 {
            return Ok(Some(read_avro_schema(url)?));
        }
    }
    Ok(None)
}

/// Returns the `Name` of a record schema's top-level type, if any.
pub fn record_name(schema: &Schema) -> Option<&Name> {
    match schema {
        Schema::Record(r) => Some(&r.name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(json: &str) -> Schema {
        Schema::parse_str(json).unwrap()
    }

    #[test]
    fn flatten_simple_record() {
        let s = schema(
            r#"{"type":"record","name":"User","fields":[
                {"name":"id","type":"int"},
                {"name":"name","type":"string"}
            ]}"#,
        );
        let flat = flatten(&s);
        assert!(flat.contains_key("id"));
        assert!(flat.contains_key("name"));
    }

    #[test]
    fn flatten_nested_record() {
        let s = schema(
            r#"{"type":"record","name":"Outer","fields":[
                {"name":"inner","type":{"type":"record","name":"Inner","fields":[
                    {"name":"value","type":"long"}
                ]}}
            ]}"#,
        );
        let flat = flatten(&s);
        assert!(!flat.contains_key("inner"));
        assert!(flat.contains_key("inner.value"));
    }

    #[test]
    fn new_field_without_default_fails() {
        let old = schema(r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#);
        let new = schema(
            r#"{"type":"record","name":"R","fields":[
                {"name":"id","type":"int"},
                {"name":"email","type":"string"}
            ]}"#,
        );
        let err = validate_evolution(&old, &new).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("email"));
        assert!(msg.contains("missing a default value"));
    }

    #[test]
    fn new_field_with_default_succeeds() {
        let old = schema(r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#);
        let new = schema(
            r#"{"type":"record","name":"R","fields":[
                {"name":"id","type":"int"},
                {"name":"email","type":"string","default":""}
            ]}"#,
        );
        validate_evolution(&old, &new).unwrap();
    }

    #[test]
    fn enum_superset_succeeds() {
        let old = schema(
            r#"{"type":"record","name":"R","fields":[
                {"name":"color","type":{"type":"enum","name":"Color","symbols":["RED","BLUE"]}}
            ]}"#,
        );
        let new = schema(
            r#"{"type":"record","name":"R","fields":[
                {"name":"color","type":{"type":"enum","name":"Color","symbols":["RED","BLUE","GREEN"]}}
            ]}"#,
        );
        validate_evolution(&old, &new).unwrap();
    }
}
