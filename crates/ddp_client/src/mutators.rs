//! Collection mutators.
//!
//! Servers expose `/<collection>/insert`, `/<collection>/update` and
//! `/<collection>/remove` for every collection. The functions here build
//! their parameters and provide the stubs that apply the same change to the
//! local cache.

use crate::stub::{MethodStub, StubContext, StubResult};
use ddp_core::{DocumentId, DocumentKey, Fields};
use ddp_protocol::MethodError;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Kind of collection mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mutator {
    Insert,
    Update,
    Remove,
}

impl Mutator {
    fn as_str(self) -> &'static str {
        match self {
            Mutator::Insert => "insert",
            Mutator::Update => "update",
            Mutator::Remove => "remove",
        }
    }

    /// Method name for this mutator on `collection`.
    pub(crate) fn method_name(self, collection: &str) -> String {
        format!("/{collection}/{}", self.as_str())
    }
}

/// Splits `/<collection>/<op>` into its parts.
fn parse_method_name(name: &str) -> Option<(&str, Mutator)> {
    let rest = name.strip_prefix('/')?;
    let (collection, op) = rest.rsplit_once('/')?;
    if collection.is_empty() {
        return None;
    }
    let mutator = match op {
        "insert" => Mutator::Insert,
        "update" => Mutator::Update,
        "remove" => Mutator::Remove,
        _ => return None,
    };
    Some((collection, mutator))
}

/// Name of the random sequence used for IDs in `collection`.
pub(crate) fn id_stream_name(collection: &str) -> String {
    format!("/collection/{collection}")
}

/// Returns the built-in stub for a mutator method name.
pub(crate) fn builtin_stub(name: &str) -> Option<MethodStub> {
    let (collection, mutator) = parse_method_name(name)?;
    let collection = collection.to_string();
    let stub: MethodStub = match mutator {
        Mutator::Insert => Arc::new(move |ctx: &mut StubContext<'_, '_>, params: &[Value]| {
            insert_stub(&collection, ctx, params)
        }),
        Mutator::Update => Arc::new(move |ctx: &mut StubContext<'_, '_>, params: &[Value]| {
            update_stub(&collection, ctx, params)
        }),
        Mutator::Remove => Arc::new(move |ctx: &mut StubContext<'_, '_>, params: &[Value]| {
            remove_stub(&collection, ctx, params)
        }),
    };
    Some(stub)
}

pub(crate) fn insert_params(id: &DocumentId, fields: &Fields) -> Vec<Value> {
    let mut doc: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    doc.insert("_id".into(), Value::String(id.as_str().to_string()));
    vec![Value::Object(doc)]
}

pub(crate) fn update_params(id: &DocumentId, changed: &Fields, cleared: &[String]) -> Vec<Value> {
    let mut modifier = Map::new();
    if !changed.is_empty() {
        let set: Map<String, Value> = changed.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        modifier.insert("$set".into(), Value::Object(set));
    }
    if !cleared.is_empty() {
        let unset: Map<String, Value> = cleared.iter().map(|k| (k.clone(), json!(""))).collect();
        modifier.insert("$unset".into(), Value::Object(unset));
    }
    vec![json!({ "_id": id.as_str() }), Value::Object(modifier)]
}

pub(crate) fn remove_params(id: &DocumentId) -> Vec<Value> {
    vec![json!({ "_id": id.as_str() })]
}

fn bad_request(reason: &str) -> MethodError {
    MethodError::new(400, reason)
}

/// Reads the document ID from a `{_id: ...}` selector or a bare string.
fn selector_id(selector: Option<&Value>) -> Result<String, MethodError> {
    match selector {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Object(map)) => map
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| bad_request("selector must name an _id")),
        _ => Err(bad_request("missing selector")),
    }
}

fn insert_stub(collection: &str, ctx: &mut StubContext<'_, '_>, params: &[Value]) -> StubResult {
    let doc = params
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| bad_request("insert expects a document"))?;

    let mut fields: Fields = doc.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let id = match fields.remove("_id") {
        Some(Value::String(id)) => id,
        Some(_) => return Err(bad_request("_id must be a string")),
        None => ctx.random_stream(&id_stream_name(collection)).id(),
    };

    ctx.transaction()
        .insert_document(DocumentKey::new(collection, id.as_str()), fields)?;
    Ok(Value::String(id))
}

fn update_stub(collection: &str, ctx: &mut StubContext<'_, '_>, params: &[Value]) -> StubResult {
    let key = DocumentKey::new(collection, selector_id(params.first())?);
    let modifier = params
        .get(1)
        .and_then(Value::as_object)
        .ok_or_else(|| bad_request("update expects a modifier"))?;

    let txn = ctx.transaction();
    let Some(mut fields) = txn.fields(&key) else {
        return Ok(json!(0));
    };

    if modifier.keys().any(|k| k.starts_with('$')) {
        for (op, args) in modifier {
            let args = args
                .as_object()
                .ok_or_else(|| bad_request("modifier arguments must be objects"))?;
            match op.as_str() {
                "$set" => {
                    for (name, value) in args {
                        fields.insert(name.clone(), value.clone());
                    }
                }
                "$unset" => {
                    for name in args.keys() {
                        fields.remove(name);
                    }
                }
                other => return Err(bad_request(&format!("unsupported modifier {other}"))),
            }
        }
    } else {
        fields = modifier
            .iter()
            .filter(|(k, _)| k.as_str() != "_id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }

    txn.replace_document(&key, Some(fields));
    Ok(json!(1))
}

fn remove_stub(collection: &str, ctx: &mut StubContext<'_, '_>, params: &[Value]) -> StubResult {
    let key = DocumentKey::new(collection, selector_id(params.first())?);
    let txn = ctx.transaction();
    if !txn.contains(&key) {
        return Ok(json!(0));
    }
    txn.remove_document(&key)?;
    Ok(json!(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubRegistry;
    use ddp_core::Database;
    use ddp_protocol::RandomStream;

    fn run(db: &Database, name: &str, params: &[Value]) -> StubResult {
        let registry = StubRegistry::new();
        let stub = registry.get(name).unwrap();
        let mut random = RandomStream::new("seed");
        db.transaction(|txn| {
            let mut ctx = StubContext::new(txn, &mut random, &registry, None);
            stub(&mut ctx, params)
        })
        .map(|(value, _)| value)
    }

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parses_mutator_names() {
        assert_eq!(parse_method_name("/tasks/insert"), Some(("tasks", Mutator::Insert)));
        assert_eq!(parse_method_name("/a/b/remove"), Some(("a/b", Mutator::Remove)));
        assert_eq!(parse_method_name("tasks/insert"), None);
        assert_eq!(parse_method_name("//insert"), None);
        assert_eq!(parse_method_name("/tasks/upsert"), None);
        assert_eq!(Mutator::Update.method_name("tasks"), "/tasks/update");
    }

    #[test]
    fn builds_wire_parameters() {
        let id = DocumentId::new("t1");
        assert_eq!(
            insert_params(&id, &fields(&[("title", json!("milk"))])),
            vec![json!({"_id": "t1", "title": "milk"})]
        );
        assert_eq!(
            update_params(&id, &fields(&[("done", json!(true))]), &["title".to_string()]),
            vec![json!({"_id": "t1"}), json!({"$set": {"done": true}, "$unset": {"title": ""}})]
        );
        assert_eq!(remove_params(&id), vec![json!({"_id": "t1"})]);
    }

    #[test]
    fn insert_update_remove_stubs() {
        let db = Database::new();
        let key = DocumentKey::new("tasks", "t1");

        let id = run(&db, "/tasks/insert", &[json!({"_id": "t1", "title": "milk"})]).unwrap();
        assert_eq!(id, json!("t1"));
        assert_eq!(
            db.document_with_key(&key).unwrap().fields(),
            &fields(&[("title", json!("milk"))])
        );

        let dup = run(&db, "/tasks/insert", &[json!({"_id": "t1"})]).unwrap_err();
        assert_eq!(dup.code(), "duplicate-key");

        let updated = run(
            &db,
            "/tasks/update",
            &[json!({"_id": "t1"}), json!({"$set": {"done": true}, "$unset": {"title": ""}})],
        )
        .unwrap();
        assert_eq!(updated, json!(1));
        assert_eq!(
            db.document_with_key(&key).unwrap().fields(),
            &fields(&[("done", json!(true))])
        );

        assert_eq!(run(&db, "/tasks/remove", &[json!("t1")]).unwrap(), json!(1));
        assert!(db.document_with_key(&key).is_none());
        assert_eq!(run(&db, "/tasks/remove", &[json!("t1")]).unwrap(), json!(0));
        assert_eq!(
            run(&db, "/tasks/update", &[json!("t1"), json!({"$set": {"a": 1}})]).unwrap(),
            json!(0)
        );
    }

    #[test]
    fn insert_without_id_draws_from_collection_stream() {
        let db = Database::new();
        let id = run(&db, "/tasks/insert", &[json!({"title": "milk"})]).unwrap();

        let expected = RandomStream::new("seed").id("/collection/tasks");
        assert_eq!(id, json!(expected));
    }

    #[test]
    fn replacement_update_drops_unlisted_fields() {
        let db = Database::new();
        run(&db, "/tasks/insert", &[json!({"_id": "t1", "a": 1, "b": 2})]).unwrap();
        run(&db, "/tasks/update", &[json!("t1"), json!({"_id": "t1", "c": 3})]).unwrap();

        let doc = db.document_with_key(&DocumentKey::new("tasks", "t1")).unwrap();
        assert_eq!(doc.fields(), &fields(&[("c", json!(3))]));
    }
}
