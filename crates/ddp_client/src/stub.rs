//! Method stubs.
//!
//! A stub is the local, optimistic version of a server method. It runs
//! inside a cache transaction as soon as the method is called; its effects
//! stay visible until the server's authoritative writes replace them.

use crate::mutators;
use ddp_core::{Database, Transaction};
use ddp_protocol::{Alea, MethodError, RandomStream};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of running a stub.
pub type StubResult = Result<Value, MethodError>;

/// A registered stub.
pub type MethodStub = Arc<dyn Fn(&mut StubContext<'_, '_>, &[Value]) -> StubResult + Send + Sync>;

/// What a stub can see and do while it runs.
pub struct StubContext<'a, 'db> {
    txn: &'a mut Transaction<'db>,
    random: &'a mut RandomStream,
    stubs: &'a StubRegistry,
    user_id: Option<&'a str>,
}

impl<'a, 'db> StubContext<'a, 'db> {
    pub(crate) fn new(
        txn: &'a mut Transaction<'db>,
        random: &'a mut RandomStream,
        stubs: &'a StubRegistry,
        user_id: Option<&'a str>,
    ) -> Self {
        Self {
            txn,
            random,
            stubs,
            user_id,
        }
    }

    /// The transaction the stub writes through.
    pub fn transaction(&mut self) -> &mut Transaction<'db> {
        self.txn
    }

    /// The cache.
    pub fn database(&self) -> &'db Database {
        self.txn.database()
    }

    /// The named random sequence derived from the method's seed. The server
    /// derives the same sequence, so IDs drawn here match the server's.
    pub fn random_stream(&mut self, name: &str) -> &mut Alea {
        self.random.sequence(name)
    }

    /// The method's random seed.
    pub fn random_seed(&self) -> &str {
        self.random.seed()
    }

    /// The logged-in user, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id
    }

    /// Always true: stubs only ever run as simulations.
    pub fn is_simulation(&self) -> bool {
        true
    }

    /// Runs another method's stub inline, in the same transaction.
    ///
    /// Nothing is sent to the server. A method without a stub returns
    /// `null`.
    pub fn call(&mut self, name: &str, params: &[Value]) -> StubResult {
        let Some(stub) = self.stubs.get(name) else {
            return Ok(Value::Null);
        };
        let seed = self
            .random
            .sequence(&format!("/rpc/{name}"))
            .hex_string(20);
        let mut random = RandomStream::new(seed);
        let mut nested = StubContext::new(&mut *self.txn, &mut random, self.stubs, self.user_id);
        stub(&mut nested, params)
    }
}

/// Stubs by method name.
///
/// Collection mutator methods (`/<collection>/insert`, `update`, `remove`)
/// have built-in stubs unless a stub is registered under the same name.
#[derive(Clone, Default)]
pub struct StubRegistry {
    stubs: HashMap<String, MethodStub>,
}

impl StubRegistry {
    /// Creates a registry with only the built-in mutator stubs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stub, replacing any previous one for `name`.
    pub fn define<F>(&mut self, name: impl Into<String>, stub: F)
    where
        F: Fn(&mut StubContext<'_, '_>, &[Value]) -> StubResult + Send + Sync + 'static,
    {
        self.stubs.insert(name.into(), Arc::new(stub));
    }

    /// Removes a stub.
    pub fn remove(&mut self, name: &str) -> bool {
        self.stubs.remove(name).is_some()
    }

    /// Returns the stub for `name`.
    pub fn get(&self, name: &str) -> Option<MethodStub> {
        self.stubs
            .get(name)
            .cloned()
            .or_else(|| mutators::builtin_stub(name))
    }
}

impl std::fmt::Debug for StubRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.stubs.keys().collect();
        names.sort();
        f.debug_struct("StubRegistry").field("stubs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddp_core::{DocumentKey, Fields};
    use serde_json::json;

    fn run(registry: &StubRegistry, db: &Database, name: &str, params: &[Value]) -> StubResult {
        let stub = registry.get(name).unwrap();
        let mut random = RandomStream::new("seed");
        db.perform_updates(|txn| {
            let mut ctx = StubContext::new(txn, &mut random, registry, Some("user1"));
            stub(&mut ctx, params)
        })
    }

    #[test]
    fn stub_writes_through_the_transaction() {
        let mut registry = StubRegistry::new();
        registry.define("setName", |ctx, params| {
            let mut fields = Fields::new();
            fields.insert("name".into(), params[0].clone());
            ctx.transaction()
                .merge_document(&DocumentKey::new("players", "p1"), &fields);
            Ok(json!(ctx.user_id()))
        });

        let db = Database::new();
        let value = run(&registry, &db, "setName", &[json!("Ada")]).unwrap();

        assert_eq!(value, json!("user1"));
        let doc = db.document_with_key(&DocumentKey::new("players", "p1")).unwrap();
        assert_eq!(doc.field("name"), Some(&json!("Ada")));
    }

    #[test]
    fn nested_calls_run_inline_with_derived_seed() {
        let mut registry = StubRegistry::new();
        registry.define("inner", |ctx, _| Ok(json!(ctx.random_seed())));
        registry.define("outer", |ctx, _| {
            assert!(ctx.is_simulation());
            let first = ctx.call("inner", &[])?;
            let second = ctx.call("inner", &[])?;
            let missing = ctx.call("serverOnly", &[])?;
            Ok(json!([first, second, missing]))
        });

        let db = Database::new();
        let value = run(&registry, &db, "outer", &[]).unwrap();
        let seeds = value.as_array().unwrap();

        assert_eq!(seeds[0].as_str().unwrap().len(), 20);
        assert_ne!(seeds[0], seeds[1]);
        assert_eq!(seeds[2], Value::Null);

        // Same outer seed, same nested seeds
        assert_eq!(run(&registry, &db, "outer", &[]).unwrap(), value);
    }

    #[test]
    fn registered_stub_overrides_builtin() {
        let mut registry = StubRegistry::new();
        assert!(registry.get("/tasks/insert").is_some());
        assert!(registry.get("addTask").is_none());

        registry.define("/tasks/insert", |_, _| Ok(json!("custom")));
        let db = Database::new();
        assert_eq!(run(&registry, &db, "/tasks/insert", &[]).unwrap(), json!("custom"));
        assert!(registry.remove("/tasks/insert"));
    }
}
