//! Query subsystem: synchronous request/response layered over the same command bus everything
//! else uses.
//!
//! The issuing side allocates a query id, installs a one-shot future keyed by that id in a
//! "delayed objects" table, sends a `CMD_QUERY`, and blocks the caller on the future. Whichever
//! side eventually produces the answer replies with `CMD_QUERY_REPLY` carrying the same id; the
//! reply handler looks the id up and fulfills the future. Aggregate queries that need to fan out
//! to children use [`MapBuilder`] to assemble the fused JSON result as replies trickle in.

use std::collections::HashMap;

use cosim_tinymap::key_type;
use tokio::sync::oneshot;

key_type!(
    /// Identifies one in-flight query's delayed-object slot.
    pub QueryId
);

/// The well-known query strings every participant answers locally.
pub const WELL_KNOWN_QUERIES: &[&str] = &[
    "name",
    "address",
    "isinit",
    "federates",
    "brokers",
    "publications",
    "endpoints",
    "dependson",
    "dependents",
    "dependencies",
    "federate_map",
    "dependency_graph",
];

/// Table of queries awaiting a reply. One instance per participant.
#[derive(Default)]
pub struct DelayedQueries {
    next_id: u64,
    pending: HashMap<QueryId, oneshot::Sender<String>>,
}

impl DelayedQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new query id and installs its answer slot, returning both the id (to embed in
    /// the outgoing `CMD_QUERY`) and a receiver the caller awaits.
    pub fn allocate(&mut self) -> (QueryId, oneshot::Receiver<String>) {
        let id = QueryId::from(self.next_id);
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Fulfills the query identified by `id`. Returns `false` if no such query is outstanding
    /// (already answered, or an id from a previous, unrelated run) -- this is not an error, just
    /// a stale or duplicate reply to drop.
    pub fn fulfill(&mut self, id: QueryId, answer: String) -> bool {
        match self.pending.remove(&id) {
            Some(tx) => {
                let _ = tx.send(answer);
                true
            }
            None => false,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

/// Incrementally assembles an aggregate query answer (`federate_map`, `dependency_graph`) out of
/// per-child replies, tracking which children are still outstanding so the fused object is only
/// emitted once every placeholder has been filled.
pub struct MapBuilder {
    name: String,
    outstanding: Vec<String>,
    parts: HashMap<String, serde_json::Value>,
}

impl MapBuilder {
    pub fn new(name: impl Into<String>, expected_children: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            outstanding: expected_children.into_iter().collect(),
            parts: HashMap::new(),
        }
    }

    /// Records one child's answer. `child` must match an entry passed to [`MapBuilder::new`].
    pub fn record(&mut self, child: &str, value: serde_json::Value) {
        self.outstanding.retain(|c| c != child);
        self.parts.insert(child.to_string(), value);
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Fuses every recorded child answer into one JSON object, keyed by participant name, plus
    /// this level's own `name` field.
    pub fn finish(self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("name".to_string(), serde_json::Value::String(self.name));
        let mut children = serde_json::Map::new();
        for (child, value) in self.parts {
            children.insert(child, value);
        }
        object.insert("children".to_string(), serde_json::Value::Object(children));
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilling_a_query_wakes_the_waiter() {
        let mut queries = DelayedQueries::new();
        let (id, rx) = queries.allocate();
        assert!(queries.fulfill(id, "42".to_string()));
        assert_eq!(rx.await.unwrap(), "42");
    }

    #[test]
    fn fulfilling_unknown_id_is_not_an_error() {
        let mut queries = DelayedQueries::new();
        assert!(!queries.fulfill(QueryId::from(999u64), "x".to_string()));
    }

    #[test]
    fn map_builder_completes_once_every_child_replies() {
        let mut builder = MapBuilder::new("root", ["core_a".to_string(), "core_b".to_string()]);
        assert!(!builder.is_complete());
        builder.record("core_a", serde_json::json!({"federates": []}));
        assert!(!builder.is_complete());
        builder.record("core_b", serde_json::json!({"federates": []}));
        assert!(builder.is_complete());
        let fused = builder.finish();
        assert_eq!(fused["name"], "root");
        assert!(fused["children"]["core_a"].is_object());
    }
}
