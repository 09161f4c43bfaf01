//! Short-lived read-through cache over `Store::get_function`, invalidated
//! on any local write (spec.md §4.1).

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::registry::types::FunctionSchema;

struct Entry {
    value: FunctionSchema,
    inserted_at: Instant,
}

pub struct FunctionCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl FunctionCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, id: &str) -> Option<FunctionSchema> {
        let entry = self.entries.get(id)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(id);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, schema: FunctionSchema) {
        self.entries.insert(
            schema.function_id.clone(),
            Entry { value: schema, inserted_at: Instant::now() },
        );
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }
}
