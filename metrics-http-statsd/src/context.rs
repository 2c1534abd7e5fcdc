use std::{collections::HashMap, sync::Arc};

use http::Extensions;
use metrics::Label;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    fields: HashMap<String, String>,
    tags: Vec<Label>,
}

/// Per-request metric context.
///
/// `RequestStats` is a shared handle stored in the request extensions. The instrumentation layer inserts one for every
/// request it sees (or reuses the one an outer layer already inserted), and reads it back once the response has
/// finished. Anything running in between, whether an outer middleware or the handler itself, can set the metric key
/// and tags through it.
///
/// Clones refer to the same context.
#[derive(Clone, Debug, Default)]
pub struct RequestStats {
    inner: Arc<Mutex<Inner>>,
}

impl RequestStats {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context stored in the given extensions, if any.
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get::<RequestStats>().cloned()
    }

    /// Returns the context stored in the given extensions, inserting an empty one if there is none yet.
    pub fn get_or_insert(extensions: &mut Extensions) -> Self {
        if let Some(stats) = extensions.get::<RequestStats>() {
            return stats.clone();
        }

        let stats = RequestStats::new();
        extensions.insert(stats.clone());
        stats
    }

    /// Sets a field.
    pub fn set<K, V>(&self, field: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.lock().fields.insert(field.into(), value.into());
    }

    /// Returns the value of a field.
    pub fn get(&self, field: &str) -> Option<String> {
        self.inner.lock().fields.get(field).cloned()
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&self, field: &str) -> Option<String> {
        self.inner.lock().fields.remove(field)
    }

    /// Replaces all tags.
    pub fn set_tags<I>(&self, tags: I)
    where
        I: IntoIterator<Item = Label>,
    {
        self.inner.lock().tags = tags.into_iter().collect();
    }

    /// Adds a tag.
    pub fn push_tag(&self, tag: Label) {
        self.inner.lock().tags.push(tag);
    }

    /// Returns the current tags.
    pub fn tags(&self) -> Vec<Label> {
        self.inner.lock().tags.clone()
    }
}

/// Parses a string tag into a label.
///
/// `key:value` tags are split on the first colon. Anything else becomes a bare tag, which is rendered on its own.
pub fn parse_tag(tag: &str) -> Label {
    match tag.split_once(':') {
        Some((key, value)) => Label::new(key.to_string(), value.to_string()),
        None => Label::new(tag.to_string(), ""),
    }
}
