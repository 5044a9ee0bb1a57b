//! Namespaced key/value memory with expiry and simple metadata queries.

use crate::error::StepError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

type StoreResult<T> = std::result::Result<T, StepError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    /// `None` or zero never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MemoryMetadata {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.ttl.filter(|t| !t.is_zero())?;
        let ttl = TimeDelta::from_std(ttl).ok()?;
        self.timestamp.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now > at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: Value,
    pub metadata: MemoryMetadata,
}

/// Filter for [`StoreProvider::search`]. Every set field must match; `tags`
/// requires all listed tags to be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQuery {
    pub kind: Option<String>,
    pub tags: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Only keys starting with this prefix.
    pub prefix: Option<String>,
}

impl MemoryQuery {
    fn matches(&self, key: &str, item: &MemoryItem) -> bool {
        let meta = &item.metadata;
        self.prefix.as_deref().is_none_or(|p| key.starts_with(p))
            && self.kind.as_deref().is_none_or(|k| meta.kind == k)
            && self.tags.iter().all(|t| meta.tags.contains(t))
            && self.from.is_none_or(|from| meta.timestamp >= from)
            && self.to.is_none_or(|to| meta.timestamp <= to)
    }
}

/// Storage backend behind a [`MemoryStore`].
pub trait StoreProvider: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<MemoryItem>>;
    fn set(&self, key: &str, item: MemoryItem) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;
    fn clear(&self) -> StoreResult<()>;
    fn search(&self, query: &MemoryQuery) -> StoreResult<Vec<MemoryItem>>;
}

/// Process-local store. Expired items are dropped when read and skipped by
/// searches.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: Mutex<BTreeMap<String, MemoryItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, MemoryItem>>> {
        self.items
            .lock()
            .map_err(|_| StepError::other("memory store lock poisoned"))
    }
}

impl StoreProvider for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<MemoryItem>> {
        let mut items = self.lock()?;
        match items.get(key) {
            Some(item) if item.metadata.is_expired(Utc::now()) => {
                debug!(key, "memory item expired");
                items.remove(key);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    fn set(&self, key: &str, item: MemoryItem) -> StoreResult<()> {
        self.lock()?.insert(key.to_string(), item);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn search(&self, query: &MemoryQuery) -> StoreResult<Vec<MemoryItem>> {
        let now = Utc::now();
        Ok(self
            .lock()?
            .iter()
            .filter(|(key, item)| query.matches(key, item) && !item.metadata.is_expired(now))
            .map(|(_, item)| item.clone())
            .collect())
    }
}

/// Per-call overrides for [`MemoryStore::remember`].
#[derive(Debug, Clone, Default)]
pub struct RememberOptions {
    /// Defaults to `"generic"`.
    pub kind: Option<String>,
    /// Defaults to the store's TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl RememberOptions {
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Passed to [`MemoryStore::on_event`] listeners after a successful
/// operation. Keys are the caller's, without the namespace prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryEvent<'a> {
    Set { key: &'a str, item: &'a MemoryItem },
    Get { key: &'a str, item: &'a MemoryItem },
    Delete { key: &'a str },
    Clear,
}

type MemoryListener = Box<dyn Fn(&MemoryEvent) + Send + Sync>;

/// Typed facade over a [`StoreProvider`]; keys are stored as
/// `namespace:key`.
pub struct MemoryStore {
    provider: Arc<dyn StoreProvider>,
    namespace: String,
    default_ttl: Duration,
    listeners: Vec<MemoryListener>,
}

impl MemoryStore {
    pub fn new(provider: Arc<dyn StoreProvider>) -> Self {
        Self {
            provider,
            namespace: "default".into(),
            default_ttl: Duration::from_secs(3600),
            listeners: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Zero falls back to one hour.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = if ttl.is_zero() { Duration::from_secs(3600) } else { ttl };
        self
    }

    /// Listeners run synchronously, in registration order, after the
    /// provider call succeeds. Recalling a missing key emits nothing.
    pub fn on_event(mut self, cb: impl Fn(&MemoryEvent) + Send + Sync + 'static) -> Self {
        self.listeners.push(Box::new(cb));
        self
    }

    fn emit(&self, event: MemoryEvent) {
        for cb in &self.listeners {
            cb(&event);
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn in_namespace(&self, mut query: MemoryQuery) -> MemoryQuery {
        query.prefix = Some(format!("{}:", self.namespace));
        query
    }

    pub fn remember<T: Serialize>(&self, key: &str, value: &T, options: RememberOptions) -> StoreResult<()> {
        let content = serde_json::to_value(value).map_err(|e| StepError::invalid(e.to_string()))?;
        let item = MemoryItem {
            id: key.to_string(),
            content,
            metadata: MemoryMetadata {
                timestamp: Utc::now(),
                kind: options.kind.unwrap_or_else(|| "generic".into()),
                ttl: Some(options.ttl.filter(|t| !t.is_zero()).unwrap_or(self.default_ttl)),
                tags: options.tags,
            },
        };
        debug!(namespace = %self.namespace, key, kind = %item.metadata.kind, "remember");
        self.provider.set(&self.key(key), item.clone())?;
        self.emit(MemoryEvent::Set { key, item: &item });
        Ok(())
    }

    /// `Ok(None)` when the key is absent or expired.
    pub fn recall<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(item) = self.provider.get(&self.key(key))? else {
            return Ok(None);
        };
        debug!(namespace = %self.namespace, key, "recall");
        self.emit(MemoryEvent::Get { key, item: &item });
        serde_json::from_value(item.content)
            .map(Some)
            .map_err(|e| StepError::invalid(format!("memory item {key}: {e}")))
    }

    pub fn forget(&self, key: &str) -> StoreResult<()> {
        debug!(namespace = %self.namespace, key, "forget");
        self.provider.delete(&self.key(key))?;
        self.emit(MemoryEvent::Delete { key });
        Ok(())
    }

    pub fn search_by_type(&self, kind: &str) -> StoreResult<Vec<Value>> {
        let query = self.in_namespace(MemoryQuery {
            kind: Some(kind.to_string()),
            ..MemoryQuery::default()
        });
        Ok(self.provider.search(&query)?.into_iter().map(|i| i.content).collect())
    }

    pub fn search_by_tags(&self, tags: &[&str]) -> StoreResult<Vec<Value>> {
        let query = self.in_namespace(MemoryQuery {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..MemoryQuery::default()
        });
        Ok(self.provider.search(&query)?.into_iter().map(|i| i.content).collect())
    }

    /// Empties the whole provider, not only this namespace.
    pub fn clear(&self) -> StoreResult<()> {
        debug!(namespace = %self.namespace, "clear");
        self.provider.clear()?;
        self.emit(MemoryEvent::Clear);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(InMemoryStore::new()))
    }

    fn item(id: &str, kind: &str, tags: &[&str], timestamp: DateTime<Utc>, ttl: Option<Duration>) -> MemoryItem {
        MemoryItem {
            id: id.into(),
            content: json!(id),
            metadata: MemoryMetadata {
                timestamp,
                kind: kind.into(),
                ttl,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    // --- MemoryStore ---

    #[test]
    fn remember_and_recall() {
        let store = store();
        store
            .remember("user", &json!({"name": "Ada"}), RememberOptions::default())
            .unwrap();

        let value: Option<Value> = store.recall("user").unwrap();
        assert_eq!(value, Some(json!({"name": "Ada"})));
    }

    #[test]
    fn recall_typed() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Pref {
            theme: String,
        }

        let store = store();
        let pref = Pref { theme: "dark".into() };
        store.remember("pref", &pref, RememberOptions::default()).unwrap();

        assert_eq!(store.recall::<Pref>("pref").unwrap(), Some(pref));
        assert!(store.recall::<u32>("pref").is_err());
    }

    #[test]
    fn recall_missing_is_none() {
        assert_eq!(store().recall::<Value>("nope").unwrap(), None);
    }

    #[test]
    fn forget_removes_key() {
        let store = store();
        store.remember("k", &1, RememberOptions::default()).unwrap();
        store.forget("k").unwrap();
        assert_eq!(store.recall::<i32>("k").unwrap(), None);
    }

    #[test]
    fn keys_are_namespaced() {
        let provider = Arc::new(InMemoryStore::new());
        let a = MemoryStore::new(provider.clone()).namespace("a");
        let b = MemoryStore::new(provider.clone()).namespace("b");

        a.remember("k", &"from a", RememberOptions::default()).unwrap();

        assert_eq!(b.recall::<String>("k").unwrap(), None);
        assert_eq!(provider.get("a:k").unwrap().unwrap().id, "k");
    }

    #[test]
    fn remember_applies_defaults() {
        let provider = Arc::new(InMemoryStore::new());
        let store = MemoryStore::new(provider.clone());
        store.remember("k", &1, RememberOptions::default()).unwrap();

        let meta = provider.get("default:k").unwrap().unwrap().metadata;
        assert_eq!(meta.kind, "generic");
        assert_eq!(meta.ttl, Some(Duration::from_secs(3600)));
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn zero_ttl_falls_back_to_store_default() {
        let provider = Arc::new(InMemoryStore::new());
        let store = MemoryStore::new(provider.clone()).default_ttl(Duration::from_secs(90));
        store
            .remember("k", &1, RememberOptions::default().ttl(Duration::ZERO))
            .unwrap();
        store
            .remember("j", &2, RememberOptions::default().ttl(Duration::from_secs(5)))
            .unwrap();

        assert_eq!(
            provider.get("default:k").unwrap().unwrap().metadata.ttl,
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            provider.get("default:j").unwrap().unwrap().metadata.ttl,
            Some(Duration::from_secs(5))
        );

        let unset = MemoryStore::new(provider.clone()).namespace("z").default_ttl(Duration::ZERO);
        unset.remember("k", &3, RememberOptions::default()).unwrap();
        assert_eq!(
            provider.get("z:k").unwrap().unwrap().metadata.ttl,
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn events_follow_each_operation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let store = store().namespace("ev").on_event(move |e| {
            let entry = match e {
                MemoryEvent::Set { key, item } => format!("set {key} {}", item.content),
                MemoryEvent::Get { key, item } => format!("get {key} {}", item.content),
                MemoryEvent::Delete { key } => format!("delete {key}"),
                MemoryEvent::Clear => "clear".to_string(),
            };
            log.lock().unwrap().push(entry);
        });

        store.remember("k", &7, RememberOptions::default()).unwrap();
        store.recall::<i32>("k").unwrap();
        store.recall::<i32>("missing").unwrap();
        store.forget("k").unwrap();
        store.clear().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["set k 7", "get k 7", "delete k", "clear"]);
    }

    #[test]
    fn search_by_type_and_tags() {
        let store = store();
        store
            .remember("a", &"fact a", RememberOptions::default().kind("fact").tag("x").tag("y"))
            .unwrap();
        store
            .remember("b", &"fact b", RememberOptions::default().kind("fact").tag("x"))
            .unwrap();
        store
            .remember("c", &"note", RememberOptions::default().kind("note").tag("y"))
            .unwrap();

        assert_eq!(store.search_by_type("fact").unwrap(), vec![json!("fact a"), json!("fact b")]);
        assert_eq!(store.search_by_tags(&["x", "y"]).unwrap(), vec![json!("fact a")]);
        assert_eq!(store.search_by_tags(&["y"]).unwrap().len(), 2);
    }

    #[test]
    fn search_stays_in_namespace() {
        let provider = Arc::new(InMemoryStore::new());
        let a = MemoryStore::new(provider.clone()).namespace("a");
        let b = MemoryStore::new(provider).namespace("b");
        a.remember("k", &1, RememberOptions::default().kind("n")).unwrap();
        b.remember("k", &2, RememberOptions::default().kind("n")).unwrap();

        assert_eq!(a.search_by_type("n").unwrap(), vec![json!(1)]);
    }

    #[test]
    fn clear_empties_provider() {
        let store = store();
        store.remember("k", &1, RememberOptions::default()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.recall::<i32>("k").unwrap(), None);
    }

    // --- InMemoryStore ---

    #[test]
    fn expired_item_is_dropped_on_read() {
        let provider = InMemoryStore::new();
        let old = Utc::now() - TimeDelta::seconds(10);
        provider
            .set("k", item("k", "generic", &[], old, Some(Duration::from_secs(1))))
            .unwrap();

        assert_eq!(provider.get("k").unwrap(), None);
        assert!(provider.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_or_missing_ttl_never_expires() {
        let provider = InMemoryStore::new();
        let old = Utc::now() - TimeDelta::days(365);
        provider.set("a", item("a", "g", &[], old, None)).unwrap();
        provider.set("b", item("b", "g", &[], old, Some(Duration::ZERO))).unwrap();

        assert!(provider.get("a").unwrap().is_some());
        assert!(provider.get("b").unwrap().is_some());
    }

    #[test]
    fn search_skips_expired_and_filters_dates() {
        let provider = InMemoryStore::new();
        let now = Utc::now();
        let hour = TimeDelta::hours(1);
        provider
            .set("old", item("old", "g", &[], now - hour * 3, Some(Duration::from_secs(60))))
            .unwrap();
        provider.set("mid", item("mid", "g", &[], now - hour * 2, None)).unwrap();
        provider.set("new", item("new", "g", &[], now, None)).unwrap();

        let all = provider.search(&MemoryQuery::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "new"]);

        let recent = provider
            .search(&MemoryQuery {
                from: Some(now - hour),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");

        let earlier = provider
            .search(&MemoryQuery {
                to: Some(now - hour),
                ..MemoryQuery::default()
            })
            .unwrap();
        assert_eq!(earlier.len(), 1);
        assert_eq!(earlier[0].id, "mid");
    }

    #[test]
    fn metadata_serializes_kind_as_type() {
        let meta = item("x", "fact", &["t"], Utc::now(), None).metadata;
        let v = serde_json::to_value(meta).unwrap();
        assert_eq!(v["type"], json!("fact"));
        assert!(v.get("ttl").is_none());
    }
}
