//! Favorites ("Mi reserva") synchronization. A background task watches the
//! session channel and keeps one observable view of the signed-in user's
//! saved items: no remote traffic while the session is unresolved, an empty
//! inactive view while anonymous, and while authenticated one immediate bulk
//! read plus a standing subscription, both scoped to that user.

use crate::models::{FavoriteRecord, MediaItem};
use crate::session::SessionState;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const DEFAULT_FAVORITES_BASE: &str = "https://firestore.googleapis.com/v1";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FavoritesError {
    /// Bulk-read or subscription failure: logged, never propagated to views.
    #[error("favorites sync failed")]
    Sync(#[source] anyhow::Error),
    /// Save/remove failure: propagated to the caller, no automatic retry.
    #[error("favorites mutation failed")]
    Mutation(#[source] anyhow::Error),
}

/// Full current set of a user's documents: `(key, body)` pairs where the key
/// is the stringified item id and the body omits the id.
pub type Snapshot = Vec<(String, FavoriteRecord)>;

/// A standing subscription on one user's collection. Dropping it (or calling
/// `close`) releases the remote feed; the producer stops on the next tick.
pub struct Subscription {
    updates: mpsc::Receiver<Snapshot>,
}

impl Subscription {
    pub fn new(updates: mpsc::Receiver<Snapshot>) -> Self {
        Self { updates }
    }

    /// Next re-delivered full set; `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.updates.recv().await
    }

    pub fn close(self) {}
}

#[async_trait]
pub trait FavoritesCollection: Send + Sync {
    /// Upsert: overwrites an existing document at `key`, never duplicates.
    async fn write_merge(
        &self,
        user_id: &str,
        key: &str,
        record: &FavoriteRecord,
    ) -> Result<(), FavoritesError>;

    /// No-op if the document is absent.
    async fn delete(&self, user_id: &str, key: &str) -> Result<(), FavoritesError>;

    async fn list_all(&self, user_id: &str) -> Result<Snapshot, FavoritesError>;

    /// Live feed re-delivering the full current set on every remote change.
    fn subscribe(&self, user_id: &str) -> Subscription;
}

/// What rendering consumers see: the saved records plus a recomputed id set
/// so "saved / not saved" is an O(1) lookup per item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FavoritesView {
    pub records: Vec<FavoriteRecord>,
    #[serde(skip)]
    pub ids: HashSet<i32>,
}

impl FavoritesView {
    pub fn contains(&self, id: i32) -> bool {
        self.ids.contains(&id)
    }

    /// The id set in a stable order, for consumers that render it.
    pub fn sorted_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn view_from(snapshot: Snapshot) -> FavoritesView {
    let records: Vec<FavoriteRecord> = snapshot
        .into_iter()
        .map(|(key, mut record)| {
            // The id lives in the document key, not the body.
            if let Ok(id) = key.parse() {
                record.id = id;
            }
            record
        })
        .collect();
    let ids = records.iter().map(|r| r.id).collect();
    FavoritesView { records, ids }
}

pub struct FavoritesStore {
    collection: Arc<dyn FavoritesCollection>,
    view: watch::Receiver<FavoritesView>,
}

impl FavoritesStore {
    /// Spawn the sync loop. The store lives for the process lifetime; the
    /// loop exits only when the session channel is gone.
    pub fn start(
        collection: Arc<dyn FavoritesCollection>,
        sessions: watch::Receiver<SessionState>,
    ) -> Arc<Self> {
        let (view_tx, view) = watch::channel(FavoritesView::default());
        let loop_collection = collection.clone();
        tokio::spawn(async move {
            sync_loop(loop_collection, sessions, view_tx).await;
        });
        Arc::new(Self { collection, view })
    }

    pub fn view(&self) -> watch::Receiver<FavoritesView> {
        self.view.clone()
    }

    pub fn current(&self) -> FavoritesView {
        self.view.borrow().clone()
    }

    /// Snapshot-upsert `item` for `user_id`, stamping `saved_at` now. The
    /// view updates once the subscription reflects the committed write.
    pub async fn save(&self, user_id: &str, item: &MediaItem) -> Result<(), FavoritesError> {
        let record = FavoriteRecord::snapshot(item);
        self.collection
            .write_merge(user_id, &record.id.to_string(), &record)
            .await
    }

    pub async fn remove(&self, user_id: &str, item_id: i32) -> Result<(), FavoritesError> {
        self.collection
            .delete(user_id, &item_id.to_string())
            .await
    }
}

async fn sync_loop(
    collection: Arc<dyn FavoritesCollection>,
    mut sessions: watch::Receiver<SessionState>,
    view_tx: watch::Sender<FavoritesView>,
) {
    loop {
        let state = sessions.borrow_and_update().clone();
        match state {
            // Provider has not reported yet: issue no remote reads at all.
            SessionState::Unresolved => {}
            SessionState::Anonymous => {
                view_tx.send_replace(FavoritesView::default());
            }
            SessionState::Authenticated { user_id, .. } => {
                info!("Opening favorites view for user {}", user_id);
                tokio::select! {
                    _ = run_activation(collection.as_ref(), &user_id, &view_tx) => {
                        // Feed ended on its own; wait for the next session
                        // change below with the last-known view intact.
                    }
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // Cancelling the activation drops its subscription,
                        // so no updates leak into the next user's view.
                        continue;
                    }
                }
            }
        }
        if sessions.changed().await.is_err() {
            return;
        }
    }
}

/// One authenticated activation: bulk read + standing subscription, both
/// writing the same view. A bulk-read result that arrives after the first
/// subscription push is discarded; the push is at least as fresh.
async fn run_activation(
    collection: &dyn FavoritesCollection,
    user_id: &str,
    view_tx: &watch::Sender<FavoritesView>,
) {
    let mut subscription = collection.subscribe(user_id);
    let bulk = collection.list_all(user_id);
    tokio::pin!(bulk);

    let mut bulk_pending = true;
    let mut pushed = false;
    loop {
        tokio::select! {
            result = &mut bulk, if bulk_pending => {
                bulk_pending = false;
                match result {
                    Ok(snapshot) if !pushed => {
                        view_tx.send_replace(view_from(snapshot));
                    }
                    Ok(_) => {
                        debug!("Discarding bulk read; subscription already delivered");
                    }
                    // Stale-but-available beats empty: keep the last view.
                    Err(e) => warn!("Favorites bulk read failed for {}: {e:#}", user_id),
                }
            }
            delivered = subscription.next() => {
                match delivered {
                    Some(snapshot) => {
                        pushed = true;
                        view_tx.send_replace(view_from(snapshot));
                    }
                    None => {
                        warn!("Favorites subscription for {} ended", user_id);
                        return;
                    }
                }
            }
        }
    }
}

/// Per-user keyed document store over the document service's REST surface.
/// The live subscription is change polling that re-delivers the full set.
pub struct RestFavoritesCollection {
    client: Client,
    base: String,
    project_id: String,
}

impl RestFavoritesCollection {
    pub fn from_env() -> anyhow::Result<Self> {
        let project_id =
            env::var("FAVORITES_PROJECT_ID").context("FAVORITES_PROJECT_ID not set")?;
        let base =
            env::var("FAVORITES_BASE").unwrap_or_else(|_| DEFAULT_FAVORITES_BASE.to_string());
        Ok(Self {
            client: Client::new(),
            base,
            project_id,
        })
    }

    fn collection_url(&self, user_id: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/users/{}/favorites",
            self.base, self.project_id, user_id
        )
    }

    async fn fetch_all(&self, user_id: &str) -> anyhow::Result<Snapshot> {
        let res = self
            .client
            .get(self.collection_url(user_id))
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("listing favorites -> {}", text));
        }
        let parsed: Value = serde_json::from_str(&text).context("JSON parse failed")?;
        let documents = parsed
            .get("documents")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        let mut snapshot = Snapshot::new();
        for doc in &documents {
            let Some(key) = doc
                .get("name")
                .and_then(|n| n.as_str())
                .and_then(|n| n.rsplit('/').next())
            else {
                continue;
            };
            match decode_fields(doc.get("fields").unwrap_or(&Value::Null)) {
                Ok(record) => snapshot.push((key.to_string(), record)),
                Err(e) => warn!("Skipping undecodable favorite {}: {e:#}", key),
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl FavoritesCollection for RestFavoritesCollection {
    async fn write_merge(
        &self,
        user_id: &str,
        key: &str,
        record: &FavoriteRecord,
    ) -> Result<(), FavoritesError> {
        // updateMask over every written field gives merge-overwrite
        // semantics: the write succeeds whether or not the document exists.
        let fields = encode_fields(record);
        let mask: Vec<String> = fields
            .as_object()
            .map(|m| m.keys().map(|k| format!("updateMask.fieldPaths={k}")).collect())
            .unwrap_or_default();
        let url = format!(
            "{}/{}?{}",
            self.collection_url(user_id),
            key,
            mask.join("&")
        );
        let res = self
            .client
            .patch(&url)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| FavoritesError::Mutation(e.into()))?;
        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(FavoritesError::Mutation(anyhow!(
                "saving favorite {key} -> {text}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, key: &str) -> Result<(), FavoritesError> {
        let url = format!("{}/{}", self.collection_url(user_id), key);
        let res = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| FavoritesError::Mutation(e.into()))?;
        // Deleting an absent document is a successful no-op.
        if !res.status().is_success() && res.status() != reqwest::StatusCode::NOT_FOUND {
            let text = res.text().await.unwrap_or_default();
            return Err(FavoritesError::Mutation(anyhow!(
                "removing favorite {key} -> {text}"
            )));
        }
        Ok(())
    }

    async fn list_all(&self, user_id: &str) -> Result<Snapshot, FavoritesError> {
        self.fetch_all(user_id).await.map_err(FavoritesError::Sync)
    }

    fn subscribe(&self, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(8);
        let poller = Self {
            client: self.client.clone(),
            base: self.base.clone(),
            project_id: self.project_id.clone(),
        };
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            let mut last: Option<Snapshot> = None;
            loop {
                if tx.is_closed() {
                    return;
                }
                match poller.fetch_all(&user_id).await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            if tx.send(snapshot).await.is_err() {
                                return;
                            }
                        }
                    }
                    // Keep the last delivered set; the consumer stays on
                    // its last-known-good view.
                    Err(e) => warn!("Favorites poll failed for {}: {e:#}", user_id),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
        Subscription::new(rx)
    }
}

fn encode_fields(record: &FavoriteRecord) -> Value {
    let mut fields = serde_json::Map::new();
    fields.insert(
        "media_type".to_string(),
        json!({ "stringValue": record.media_type.as_str() }),
    );
    if let Some(title) = &record.title {
        fields.insert("title".to_string(), json!({ "stringValue": title }));
    }
    if let Some(name) = &record.name {
        fields.insert("name".to_string(), json!({ "stringValue": name }));
    }
    if let Some(overview) = &record.overview {
        fields.insert("overview".to_string(), json!({ "stringValue": overview }));
    }
    if let Some(poster) = &record.poster_path {
        fields.insert("poster_path".to_string(), json!({ "stringValue": poster }));
    }
    fields.insert(
        "savedAt".to_string(),
        json!({ "integerValue": record.saved_at.to_string() }),
    );
    Value::Object(fields)
}

fn decode_fields(fields: &Value) -> anyhow::Result<FavoriteRecord> {
    fn string_field(fields: &Value, key: &str) -> Option<String> {
        fields
            .get(key)
            .and_then(|f| f.get("stringValue"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    let media_type = match string_field(fields, "media_type").as_deref() {
        Some("movie") => crate::models::MediaType::Movie,
        Some("tv") => crate::models::MediaType::Series,
        other => return Err(anyhow!("unknown media_type {:?}", other)),
    };
    let saved_at = match fields
        .get("savedAt")
        .and_then(|f| f.get("integerValue"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
    {
        Some(millis) => millis,
        None => {
            warn!("Favorite without a usable savedAt stamp; treating as epoch");
            0
        }
    };

    Ok(FavoriteRecord {
        // Recovered from the document key by the reader.
        id: 0,
        media_type,
        title: string_field(fields, "title"),
        name: string_field(fields, "name"),
        overview: string_field(fields, "overview"),
        poster_path: string_field(fields, "poster_path"),
        saved_at,
    })
}
