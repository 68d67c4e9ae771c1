//! Scripted in-memory remote shared by the integration tests.
//!
//! Calls can be held open and released one by one, in any order, so tests
//! can control exactly how concurrent resolutions interleave.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use lifefeed::engine::{Confirm, ConfirmAction, FeedEngine};
use lifefeed::model::{
    Cursor, DetailRecord, FeedContext, FeedItem, ItemId, ItemType, Page, SourceError,
};
use lifefeed::source::{DetailSource, FeedMutations, FeedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Page,
    Pinned,
    Pin,
    Delete,
    Edit,
    Detail,
}

#[derive(Default)]
struct RemoteState {
    pages: HashMap<(String, Option<String>), Page>,
    pinned: HashMap<String, Vec<FeedItem>>,
    server_pins: HashSet<String>,
    /// Server-reported pin state overriding the toggled one, per call.
    pin_answers: VecDeque<bool>,
    failures: HashMap<Op, VecDeque<SourceError>>,
    held: HashSet<Op>,
    waiting: HashMap<Op, Vec<Option<oneshot::Sender<()>>>>,
    calls: HashMap<Op, usize>,
    cursors: Vec<Option<String>>,
    deleted: Vec<(ItemType, String)>,
    edits: Vec<serde_json::Value>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// Serve `page` for `cursor` in the main feed.
    pub fn set_page(&self, cursor: Option<&str>, page: Page) {
        self.set_context_page("main", cursor, page);
    }

    pub fn set_context_page(&self, context: &str, cursor: Option<&str>, page: Page) {
        self.lock()
            .pages
            .insert((context.to_string(), cursor.map(str::to_string)), page);
    }

    pub fn set_pinned(&self, context: &str, items: Vec<FeedItem>) {
        let mut state = self.lock();
        for item in &items {
            state.server_pins.insert(item.id.to_string());
        }
        state.pinned.insert(context.to_string(), items);
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: Op, error: SourceError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Report `pinned` from the next pin toggle regardless of server state.
    pub fn answer_pin(&self, pinned: bool) {
        self.lock().pin_answers.push_back(pinned);
    }

    /// Park every following call of `op` until released.
    pub fn hold(&self, op: Op) {
        self.lock().held.insert(op);
    }

    /// Let the `index`-th held call of `op` finish.
    pub fn release(&self, op: Op, index: usize) {
        let sender = self
            .lock()
            .waiting
            .get_mut(&op)
            .and_then(|w| w.get_mut(index))
            .and_then(Option::take);
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Release everything parked for `op` and stop holding it.
    pub fn release_all(&self, op: Op) {
        let mut state = self.lock();
        state.held.remove(&op);
        if let Some(waiting) = state.waiting.get_mut(&op) {
            for sender in waiting.iter_mut().filter_map(Option::take) {
                let _ = sender.send(());
            }
        }
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Yield until `op` has been called `n` times.
    pub async fn wait_for_calls(&self, op: Op, n: usize) {
        for _ in 0..10_000 {
            if self.calls(op) >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{op:?} was called {} times, expected {n}", self.calls(op));
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.lock().cursors.clone()
    }

    pub fn deleted(&self) -> Vec<(ItemType, String)> {
        self.lock().deleted.clone()
    }

    pub fn edits(&self) -> Vec<serde_json::Value> {
        self.lock().edits.clone()
    }

    /// Count the call, take its scripted failure and register a gate if held.
    fn begin(state: &mut RemoteState, op: Op) -> (Option<SourceError>, Option<oneshot::Receiver<()>>) {
        *state.calls.entry(op).or_default() += 1;
        let failure = state.failures.get_mut(&op).and_then(VecDeque::pop_front);
        let gate = if state.held.contains(&op) {
            let (tx, rx) = oneshot::channel();
            state.waiting.entry(op).or_default().push(Some(tx));
            Some(rx)
        } else {
            None
        };
        (failure, gate)
    }

    async fn park(gate: Option<oneshot::Receiver<()>>) {
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }

    /// Answer a call with `answer`, computed when the call arrives.
    async fn respond<T>(
        &self,
        op: Op,
        answer: impl FnOnce(&mut RemoteState) -> Result<T, SourceError>,
    ) -> Result<T, SourceError> {
        let (result, gate) = {
            let mut state = self.lock();
            let (failure, gate) = Self::begin(&mut state, op);
            let result = match failure {
                Some(error) => Err(error),
                None => answer(&mut state),
            };
            (result, gate)
        };
        Self::park(gate).await;
        result
    }

    fn find(state: &RemoteState, pred: impl Fn(&FeedItem) -> bool) -> Option<FeedItem> {
        state
            .pages
            .values()
            .flat_map(|page| page.items.iter())
            .chain(state.pinned.values().flatten())
            .find(|item| pred(item))
            .cloned()
    }
}

#[async_trait]
impl FeedSource for FakeRemote {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        context: &FeedContext,
    ) -> Result<Page, SourceError> {
        let cursor = cursor.map(|c| c.0.clone());
        let context = context.to_string();
        self.respond(Op::Page, move |state| {
            state.cursors.push(cursor.clone());
            Ok(state
                .pages
                .get(&(context, cursor))
                .cloned()
                .unwrap_or_default())
        })
        .await
    }

    async fn fetch_pinned(&self, context: &FeedContext) -> Result<Vec<FeedItem>, SourceError> {
        self.respond(Op::Pinned, |state| {
            Ok(state
                .pinned
                .get(context.as_str())
                .cloned()
                .unwrap_or_default())
        })
        .await
    }
}

#[async_trait]
impl FeedMutations for FakeRemote {
    async fn toggle_pin(
        &self,
        id: &ItemId,
        _item_type: ItemType,
        _context: &FeedContext,
    ) -> Result<FeedItem, SourceError> {
        self.respond(Op::Pin, |state| {
            let mut item = Self::find(state, |item| &item.id == id).ok_or(SourceError::NotFound)?;
            let key = id.to_string();
            let now_pinned = if state.server_pins.remove(&key) {
                false
            } else {
                state.server_pins.insert(key);
                true
            };
            item.pinned = state.pin_answers.pop_front().unwrap_or(now_pinned);
            Ok(item)
        })
        .await
    }

    async fn delete_item(&self, source_id: &str, item_type: ItemType) -> Result<(), SourceError> {
        self.respond(Op::Delete, |state| {
            state.deleted.push((item_type, source_id.to_string()));
            Ok(())
        })
        .await
    }

    async fn edit_item(
        &self,
        item_type: ItemType,
        payload: &serde_json::Value,
    ) -> Result<FeedItem, SourceError> {
        self.respond(Op::Edit, |state| {
            state.edits.push(payload.clone());
            let source_id = payload["source_id"].as_str().unwrap_or_default();
            let mut item = Self::find(state, |item| item.is_record(item_type, source_id))
                .ok_or(SourceError::NotFound)?;
            if let Some(title) = payload["title"].as_str() {
                item.title = title.to_string();
            }
            item.updated_at = ts(3_600);
            Ok(item)
        })
        .await
    }
}

#[async_trait]
impl DetailSource for FakeRemote {
    async fn fetch_full(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<DetailRecord, SourceError> {
        self.respond(Op::Detail, |state| {
            let call = state.calls.get(&Op::Detail).copied().unwrap_or(0);
            Ok(DetailRecord {
                item_type,
                source_id: source_id.to_string(),
                updated_at: ts(0),
                body: serde_json::json!({ "source_id": source_id, "call": call }),
            })
        })
        .await
    }
}

/// Answers every prompt with a fixed choice and remembers what was asked.
pub struct RecordingConfirm {
    answer: bool,
    asked: Mutex<Vec<ConfirmAction>>,
}

impl RecordingConfirm {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn asked(&self) -> Vec<ConfirmAction> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirm for RecordingConfirm {
    async fn confirm(&self, action: &ConfirmAction) -> bool {
        self.asked.lock().unwrap().push(action.clone());
        self.answer
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200 + offset_secs, 0).unwrap()
}

pub fn typed_item(id: &str, item_type: ItemType, pinned: bool) -> FeedItem {
    FeedItem {
        id: id.into(),
        item_type,
        source_id: format!("src-{id}"),
        title: format!("Item {id}"),
        created_at: ts(0),
        updated_at: ts(0),
        pinned,
        feed_context: FeedContext::main(),
        extra_fields: serde_json::json!({}),
    }
}

pub fn item(id: &str, pinned: bool) -> FeedItem {
    typed_item(id, ItemType::Notes, pinned)
}

pub fn page(ids: &[&str], next: Option<&str>) -> Page {
    Page {
        items: ids.iter().map(|id| item(id, false)).collect(),
        next_cursor: next.map(|c| Cursor(c.to_string())),
    }
}

pub fn ids(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|item| item.id.to_string()).collect()
}

pub fn engine(remote: &Arc<FakeRemote>) -> FeedEngine {
    let engine = FeedEngine::from_source(remote.clone()).build();
    engine.open_feed(&FeedContext::main()).unwrap();
    engine
}

/// Main feed with pinned A, B and pages C, D, E, already loaded.
pub async fn pinned_scenario() -> (Arc<FakeRemote>, FeedEngine) {
    let remote = FakeRemote::new();
    remote.set_pinned("main", vec![item("A", true), item("B", true)]);
    remote.set_page(None, page(&["C", "D", "E"], None));
    let engine = engine(&remote);
    engine.load_pinned(&FeedContext::main()).await.unwrap();
    engine.fetch_next_page(&FeedContext::main()).await.unwrap();
    (remote, engine)
}

pub fn main_feed() -> FeedContext {
    FeedContext::main()
}
