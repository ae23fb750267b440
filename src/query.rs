//! Windowed, filtered, sorted views over the collection.
//!
//! A view never patches its window in place. Anything that could change which
//! records fall in the window (a create, a delete, a change to a filtered or
//! sort field) marks it stale, and the next refresh re-queries the server.

use crate::client::Gateway;
use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use crate::feed::ChangeEvent;
use crate::records::RecordStore;
use crate::remote::{DeleteOutcome, ListFilters, ListQuery, SortOrder};
use crate::types::{Field, RecordId, VideoFields, VideoRecord};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A local mutation the view may need to react to.
#[derive(Clone, Debug)]
pub enum Mutation {
    Created(RecordId),
    Deleted(RecordId),
    Updated {
        id: RecordId,
        fields: BTreeSet<Field>,
    },
}

impl Mutation {
    pub fn created(record: &VideoRecord) -> Self {
        Mutation::Created(record.id.clone())
    }

    /// An accepted update touching the fields that were sent.
    pub fn updated(id: &RecordId, fields: &VideoFields) -> Self {
        Mutation::Updated {
            id: id.clone(),
            fields: fields.changed_fields(),
        }
    }
}

impl From<&DeleteOutcome> for Mutation {
    fn from(outcome: &DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::SoftDeleted(tombstone) => Mutation::Deleted(tombstone.id.clone()),
            DeleteOutcome::HardDeleted { id, .. } => Mutation::Deleted(id.clone()),
        }
    }
}

/// One loaded window.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewPage {
    pub records: Vec<VideoRecord>,
    pub total: u64,
    pub total_pages: u32,
    pub page: u32,
    pub page_size: u32,
}

impl ViewPage {
    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }
}

struct ViewState {
    query: ListQuery,
    current: Option<ViewPage>,
    stale: bool,
    torn_down: bool,
}

/// Maintains one paginated view and decides when it must be re-queried.
pub struct QueryCoordinator {
    gateway: Gateway,
    store: Arc<RecordStore>,
    max_page_size: u32,
    state: Mutex<ViewState>,
    /// Bumped whenever the request changes or the view is torn down, so
    /// responses for an older request are discarded on arrival.
    generation: AtomicU64,
}

impl QueryCoordinator {
    pub fn new(gateway: Gateway, store: Arc<RecordStore>, config: &ClientConfig) -> Self {
        Self {
            gateway,
            store,
            max_page_size: config.max_page_size,
            state: Mutex::new(ViewState {
                query: ListQuery {
                    page: 1,
                    limit: config.default_page_size,
                    filters: ListFilters::default(),
                    sort: SortOrder::default(),
                },
                current: None,
                stale: true,
                torn_down: false,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn query(&self) -> ListQuery {
        self.state.lock().query.clone()
    }

    pub fn page(&self) -> u32 {
        self.state.lock().query.page
    }

    pub fn current(&self) -> Option<ViewPage> {
        self.state.lock().current.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    fn change_request<F>(&self, change: F)
    where
        F: FnOnce(&mut ListQuery),
    {
        let mut state = self.state.lock();
        change(&mut state.query);
        state.stale = true;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Replace the filters. Always returns to page 1.
    pub fn set_filters(&self, filters: ListFilters) {
        self.change_request(|query| {
            query.filters = filters;
            query.page = 1;
        });
    }

    /// Move to another page. Filters and sort are kept.
    pub fn set_page(&self, page: u32) -> Result<()> {
        if page == 0 {
            return Err(SyncError::Validation("pages start at 1".into()));
        }
        self.change_request(|query| query.page = page);
        Ok(())
    }

    /// Change the window size. Returns to page 1.
    pub fn set_page_size(&self, page_size: u32) -> Result<()> {
        if page_size == 0 || page_size > self.max_page_size {
            return Err(SyncError::Validation(format!(
                "page size must be between 1 and {}",
                self.max_page_size
            )));
        }
        self.change_request(|query| {
            query.limit = page_size;
            query.page = 1;
        });
        Ok(())
    }

    /// Change the ordering. The page number is kept.
    pub fn set_sort(&self, sort: SortOrder) {
        self.change_request(|query| query.sort = sort);
    }

    /// Note a local mutation. Returns true if the view is now stale.
    pub fn on_local_mutation(&self, mutation: &Mutation) -> bool {
        let mut state = self.state.lock();
        let affects = match mutation {
            Mutation::Created(_) | Mutation::Deleted(_) => true,
            Mutation::Updated { fields, .. } => {
                let filtered = state.query.filters.filtered_fields();
                fields.iter().any(|f| filtered.contains(f))
                    || state.query.sort.field.affected_by(fields)
            }
        };
        if affects {
            debug!(?mutation, "view membership may have changed");
            state.stale = true;
        }
        affects
    }

    /// Note a change arriving from another writer.
    ///
    /// Inserts and deletes always invalidate. An update invalidates if the
    /// record is in the window now, matches the filters after the change, or
    /// may have matched them before it. Call this before the event is folded
    /// into the store; once the store holds the new state the previous one is
    /// unknown and the update is assumed to affect the view.
    pub fn on_change_event(&self, event: &ChangeEvent) -> bool {
        let mut state = self.state.lock();
        let affects = match event {
            ChangeEvent::Insert { .. } | ChangeEvent::Delete { .. } => true,
            ChangeEvent::Update { record } => {
                let in_window = state
                    .current
                    .as_ref()
                    .map(|page| page.contains(&record.id))
                    .unwrap_or(false);
                in_window
                    || state.query.filters.matches(record)
                    || self.matched_before(record, &state.query.filters)
            }
        };
        if affects {
            debug!(kind = event.kind(), id = %event.id(), "view membership may have changed");
            state.stale = true;
        }
        affects
    }

    /// Whether the state preceding `update` may have matched `filters`.
    fn matched_before(&self, update: &VideoRecord, filters: &ListFilters) -> bool {
        match self.store.confirmed(&update.id) {
            Some(held) if held.version < update.version => filters.matches(&held),
            // Older than what is held; the store will drop it.
            Some(held) if held.version > update.version => false,
            _ => true,
        }
    }

    /// Re-query the server for the current request.
    ///
    /// Returns `None` if the request changed or the view was torn down while
    /// the query was in flight; the response is then discarded, though its
    /// records still go through the store's version check.
    pub async fn refresh(&self) -> Result<Option<ViewPage>> {
        let (query, generation) = {
            let state = self.state.lock();
            if state.torn_down {
                return Ok(None);
            }
            (state.query.clone(), self.generation.load(Ordering::SeqCst))
        };

        let listing = self.gateway.list(&query).await?;

        for record in &listing.records {
            self.store.accept(record.clone());
        }

        let mut state = self.state.lock();
        if state.torn_down || self.generation.load(Ordering::SeqCst) != generation {
            debug!(page = query.page, "discarding response for superseded view");
            return Ok(None);
        }

        let page = ViewPage {
            records: listing.records,
            total: listing.total,
            total_pages: listing.total_pages,
            page: query.page,
            page_size: query.limit,
        };
        state.current = Some(page.clone());
        state.stale = false;
        Ok(Some(page))
    }

    /// Refresh only if something invalidated the window.
    pub async fn refresh_if_stale(&self) -> Result<Option<ViewPage>> {
        if self.is_stale() {
            self.refresh().await
        } else {
            Ok(self.current())
        }
    }

    /// Tear the view down. In-flight responses are dropped when they arrive.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        state.torn_down = true;
        state.current = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
