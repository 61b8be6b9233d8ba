use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::{info, warn};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{BookingStore, InMemoryStore, PeriodSnapshot, StateUpdate, StoreError};

fn wal_error(e: std::io::Error) -> StoreError {
    StoreError::Wal(e.to_string())
}

/// An `InMemoryStore` whose every mutation is logged before it is applied.
///
/// Writers serialize on the WAL lock, so check, append and apply happen as
/// one step. Readers go straight to the tables.
pub struct DurableStore {
    inner: InMemoryStore,
    wal: Mutex<Wal>,
}

impl DurableStore {
    /// Open the log at `path`, creating it if needed, and replay it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let events = Wal::replay(path).map_err(wal_error)?;
        let inner = InMemoryStore::new();
        for event in &events {
            inner.apply_event(event);
        }
        info!(path = %path.display(), events = events.len(), "replayed WAL");

        let wal = Wal::open(path).map_err(wal_error)?;
        Ok(Self {
            inner,
            wal: Mutex::new(wal),
        })
    }

    /// Read access to the tables and reporting queries.
    pub fn tables(&self) -> &InMemoryStore {
        &self.inner
    }

    fn lock_wal(&self) -> Result<MutexGuard<'_, Wal>, StoreError> {
        self.wal
            .lock()
            .map_err(|_| StoreError::Wal("WAL lock poisoned".into()))
    }

    fn flush(wal: &mut Wal, batch: usize) -> Result<(), StoreError> {
        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch as f64);
        let flush_start = Instant::now();
        let result = wal.flush_sync().map_err(wal_error);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
        result
    }

    fn persist(&self, event: Event) -> Result<(), StoreError> {
        let mut wal = self.lock_wal()?;
        self.inner.check_event(&event)?;
        wal.append_buffered(&event).map_err(wal_error)?;
        Self::flush(&mut wal, 1)?;
        self.inner.apply_event(&event);
        Ok(())
    }

    // ── Mutations ────────────────────────────────────────────

    pub fn create_period(&self, period: Period) -> Result<(), StoreError> {
        self.persist(Event::PeriodCreated(period))
    }

    pub fn create_occasion(&self, occasion: Occasion) -> Result<(), StoreError> {
        self.persist(Event::OccasionCreated(occasion))
    }

    pub fn create_attendee(&self, attendee: Attendee) -> Result<(), StoreError> {
        self.persist(Event::AttendeeCreated(attendee))
    }

    pub fn create_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.persist(Event::BookingCreated(booking))
    }

    pub fn set_priority(&self, id: Ulid, priority: i32) -> Result<(), StoreError> {
        self.persist(Event::BookingPriorityChanged { id, priority })
    }

    pub fn cancel_booking(&self, id: Ulid) -> Result<(), StoreError> {
        self.persist(Event::BookingCancelled { id })
    }

    /// Log a whole catalog with a single fsync. Stops at the first invalid
    /// record; the records before it are kept.
    ///
    /// Records are applied as they are staged so later ones can reference
    /// earlier ones. If the batch then fails to reach the disk, the tables are
    /// rebuilt from the log.
    pub fn import(&self, catalog: Catalog) -> Result<usize, StoreError> {
        let mut wal = self.lock_wal()?;
        let mut imported = 0;
        let mut failure = None;

        for event in catalog.into_events() {
            if let Err(e) = self.inner.check_event(&event) {
                failure = Some(e);
                break;
            }
            if let Err(e) = wal.append_buffered(&event) {
                return Err(self.restore(&wal, wal_error(e)));
            }
            self.inner.apply_event(&event);
            imported += 1;
        }

        // flush even on failure so the accepted prefix is durable
        if let Err(e) = Self::flush(&mut wal, imported) {
            return Err(self.restore(&wal, e));
        }
        match failure {
            Some(e) => Err(e),
            None => {
                info!(imported, "catalog imported");
                Ok(imported)
            }
        }
    }

    /// Rebuild the tables from the log after a rolled back batch left them
    /// ahead of it. Returns `cause`, or the replay error if that fails too.
    fn restore(&self, wal: &Wal, cause: StoreError) -> StoreError {
        let events = match Wal::replay(wal.path()) {
            Ok(events) => events,
            Err(e) => return wal_error(e),
        };
        self.inner.clear();
        for event in &events {
            self.inner.apply_event(event);
        }
        warn!(events = events.len(), "tables rebuilt from WAL: {cause}");
        cause
    }

    /// Rewrite the log as the minimal event list for the current state.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut wal = self.lock_wal()?;
        let before = wal.appends_since_compact();
        let events = self.inner.snapshot_events();
        Wal::write_compact_file(wal.path(), &events)
            .and_then(|()| wal.swap_compact_file())
            .map_err(wal_error)?;
        info!(events = events.len(), appends_dropped = before, "compacted WAL");
        Ok(())
    }

    pub fn appends_since_compact(&self) -> Result<u64, StoreError> {
        Ok(self.lock_wal()?.appends_since_compact())
    }
}

impl BookingStore for DurableStore {
    fn load_period(&self, period_id: Ulid) -> Result<PeriodSnapshot, StoreError> {
        self.inner.load_period(period_id)
    }

    /// One `StatesAssigned` record per run: a torn write loses the whole run
    /// and never half of it.
    fn apply_states(&self, period_id: Ulid, update: &StateUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        self.persist(Event::StatesAssigned {
            period_id,
            open: update.open.clone(),
            accepted: update.accepted.clone(),
            blocked: update.blocked.clone(),
        })
    }
}
