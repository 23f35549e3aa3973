//! Session entry store
//!
//! A [`Session`] owns every entry of one test recording. Entries live in a
//! concurrent map keyed by index; an append-only log of indices preserves the
//! order in which they were recorded. The map holds the only copy of each
//! entry, so the two views cannot disagree. Indices are allocated under the
//! log's lock, which keeps recording order and index order identical.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use static_assertions::assert_impl_all;
use tracing::{debug, error, info, warn};

use crate::entry::{self, Entry};
use crate::matcher::Matcher;
use crate::sanitizer::{Sanitizer, SanitizerPipeline};
use crate::{CassetteError, Result};

/// Case-insensitive variable map used for deterministic substitution
///
/// The first spelling of a name is kept; later writes under any casing
/// replace the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    // lowercased name -> (name as first written, value)
    map: BTreeMap<String, (String, String)>,
}

impl Variables {
    /// Create an empty variable map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.map.get_mut(&name.to_lowercase()) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.map.insert(name.to_lowercase(), (name, value));
                None
            }
        }
    }

    /// Get a variable by name, ignoring case
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(&name.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Remove a variable, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.map
            .remove(&name.to_lowercase())
            .map(|(_, value)| value)
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether there are no variables
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over `(name, value)` pairs, ordered by name ignoring case
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut variables = Self::new();
        for (name, value) in iter {
            variables.insert(name, value);
        }
        variables
    }
}

/// In-memory store for one test session's recorded entries
#[derive(Debug, Default)]
pub struct Session {
    entries: DashMap<u64, Arc<Entry>>,
    order: Mutex<Vec<u64>>,
    next_index: AtomicU64,
    // Held for a whole session-wide rewrite so concurrent rewrites cannot
    // overwrite each other's results
    rewrite: Mutex<()>,
    variables: RwLock<Variables>,
    // Read from older cassettes only; never written back
    names: Mutex<HashMap<String, VecDeque<String>>>,
}

assert_impl_all!(Session: Send, Sync);

impl Session {
    /// Create an empty session for recording
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a session from loaded parts
    ///
    /// Each entry's index becomes its position in `entries`.
    pub(crate) fn from_parts(
        entries: Vec<Entry>,
        variables: Variables,
        names: HashMap<String, VecDeque<String>>,
    ) -> Self {
        let session = Self {
            entries: DashMap::with_capacity(entries.len()),
            order: Mutex::new(Vec::with_capacity(entries.len())),
            next_index: AtomicU64::new(0),
            rewrite: Mutex::new(()),
            variables: RwLock::new(variables),
            names: Mutex::new(names),
        };

        let mut order = session.order_log();
        for (position, mut entry) in entries.into_iter().enumerate() {
            let index = position as u64;
            entry.index = index;
            entry.removed = false;
            session.entries.insert(index, Arc::new(entry));
            order.push(index);
        }
        session
            .next_index
            .store(order.len() as u64, Ordering::Relaxed);
        drop(order);

        session
    }

    /// Record an entry, returning its newly assigned index
    ///
    /// JSON bodies are compacted first so the stored entry is exactly what a
    /// reload of the cassette would produce.
    ///
    /// # Errors
    ///
    /// Returns `IndexConflict` if the allocated index is already taken. That
    /// can only happen if the session's invariants were broken.
    pub fn record(&self, mut entry: Entry) -> Result<u64> {
        entry.normalize_bodies();
        entry.removed = false;

        let uri = entry.request.uri.clone();

        let mut order = self.order_log();
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        entry.index = index;
        match self.entries.entry(index) {
            Slot::Occupied(_) => {
                error!("Unable to add entry for {} at index {}", uri, index);
                return Err(CassetteError::IndexConflict(index));
            }
            Slot::Vacant(slot) => {
                slot.insert(Arc::new(entry));
            }
        }
        order.push(index);
        drop(order);

        debug!("Recorded entry {}: {}", index, uri);
        Ok(index)
    }

    /// Find the stored entry answering `request`
    ///
    /// `sanitizers` run over a copy of `request` first, so it is compared in
    /// the same form the stored entries were persisted in. With `remove`, the
    /// match is consumed and no later lookup will return it.
    ///
    /// # Errors
    ///
    /// Returns `NoMatchFound` if no unconsumed entry matches, a matcher's
    /// `AmbiguousMatch`, or a sanitizer failure
    pub fn lookup(
        &self,
        request: &Entry,
        matcher: &dyn Matcher,
        sanitizers: &SanitizerPipeline,
        remove: bool,
    ) -> Result<Entry> {
        let mut working = request.clone();
        sanitizers.apply_entry(&mut working, &self.variables())?;
        entry::normalize_body(&mut working.request);

        loop {
            let snapshot = self.unremoved_entries();
            let candidates: Vec<&Entry> = snapshot.iter().map(Arc::as_ref).collect();
            let mut matched = match matcher.find_match(&working, &candidates) {
                Ok(found) => found.clone(),
                Err(e) => {
                    warn!("Lookup failed: {}", e);
                    return Err(e);
                }
            };

            if !remove {
                return Ok(matched);
            }

            if self.consume(matched.index) {
                debug!(
                    "Consumed entry {}: {} {}",
                    matched.index, matched.request.method, matched.request.uri
                );
                matched.removed = true;
                return Ok(matched);
            }

            // Another lookup consumed it between snapshot and claim
            debug!("Entry {} already consumed, retrying", matched.index);
        }
    }

    /// Mark the stored entry with `entry`'s index as removed
    ///
    /// Does nothing if it is already removed or the index is unknown.
    pub fn remove(&self, entry: &Entry) {
        if self.consume(entry.index) {
            debug!("Removed entry {}", entry.index);
        }
    }

    /// Apply one sanitizer to the whole session
    ///
    /// # Errors
    ///
    /// Returns the sanitizer's error; no entry is changed in that case
    pub fn sanitize(&self, sanitizer: &dyn Sanitizer) -> Result<()> {
        sanitizer.sanitize_session(self)?;
        debug!("Applied sanitizer '{}'", sanitizer.name());
        Ok(())
    }

    /// Apply every sanitizer of a pipeline, in order
    ///
    /// # Errors
    ///
    /// Stops at and returns the first sanitizer error
    pub fn sanitize_all(&self, sanitizers: &SanitizerPipeline) -> Result<()> {
        for sanitizer in sanitizers.iter() {
            self.sanitize(sanitizer.as_ref())?;
        }
        info!(
            "Sanitized session with {} sanitizers ({} entries)",
            sanitizers.len(),
            self.remaining()
        );
        Ok(())
    }

    /// Rewrite all unremoved entries in recording order
    ///
    /// `rewrite` works on copies; they are stored back only if it succeeds,
    /// so a failed rewrite leaves every entry as it was. Rewrites run one at
    /// a time; recording and lookup are not blocked by them.
    ///
    /// # Errors
    ///
    /// Returns whatever `rewrite` returns
    pub fn rewrite_entries<F>(&self, rewrite: F) -> Result<()>
    where
        F: FnOnce(&mut [Entry], &Variables) -> Result<()>,
    {
        let _guard = self
            .rewrite
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let variables = self.variables();
        let mut working = self.entries();
        rewrite(&mut working, &variables)?;

        for updated in working {
            if let Some(mut stored) = self.entries.get_mut(&updated.index) {
                if !stored.removed {
                    let target = Arc::make_mut(stored.value_mut());
                    target.request = updated.request;
                    target.response = updated.response;
                }
            }
        }
        Ok(())
    }

    /// Unremoved entries in recording order
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        let order = self.order_log().clone();
        order
            .iter()
            .filter_map(|index| self.entries.get(index))
            .filter(|entry| !entry.removed)
            .map(|entry| Entry::clone(entry.value()))
            .collect()
    }

    /// Entry with the given index, removed or not
    #[must_use]
    pub fn entry(&self, index: u64) -> Option<Entry> {
        self.entries.get(&index).map(|entry| Entry::clone(entry.value()))
    }

    /// Total number of entries, including removed ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries not yet removed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.removed).count()
    }

    /// Index the next recorded entry will receive
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::Relaxed)
    }

    /// Set a session variable
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    /// Get a session variable, ignoring case
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(str::to_string)
    }

    /// Snapshot of all session variables
    #[must_use]
    pub fn variables(&self) -> Variables {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the next value queued under `name` by an older cassette format
    pub fn dequeue_name(&self, name: &str) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(name)
            .and_then(VecDeque::pop_front)
    }

    /// Number of legacy name queues loaded
    #[must_use]
    pub fn names_len(&self) -> usize {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Shared handles to unremoved entries, ordered by index
    fn unremoved_entries(&self) -> Vec<Arc<Entry>> {
        let mut candidates: Vec<Arc<Entry>> = self
            .entries
            .iter()
            .filter(|entry| !entry.removed)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        candidates.sort_by_key(|entry| entry.index);
        candidates
    }

    /// Flip an entry's removed flag; true only for the caller that flipped it
    fn consume(&self, index: u64) -> bool {
        match self.entries.get_mut(&index) {
            Some(mut entry) if !entry.removed => {
                Arc::make_mut(entry.value_mut()).removed = true;
                true
            }
            _ => false,
        }
    }

    fn order_log(&self) -> MutexGuard<'_, Vec<u64>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
