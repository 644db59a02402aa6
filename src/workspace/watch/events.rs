//! Watch events, batching, and configuration.

use crate::workspace::ignore::IgnoreRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Watch mode configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Workspace root directory
    #[serde(skip)]
    pub workspace_root: PathBuf,
    /// Quiet period before a burst of events on one path is released
    pub debounce_ms: u64,
    /// Batch window in milliseconds
    pub batch_window_ms: u64,
    /// Maximum events per batch
    pub max_batch_size: usize,
    pub ignore: IgnoreRules,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            debounce_ms: 100,
            batch_window_ms: 250,
            max_batch_size: 100,
            ignore: IgnoreRules::default(),
        }
    }
}

impl WatchConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

/// Filesystem change, addressed by normalized tree path
///
/// The kind is advisory: consumers re-read the file to learn its current state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Created(String),
    Modified(String),
    Deleted(String),
}

impl ChangeEvent {
    pub fn path(&self) -> &str {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Created(_) => "created",
            ChangeEvent::Modified(_) => "modified",
            ChangeEvent::Deleted(_) => "deleted",
        }
    }

    /// Fold a later event on the same path into this one
    fn merge(self, later: ChangeEvent) -> ChangeEvent {
        match (self, later) {
            (ChangeEvent::Created(p), ChangeEvent::Modified(_)) => ChangeEvent::Created(p),
            (ChangeEvent::Deleted(p), ChangeEvent::Created(_)) => ChangeEvent::Modified(p),
            (_, later) => later,
        }
    }
}

/// Groups and debounces events, keeping one event per path
pub struct EventBatcher {
    config: WatchConfig,
    pending_events: BTreeMap<String, ChangeEvent>,
    last_event_time: BTreeMap<String, Instant>,
}

impl EventBatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            pending_events: BTreeMap::new(),
            last_event_time: BTreeMap::new(),
        }
    }

    /// Queue an event; returns `true` when the batch is full
    pub fn add_event(&mut self, event: ChangeEvent) -> bool {
        let path = event.path().to_string();
        if self.config.ignore.is_ignored(&path) {
            return false;
        }

        let merged = match self.pending_events.remove(&path) {
            Some(previous) => previous.merge(event),
            None => event,
        };
        self.pending_events.insert(path.clone(), merged);
        self.last_event_time.insert(path, Instant::now());

        self.pending_events.len() >= self.config.max_batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.pending_events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending_events.len()
    }

    /// Take every queued event, in path order
    pub fn take_batch(&mut self) -> Vec<ChangeEvent> {
        self.last_event_time.clear();
        std::mem::take(&mut self.pending_events).into_values().collect()
    }

    /// Take events whose path has been quiet for the debounce window
    pub fn take_settled(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let window = Duration::from_millis(self.config.debounce_ms);
        let settled: Vec<String> = self
            .last_event_time
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        settled
            .into_iter()
            .filter_map(|path| {
                self.last_event_time.remove(&path);
                self.pending_events.remove(&path)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batcher(max: usize) -> EventBatcher {
        EventBatcher::new(WatchConfig {
            max_batch_size: max,
            debounce_ms: 0,
            ..WatchConfig::default()
        })
    }

    #[test]
    fn test_events_on_one_path_are_merged() {
        let mut b = batcher(10);
        b.add_event(ChangeEvent::Created("a".into()));
        b.add_event(ChangeEvent::Modified("a".into()));
        b.add_event(ChangeEvent::Deleted("b".into()));
        b.add_event(ChangeEvent::Created("b".into()));
        assert_eq!(
            b.take_batch(),
            vec![ChangeEvent::Created("a".into()), ChangeEvent::Modified("b".into())]
        );
        assert!(b.is_empty());
    }

    #[test]
    fn test_ignored_paths_are_dropped() {
        let mut b = batcher(10);
        assert!(!b.add_event(ChangeEvent::Modified(".git/index".into())));
        assert!(b.is_empty());
    }

    #[test]
    fn test_full_batch_is_signalled() {
        let mut b = batcher(2);
        assert!(!b.add_event(ChangeEvent::Modified("a".into())));
        assert!(b.add_event(ChangeEvent::Modified("b".into())));
    }

    #[test]
    fn test_take_settled_respects_debounce() {
        let mut b = EventBatcher::new(WatchConfig {
            debounce_ms: 60_000,
            ..WatchConfig::default()
        });
        b.add_event(ChangeEvent::Modified("a".into()));
        assert!(b.take_settled(Instant::now()).is_empty());
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(b.take_settled(later), vec![ChangeEvent::Modified("a".into())]);
        assert!(b.is_empty());
    }
}
