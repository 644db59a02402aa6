//! notify-backed change feed.
//!
//! Converts raw notify events into `ChangeEvent`s keyed by tree path and exposes
//! them as a `Stream`.

use super::events::ChangeEvent;
use crate::error::SyncError;
use crate::tree::path::relative_key;
use crate::workspace::ignore::IgnoreRules;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::Stream;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Live change feed for one workspace directory
///
/// Dropping the feed stops the underlying watcher.
pub struct WatchFeed {
    _watcher: RecommendedWatcher,
    events: UnboundedReceiver<ChangeEvent>,
}

impl WatchFeed {
    pub fn start(root: &Path, ignore: IgnoreRules) -> Result<Self, SyncError> {
        let root: PathBuf = dunce::canonicalize(root)?;
        let (tx, rx) = unbounded();

        let handler_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => forward(&handler_root, &ignore, event, &tx),
            Err(e) => warn!("Watch error: {}", e),
        })
        .map_err(|e| std::io::Error::other(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| std::io::Error::other(format!("Failed to watch directory: {}", e)))?;
        debug!(workspace = %root.display(), "Watching workspace");

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }
}

impl Stream for WatchFeed {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

fn forward(root: &Path, ignore: &IgnoreRules, event: Event, tx: &UnboundedSender<ChangeEvent>) {
    for change in convert_event(root, event) {
        if ignore.is_ignored(change.path()) {
            continue;
        }
        if tx.unbounded_send(change).is_err() {
            debug!("Watch feed closed, dropping event");
            return;
        }
    }
}

/// Map one notify event to zero or more change events
///
/// A rename becomes a deletion of the old path and a creation of the new one.
pub(crate) fn convert_event(root: &Path, event: Event) -> Vec<ChangeEvent> {
    let key = |p: &PathBuf| relative_key(root, p).ok();
    match event.kind {
        EventKind::Create(_) => event.paths.iter().filter_map(key).map(ChangeEvent::Created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let mut out = Vec::new();
            if let Some(from) = key(&event.paths[0]) {
                out.push(ChangeEvent::Deleted(from));
            }
            if let Some(to) = key(&event.paths[1]) {
                out.push(ChangeEvent::Created(to));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().filter_map(key).map(ChangeEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter_map(key).map(ChangeEvent::Created).collect()
        }
        EventKind::Modify(_) => event.paths.iter().filter_map(key).map(ChangeEvent::Modified).collect(),
        EventKind::Remove(_) => event.paths.iter().filter_map(key).map(ChangeEvent::Deleted).collect(),
        _ => Vec::new(),
    }
}
