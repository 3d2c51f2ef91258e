//! Change pipeline: mutation log watcher and record lookup fallback

mod resolver;
mod watcher;

pub use resolver::{RecordResolver, DEFAULT_LOOKUP_TIMEOUT};
pub use watcher::{MutationWatcher, WatcherState, DEFAULT_BACKOFF};
