//! Deferred deallocation for the render thread
//!
//! Everything the render thread may have to drop (retired streams with open
//! file handles, removed effects, unregistered sources) is wrapped in a
//! `basedrop::Owned` created with [`gc_handle`]. Dropping an `Owned` only
//! enqueues a pointer; the destructor and the free run later on a background
//! collector thread, so closing a file never happens inside the callback.
//!
//! ```ignore
//! use basedrop::Owned;
//! use mixbus_core::engine::gc_handle;
//!
//! let stream = Owned::new(&gc_handle(), ChunkStream::open(&clip)?);
//! // send `stream` to the render thread; when it is replaced there,
//! // the file is closed on the collector thread
//! ```

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// How often the collector runs
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn spawn_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("mixbus-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread only
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("GC handle receiver dropped");

            log::info!("Mixer GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn mixer GC thread");

    rx.recv().expect("GC thread exited before sending its handle")
}

/// Handle for creating `Owned`/`Shared` values collected off the render thread
///
/// The collector thread is started on first use.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(spawn_collector).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Owned;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_runs_on_collector() {
        let dropped = Arc::new(AtomicBool::new(false));
        let owned = Owned::new(&gc_handle(), DropFlag(dropped.clone()));
        drop(owned);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !dropped.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(dropped.load(Ordering::SeqCst));
    }
}
