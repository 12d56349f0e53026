//! Deferred release of extent mappings.
//!
//! Unmapping a large extent can stall for milliseconds while the kernel
//! tears down page tables. Retired mappings are handed to a background
//! thread instead of being dropped on the writing or reading thread.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Retired = Box<dyn Send>;

#[derive(Default)]
pub struct Reclaimer {
    sender: Option<Sender<Retired>>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops `resource` on the reclaim thread, starting it on first use.
    pub fn retire<T: Send + 'static>(&mut self, resource: T) {
        let retired: Retired = Box::new(resource);
        if self.sender.is_none() {
            self.spawn();
        }
        let Some(sender) = &self.sender else {
            drop(retired);
            return;
        };
        if let Err(mpsc::SendError(retired)) = sender.send(retired) {
            log::warn!("extent reclaim thread gone; unmapping inline");
            self.sender = None;
            drop(retired);
        }
    }

    fn spawn(&mut self) {
        let (sender, receiver) = mpsc::channel::<Retired>();
        let spawned = thread::Builder::new()
            .name("extent-reclaim".to_string())
            .spawn(move || {
                for retired in receiver {
                    drop(retired);
                }
            });
        match spawned {
            Ok(handle) => {
                self.sender = Some(sender);
                self.handle = Some(handle);
            }
            Err(err) => log::warn!("failed to start extent reclaim thread: {err}"),
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn retired_resources_are_dropped() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut reclaimer = Reclaimer::new();
        for _ in 0..4 {
            reclaimer.retire(Tracked(dropped.clone()));
        }
        drop(reclaimer);
        assert_eq!(dropped.load(Ordering::SeqCst), 4);
    }
}
