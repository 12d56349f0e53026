//! Nested replay scopes.
//!
//! A scope collects the intervals its own readers request plus those of
//! its child scopes. The window a top-level run replays is the union of
//! what was requested below it, which can be narrower than the union of
//! the stores' full active intervals when only some streams are opened.

use crate::core::interval::TimeInterval;
use crate::store::reader::StoreReader;
use crate::store::replay::ReplayDescriptor;

#[derive(Clone, Debug, Default)]
pub struct ReplayScope {
    name: String,
    requested: Vec<TimeInterval>,
    children: Vec<ReplayScope>,
}

impl ReplayScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[ReplayScope] {
        &self.children
    }

    /// Adds a child scope and returns it.
    pub fn child(&mut self, name: impl Into<String>) -> &mut ReplayScope {
        self.children.push(ReplayScope::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn request(&mut self, interval: TimeInterval) {
        self.requested.push(interval);
    }

    /// Requests the coverage of `streams` in `reader`; returns what was
    /// added, `None` when those streams hold no messages.
    pub fn request_streams<S: AsRef<str>>(
        &mut self,
        reader: &StoreReader,
        streams: &[S],
    ) -> Option<TimeInterval> {
        let interval = reader.requested_interval(streams)?;
        self.request(interval);
        Some(interval)
    }

    /// Union of this scope's requests and all of its descendants'.
    pub fn effective_interval(&self) -> Option<TimeInterval> {
        let mut intervals = self.requested.clone();
        intervals.extend(self.children.iter().filter_map(ReplayScope::effective_interval));
        TimeInterval::coverage(&intervals)
    }

    /// Descriptor for replaying everything requested below this scope.
    pub fn descriptor(&self) -> Option<ReplayDescriptor> {
        self.effective_interval().map(ReplayDescriptor::new)
    }
}
