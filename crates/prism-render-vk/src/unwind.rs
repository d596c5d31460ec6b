// SPDX-License-Identifier: CEPL-1.0
//! Ordered teardown for multi-step construction.
//!
//! Each successful build step pushes the step that undoes it. If the
//! builder returns early, dropping the `Unwind` runs the pushed steps in
//! reverse. On success the builder calls [`Unwind::disarm`] and takes
//! ownership of what it built.

use tracing::trace;

#[must_use = "an Unwind runs its steps when dropped; bind it to a variable"]
pub struct Unwind<'a> {
    steps: Vec<(&'static str, Box<dyn FnOnce() + 'a>)>,
}

impl<'a> Unwind<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, label: &'static str, undo: impl FnOnce() + 'a) {
        self.steps.push((label, Box::new(undo)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Forget every pending step; the caller now owns the objects.
    pub fn disarm(mut self) {
        self.steps.clear();
    }

    /// Run every pending step now, newest first.
    pub fn run(mut self) {
        self.unwind();
    }

    fn unwind(&mut self) {
        while let Some((label, undo)) = self.steps.pop() {
            trace!(step = label, "unwind");
            undo();
        }
    }
}

impl Default for Unwind<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Unwind<'_> {
    fn drop(&mut self) {
        self.unwind();
    }
}
