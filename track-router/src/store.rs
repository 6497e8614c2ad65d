use std::cell::{Cell, RefCell};

use log::debug;
use tokio::sync::watch;

use track_router_model::{SegmentId, TrackFile, TrackSegment};

/// Holds the open track file. Every edit goes through a closure, and subscribers are notified
/// once per edit, so they only ever observe a complete state.
///
/// Don't hold the `Ref` from `current()` while editing; the edit will block on it.
pub struct TrackStore {
    file: watch::Sender<TrackFile>,
    // Bumped on every notified change. Async work compares this before and after awaiting to
    // detect edits that happened in the meantime.
    generation: Cell<u64>,
    undo: RefCell<Vec<TrackFile>>,
    redo: RefCell<Vec<TrackFile>>,
}

impl TrackStore {
    pub fn new(file: TrackFile) -> TrackStore {
        let (file, _) = watch::channel(file);
        TrackStore {
            file,
            generation: Cell::new(0),
            undo: RefCell::new(Vec::new()),
            redo: RefCell::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackFile> {
        self.file.subscribe()
    }

    pub fn current(&self) -> watch::Ref<'_, TrackFile> {
        self.file.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Edits one segment. With `commit`, the previous state can be restored by `undo`. Returns
    /// false and changes nothing if the segment doesn't exist.
    pub fn apply_to_segment<F: FnOnce(&mut TrackSegment)>(
        &self,
        segment: SegmentId,
        f: F,
        commit: bool,
    ) -> bool {
        let before = self.snapshot(commit);
        let changed = self.file.send_if_modified(|file| match file.segment_mut(segment) {
            Some(seg) => {
                f(seg);
                true
            }
            None => false,
        });
        if changed {
            self.record(before);
        } else {
            debug!("Segment {segment:?} is gone, ignoring edit");
        }
        changed
    }

    /// Edits the whole file
    pub fn apply_to_file<F: FnOnce(&mut TrackFile)>(&self, f: F, commit: bool) {
        let before = self.snapshot(commit);
        self.file.send_modify(f);
        self.record(before);
    }

    /// Changes editor-only state, like anchor flags, without notifying anybody or creating an
    /// undo step.
    pub fn update_silently<F: FnOnce(&mut TrackFile)>(&self, f: F) {
        self.file.send_if_modified(|file| {
            f(file);
            false
        });
    }

    pub fn undo(&self) -> bool {
        let Some(previous) = self.undo.borrow_mut().pop() else {
            return false;
        };
        let current = self.file.send_replace(previous);
        self.redo.borrow_mut().push(current);
        self.bump();
        true
    }

    pub fn redo(&self) -> bool {
        let Some(next) = self.redo.borrow_mut().pop() else {
            return false;
        };
        let current = self.file.send_replace(next);
        self.undo.borrow_mut().push(current);
        self.bump();
        true
    }

    fn snapshot(&self, commit: bool) -> Option<TrackFile> {
        commit.then(|| self.file.borrow().clone())
    }

    fn record(&self, before: Option<TrackFile>) {
        if let Some(before) = before {
            self.undo.borrow_mut().push(before);
            self.redo.borrow_mut().clear();
        }
        self.bump();
    }

    fn bump(&self) {
        self.generation.set(self.generation.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use track_router_model::{Coordinate, TrackPoint};

    use super::*;

    fn store() -> (TrackStore, SegmentId) {
        let seg = TrackSegment::new(vec![
            TrackPoint::new(Coordinate::new(0.0, 0.0)),
            TrackPoint::new(Coordinate::new(0.0, 1.0)),
        ]);
        let id = seg.id;
        (
            TrackStore::new(TrackFile::from_segments("test", vec![seg])),
            id,
        )
    }

    #[test]
    fn test_edit_notifies_and_undoes() {
        let (store, id) = store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        let applied = store.apply_to_segment(id, |seg| seg.replace(0..1, Vec::new()), true);
        assert!(applied);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().segment(id).unwrap().len(), 1);
        assert_eq!(store.generation(), 1);

        assert!(store.undo());
        assert_eq!(store.current().segment(id).unwrap().len(), 2);
        assert!(rx.has_changed().unwrap());
        assert!(!store.undo());

        assert!(store.redo());
        assert_eq!(store.current().segment(id).unwrap().len(), 1);
        assert_eq!(store.generation(), 3);
    }

    #[test]
    fn test_silent_update() {
        let (store, id) = store();
        let rx = store.subscribe();
        store.update_silently(|file| {
            file.segment_mut(id).unwrap().trkpt[0].make_anchor(0.0);
        });
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.generation(), 0);
        assert!(store.current().segment(id).unwrap().trkpt[0].is_anchor());
        assert!(!store.undo());
    }

    #[test]
    fn test_missing_segment() {
        let (store, _) = store();
        let other = TrackSegment::default().id;
        assert!(!store.apply_to_segment(other, |seg| seg.trkpt.clear(), true));
        assert_eq!(store.generation(), 0);
        assert!(!store.undo());
    }
}
