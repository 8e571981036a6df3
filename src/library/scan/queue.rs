use std::collections::VecDeque;

use camino::Utf8PathBuf;

/// A pending change to the catalog, produced by diffing the filesystem against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Read the file and insert or refresh its track record.
    Add {
        path: Utf8PathBuf,
        directory_id: i64,
        /// Modification time, unix milliseconds.
        modified: i64,
        file_size: u64,
    },
    /// Delete the track record for a file that is gone.
    Remove { path: Utf8PathBuf },
}

/// FIFO of directives for the current pass. Filled by the diff phases, emptied by the drain.
#[derive(Debug, Default)]
pub struct MutationQueue {
    directives: VecDeque<Directive>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, directive: Directive) {
        self.directives.push_back(directive);
    }

    pub fn pop(&mut self) -> Option<Directive> {
        self.directives.pop_front()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Drop everything still queued. Used when a pass is cut short; the next pass re-derives
    /// what is still needed from the filesystem.
    pub fn clear(&mut self) -> usize {
        let dropped = self.directives.len();
        self.directives.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(path: &str) -> Directive {
        Directive::Add {
            path: path.into(),
            directory_id: 1,
            modified: 0,
            file_size: 0,
        }
    }

    fn remove(path: &str) -> Directive {
        Directive::Remove { path: path.into() }
    }

    #[test]
    fn directives_come_out_in_insertion_order() {
        let mut queue = MutationQueue::new();
        queue.enqueue(add("/music/a.mp3"));
        queue.enqueue(remove("/music/a.mp3"));
        queue.enqueue(add("/music/b.mp3"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(add("/music/a.mp3")));
        assert_eq!(queue.pop(), Some(remove("/music/a.mp3")));
        assert_eq!(queue.pop(), Some(add("/music/b.mp3")));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn clear_discards_pending_work() {
        let mut queue = MutationQueue::new();
        queue.enqueue(add("/music/a.mp3"));
        queue.enqueue(remove("/music/b.mp3"));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
