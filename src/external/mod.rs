//! Side effects outside the file's own tag: the Engine DJ library, the
//! trash, the deletion notice endpoint, and the journal of owed deletions

pub mod engine_db;
pub mod notifier;
pub mod pending;
pub mod process;
pub mod trash;

pub use engine_db::{
    DeleteOutcome, EngineDjStore, ExternalRecord, LibraryStore, NoExternalStore, UpsertOutcome,
};
pub use notifier::{DisabledNotifier, HttpNotifier, NotifyDispatch, NotifyStats, Notifier};
pub use pending::PendingDeletions;
pub use trash::{DirectoryTrash, SystemTrash, TrashLocation, TrashMover, TrashedFile};
