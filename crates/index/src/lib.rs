pub mod chunker;
pub mod coordination;
pub mod debounce;
pub mod gitignore;
pub mod parser;
pub mod scanner;
pub mod watcher;

pub use chunker::{Chunker, ChunkSpan, ChunkerConfig};
pub use coordination::{CoordinationError, WatcherCoordinator, WatcherLock};
pub use debounce::{DebounceConfig, Debouncer, FlushedJob, FsEventKind};
pub use gitignore::{GitignoreState, compute_gitignore_hash, should_ignore};
pub use parser::{DEFAULT_TEXT_EXTENSIONS, ParserRegistry, PlainTextParser};
pub use scanner::{ScanError, ScanProgress, ScanResult, ScannedFile, Scanner};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchError};
