bitflags::bitflags! {
    /// NotifyChange categories. Also used as the "filter" a watcher
    /// registers with and as the dispatcher's derived `globalChangeSet`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NotifyFilter: u32 {
        const FILE_NAME      = 1 << 0;
        const DIRECTORY_NAME = 1 << 1;
        const ATTRIBUTES     = 1 << 2;
        const SIZE           = 1 << 3;
        const LAST_WRITE     = 1 << 4;
        const LAST_ACCESS    = 1 << 5;
        const CREATION       = 1 << 6;
        const SECURITY       = 1 << 7;
    }
}

/// The union of every active watcher's filter, used to cheaply reject
/// driver events before a `ChangeEvent` is even constructed.
pub type NotifyChangeSet = NotifyFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChange {
    Created,
    Deleted,
    Modified,
    Renamed,
    Attributes,
    LastWrite,
    Security,
}

impl FsChange {
    /// Maps a raw filesystem change to the NotifyChange categories a
    /// watcher's filter is checked against.
    pub fn categories(self) -> NotifyFilter {
        match self {
            FsChange::Created => {
                NotifyFilter::CREATION | NotifyFilter::DIRECTORY_NAME | NotifyFilter::FILE_NAME
            }
            FsChange::Deleted | FsChange::Modified | FsChange::Renamed => {
                NotifyFilter::DIRECTORY_NAME | NotifyFilter::FILE_NAME
            }
            FsChange::Attributes => NotifyFilter::ATTRIBUTES,
            FsChange::LastWrite => NotifyFilter::LAST_WRITE,
            FsChange::Security => NotifyFilter::SECURITY,
        }
    }
}

/// Immutable record produced by a filesystem driver.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub change: FsChange,
    /// Absolute, share-relative path using backslash separators.
    pub path: String,
    /// Only set for `Renamed`.
    pub old_path: Option<String>,
    pub is_directory: bool,
}

/// Uppercases and ensures a single leading backslash, matching the
/// convention `NotifyRequest::watch_path` is stored under.
pub fn normalize_event_path(path: &str) -> String {
    let upper = path.to_uppercase();
    if upper.starts_with('\\') {
        upper
    } else {
        format!("\\{upper}")
    }
}
