use std::fmt;

/// Mode bits as carried in the rsync file list.
///
/// The `S_IFMT` field is authoritative for the entry type; the low twelve bits
/// are permissions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFLNK: u32 = 0o120000;

    /// Mode used for synthetic directory entries (`drwxr-xr-x`).
    pub const DEFAULT_DIR: FileMode = FileMode(Self::S_IFDIR | 0o755);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn file_type(self) -> u32 {
        self.0 & Self::S_IFMT
    }

    pub const fn is_reg(self) -> bool {
        self.file_type() == Self::S_IFREG
    }

    pub const fn is_dir(self) -> bool {
        self.file_type() == Self::S_IFDIR
    }

    pub const fn is_lnk(self) -> bool {
        self.file_type() == Self::S_IFLNK
    }

    pub const fn permissions(self) -> u32 {
        self.0 & 0o7777
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:o})", self.0)
    }
}

impl From<u32> for FileMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// One entry of the tree reconstructed from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the sync root (`.` for the root itself)
    pub path: Vec<u8>,
    pub size: i64,
    /// Unix seconds
    pub mtime: i32,
    pub mode: FileMode,
}

/// Sorted by `path`, byte order.
pub type FileList = Vec<FileInfo>;

/// Metadata supplied by the receiver on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub mtime: i32,
    pub mode: FileMode,
}

impl FileMetadata {
    pub fn new(mtime: i32, mode: FileMode) -> Self {
        Self { mtime, mode }
    }
}

/// Sort a file list into the order the file-list walker diffs against.
pub fn sort_file_list(list: &mut FileList) {
    list.sort_by(|a, b| a.path.cmp(&b.path));
}
