use std::{
    cell::RefCell,
    ffi::OsString,
    fs, io,
    path::{Component, Path, PathBuf},
    rc::Rc,
    time::SystemTime,
};

use rustc_hash::{FxHashMap, FxHashSet};

/// File System abstraction used by [crate::Fastfs].
///
/// The virtual filesystem index keeps its own tree of nodes and only reaches
/// down to this trait for content reads, stat calls on lazy subtrees, and the
/// initial crawl of eager roots.
pub trait FileSystem {
    /// See [std::fs::read_to_string]
    ///
    /// # Errors
    ///
    /// * See [std::fs::read_to_string]
    /// ## Warning
    /// Use `&Path` instead of a generic `P: AsRef<Path>` here,
    /// because object safety requirements.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// See [std::fs::metadata]
    ///
    /// # Errors
    /// See [std::fs::metadata]
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata>;

    /// Enumerate the children of a directory, used to crawl eager roots.
    ///
    /// # Errors
    /// See [std::fs::read_dir]
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// Metadata information about a file
#[derive(Debug, Clone, Copy)]
pub struct FileMetadata {
    pub(crate) is_file: bool,
    pub(crate) is_dir: bool,
    pub(crate) modified: Option<SystemTime>,
}

impl FileMetadata {
    pub fn new(is_file: bool, is_dir: bool, modified: Option<SystemTime>) -> Self {
        Self { is_file, is_dir, modified }
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

impl From<fs::Metadata> for FileMetadata {
    fn from(metadata: fs::Metadata) -> Self {
        Self::new(metadata.is_file(), metadata.is_dir(), metadata.modified().ok())
    }
}

/// A single entry returned by [FileSystem::read_dir].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub metadata: FileMetadata,
}

/// Operating System
#[derive(Debug, Default)]
pub struct FileSystemOs;

impl FileSystem for FileSystemOs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = fs::read(path)?;
        if simdutf8::basic::from_utf8(&bytes).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream did not contain valid UTF-8",
            ));
        }
        // SAFETY: `bytes` is valid UTF-8, checked above.
        Ok(unsafe { String::from_utf8_unchecked(bytes) })
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        fs::metadata(path).map(FileMetadata::from)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = vec![];
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                metadata: entry.metadata()?.into(),
            });
        }
        Ok(entries)
    }
}

/// In-memory [FileSystem], shared by cloning.
///
/// Used by the test suites to stand in for the disk; mutations through one
/// clone are visible through all others, which lets a test hold on to a
/// handle after the graph has taken ownership of its own.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    inner: Rc<RefCell<MemoryFileSystemImpl>>,
}

#[derive(Debug, Default)]
struct MemoryFileSystemImpl {
    files: FxHashMap<PathBuf, MemoryFile>,
    dirs: FxHashSet<PathBuf>,
}

#[derive(Debug)]
struct MemoryFile {
    content: String,
    version: u64,
}

impl MemoryFileSystem {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let fs = Self::default();
        for (path, content) in files {
            fs.add_file(Path::new(path), content);
        }
        fs
    }

    pub fn add_file(&self, path: &Path, content: &str) {
        let mut inner = self.inner.borrow_mut();
        let mut dir = path.parent();
        while let Some(d) = dir {
            inner.dirs.insert(d.to_path_buf());
            dir = d.parent();
        }
        let version = inner.files.get(path).map_or(0, |f| f.version + 1);
        inner
            .files
            .insert(path.to_path_buf(), MemoryFile { content: content.to_string(), version });
    }

    pub fn remove_file(&self, path: &Path) {
        self.inner.borrow_mut().files.remove(path);
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.inner
            .borrow()
            .files
            .get(&normalize_memory_path(path))
            .map(|f| f.content.clone())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        let inner = self.inner.borrow();
        let path = normalize_memory_path(path);
        if let Some(file) = inner.files.get(&path) {
            // Synthetic timestamps: bump on every rewrite so mtime validation
            // in the metadata cache observes changes.
            let modified = SystemTime::UNIX_EPOCH
                .checked_add(std::time::Duration::from_secs(file.version + 1));
            return Ok(FileMetadata::new(true, false, modified));
        }
        if inner.dirs.contains(&path) {
            return Ok(FileMetadata::new(false, true, None));
        }
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let inner = self.inner.borrow();
        let path = normalize_memory_path(path);
        if !inner.dirs.contains(&path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let mut names = FxHashSet::default();
        let mut entries = vec![];
        for (p, file) in &inner.files {
            if p.parent() == Some(path.as_path()) {
                let name = p.file_name().unwrap().to_os_string();
                if names.insert(name.clone()) {
                    let modified = SystemTime::UNIX_EPOCH
                        .checked_add(std::time::Duration::from_secs(file.version + 1));
                    entries.push(DirEntry {
                        name,
                        metadata: FileMetadata::new(true, false, modified),
                    });
                }
            }
        }
        for d in &inner.dirs {
            if d.parent() == Some(path.as_path()) {
                let name = d.file_name().unwrap().to_os_string();
                if names.insert(name.clone()) {
                    entries.push(DirEntry { name, metadata: FileMetadata::new(false, true, None) });
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Collapse `.` and `..` so lookups match the keys produced by `add_file`.
fn normalize_memory_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out
}

#[test]
fn metadata() {
    let meta = FileMetadata { is_file: true, is_dir: false, modified: None };
    assert!(meta.is_file());
    assert!(!meta.is_dir());
    let _ = meta;
}

#[test]
fn memory_file_system() {
    let fs = MemoryFileSystem::new(&[("/r/a.js", "let a;"), ("/r/sub/b.js", "let b;")]);
    assert_eq!(fs.read_to_string(Path::new("/r/a.js")).unwrap(), "let a;");
    assert!(fs.metadata(Path::new("/r")).unwrap().is_dir());
    assert!(fs.metadata(Path::new("/r/sub/b.js")).unwrap().is_file());
    assert!(fs.read_to_string(Path::new("/r/missing.js")).is_err());

    let names = fs
        .read_dir(Path::new("/r"))
        .unwrap()
        .into_iter()
        .map(|e| e.name.into_string().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a.js".to_string(), "sub".to_string()]);

    let before = fs.metadata(Path::new("/r/a.js")).unwrap().modified();
    fs.add_file(Path::new("/r/a.js"), "let a = 1;");
    let after = fs.metadata(Path::new("/r/a.js")).unwrap().modified();
    assert!(before < after);
}
