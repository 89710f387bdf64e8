//! Virtual filesystem index.
//!
//! A tree of watched files over a set of roots, giving the resolver
//! `exists`/`read`/`closest-ancestor` lookups without touching the disk for
//! anything but content reads. Eager roots are fully enumerated at build
//! time; lazy roots materialize file nodes on first access via a stat
//! against the host [FileSystem].

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::{
    error::GraphError,
    file_system::{FileMetadata, FileSystem},
    options::GraphOptions,
};

/// Kind of a filesystem change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Change,
    Delete,
}

/// A change that survived filtering and mutated the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

const READ_WHILE_CHUNK: usize = 4096;

struct Root {
    path: PathBuf,
    lazy: bool,
}

enum NodeKind {
    Dir { children: FxHashMap<OsString, usize> },
    File { content: Option<Arc<str>> },
}

struct Node {
    path: Box<Path>,
    parent: Option<usize>,
    kind: NodeKind,
}

pub struct Fastfs<Fs> {
    fs: Fs,
    roots: Vec<Root>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    index: FxHashMap<Box<Path>, usize>,
}

impl<Fs: FileSystem> Fastfs<Fs> {
    pub fn new(fs: Fs, options: &GraphOptions) -> Self {
        let mut fastfs = Self {
            fs,
            roots: vec![],
            nodes: vec![],
            free: vec![],
            index: FxHashMap::default(),
        };
        for root in options.eager_roots() {
            fastfs.roots.push(Root { path: root.clone(), lazy: false });
        }
        for root in &options.lazy_roots {
            fastfs.roots.push(Root { path: root.clone(), lazy: true });
        }
        fastfs
    }

    pub fn fs(&self) -> &Fs {
        &self.fs
    }

    /// Enumerate every eager root into the tree.
    ///
    /// # Errors
    ///
    /// I/O errors from the crawl propagate; an unreadable root is fatal.
    pub fn build(&mut self, options: &GraphOptions) -> Result<(), GraphError> {
        let span = tracing::debug_span!("fastfs_build");
        let _enter = span.enter();
        for i in 0..self.roots.len() {
            let (path, lazy) = (self.roots[i].path.clone(), self.roots[i].lazy);
            let node = self.ensure_dir_node(&path);
            if !lazy {
                self.crawl(node, options)?;
            }
        }
        tracing::debug!(files = self.index.len(), "fastfs_built");
        Ok(())
    }

    fn crawl(&mut self, dir: usize, options: &GraphOptions) -> Result<(), GraphError> {
        let path = self.nodes[dir].path.to_path_buf();
        for entry in self.fs.read_dir(&path)? {
            let child_path = path.join(&entry.name);
            if options.is_blacklisted(&child_path) {
                continue;
            }
            if entry.metadata.is_dir {
                let child = self.ensure_dir_node(&child_path);
                self.crawl(child, options)?;
            } else if entry.metadata.is_file {
                self.insert_file_node(&child_path);
            }
        }
        Ok(())
    }

    fn root_of(&self, path: &Path) -> Option<&Root> {
        // Longest match wins so nested roots keep their own laziness.
        self.roots
            .iter()
            .filter(|root| path.starts_with(&root.path))
            .max_by_key(|root| root.path.as_os_str().len())
    }

    fn alloc(&mut self, node: Node) -> usize {
        let path = node.path.clone();
        let id = if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };
        self.index.insert(path, id);
        id
    }

    fn ensure_dir_node(&mut self, path: &Path) -> usize {
        if let Some(&id) = self.index.get(path) {
            return id;
        }
        let parent = match path.parent() {
            Some(p) if self.root_of(path).is_some_and(|root| p.starts_with(&root.path)) => {
                Some(self.ensure_dir_node(p))
            }
            _ => None,
        };
        let id = self.alloc(Node {
            path: path.into(),
            parent,
            kind: NodeKind::Dir { children: FxHashMap::default() },
        });
        if let Some(parent) = parent {
            self.link_child(parent, path, id);
        }
        id
    }

    fn insert_file_node(&mut self, path: &Path) -> usize {
        if let Some(&id) = self.index.get(path) {
            return id;
        }
        let parent = path.parent().map(|p| self.ensure_dir_node(p));
        let id = self.alloc(Node { path: path.into(), parent, kind: NodeKind::File { content: None } });
        if let Some(parent) = parent {
            self.link_child(parent, path, id);
        }
        id
    }

    fn link_child(&mut self, parent: usize, child_path: &Path, child: usize) {
        if let NodeKind::Dir { children } = &mut self.nodes[parent].kind {
            children.insert(child_path.file_name().unwrap().to_os_string(), child);
        }
    }

    fn remove_node(&mut self, id: usize) {
        if let NodeKind::Dir { children } = &self.nodes[id].kind {
            let children = children.values().copied().collect::<Vec<_>>();
            for child in children {
                self.remove_node(child);
            }
        }
        let path = self.nodes[id].path.to_path_buf();
        if let Some(parent) = self.nodes[id].parent {
            if let NodeKind::Dir { children } = &mut self.nodes[parent].kind {
                children.remove(path.file_name().unwrap());
            }
        }
        self.index.remove(path.as_path());
        self.nodes[id].kind = NodeKind::File { content: None };
        self.free.push(id);
    }

    /// Find the node for `path`, materializing it when it lives under a lazy
    /// root and the host filesystem has it.
    fn lookup(&mut self, path: &Path) -> Result<Option<usize>, GraphError> {
        if let Some(&id) = self.index.get(path) {
            return Ok(Some(id));
        }
        let Some(root) = self.root_of(path) else {
            return Err(GraphError::NotFoundInRoots(path.to_path_buf()));
        };
        let lazy = root.lazy;
        if !lazy {
            return Ok(None);
        }
        match self.fs.metadata(path) {
            Ok(meta) if meta.is_file => Ok(Some(self.insert_file_node(path))),
            Ok(meta) if meta.is_dir => Ok(Some(self.ensure_dir_node(path))),
            _ => Ok(None),
        }
    }

    pub fn file_exists(&mut self, path: &Path) -> bool {
        matches!(
            self.lookup(path),
            Ok(Some(id)) if matches!(self.nodes[id].kind, NodeKind::File { .. })
        )
    }

    pub fn dir_exists(&mut self, path: &Path) -> bool {
        matches!(
            self.lookup(path),
            Ok(Some(id)) if matches!(self.nodes[id].kind, NodeKind::Dir { .. })
        )
    }

    /// Read a file's content, cached after the first read.
    ///
    /// # Errors
    ///
    /// * [GraphError::NotFoundInRoots] outside every root
    /// * [GraphError::FileNotFound] when no file node exists
    pub fn read_file(&mut self, path: &Path) -> Result<Arc<str>, GraphError> {
        let id = self
            .lookup(path)?
            .ok_or_else(|| GraphError::FileNotFound(path.to_path_buf()))?;
        let NodeKind::File { content } = &self.nodes[id].kind else {
            return Err(GraphError::FileNotFound(path.to_path_buf()));
        };
        if let Some(content) = content {
            tracing::trace!(path = ?path, "read_file cache hit");
            return Ok(Arc::clone(content));
        }
        let read: Arc<str> = Arc::from(self.fs.read_to_string(path)?.as_str());
        if let NodeKind::File { content } = &mut self.nodes[id].kind {
            *content = Some(Arc::clone(&read));
        }
        Ok(read)
    }

    /// Read chunks of a file until `predicate(chunk, index, accumulated)`
    /// returns false, and return the accumulated prefix. The terminating
    /// chunk is included.
    pub fn read_while<P>(&mut self, path: &Path, predicate: P) -> Result<String, GraphError>
    where
        P: Fn(&str, usize, &str) -> bool,
    {
        let content = self.read_file(path)?;
        let mut acc = String::new();
        let mut start = 0;
        let mut index = 0;
        while start < content.len() {
            let mut end = (start + READ_WHILE_CHUNK).min(content.len());
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            let chunk = &content[start..end];
            acc.push_str(chunk);
            if !predicate(chunk, index, &acc) {
                break;
            }
            start = end;
            index += 1;
        }
        Ok(acc)
    }

    /// Nearest ancestor directory of `path` containing a child named `name`.
    pub fn closest(&mut self, path: &Path, name: &str) -> Option<PathBuf> {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if self.root_of(d).is_none() {
                return None;
            }
            let candidate = d.join(name);
            if self.file_exists(&candidate) {
                return Some(candidate);
            }
            dir = d.parent();
        }
        None
    }

    /// Files under `dir` (recursively) whose path matches `pattern`.
    pub fn matches(&self, dir: &Path, pattern: &Regex) -> Vec<PathBuf> {
        let mut found = self
            .files()
            .filter(|path| path.starts_with(dir))
            .filter(|path| path.to_str().is_some_and(|p| pattern.is_match(p)))
            .map(Path::to_path_buf)
            .collect::<Vec<_>>();
        found.sort_unstable();
        found
    }

    pub fn match_files_by_pattern(&self, pattern: &Regex) -> Vec<PathBuf> {
        let mut found = self
            .files()
            .filter(|path| path.to_str().is_some_and(|p| pattern.is_match(p)))
            .map(Path::to_path_buf)
            .collect::<Vec<_>>();
        found.sort_unstable();
        found
    }

    pub fn find_files_by_exts(&self, exts: &[String]) -> Vec<PathBuf> {
        let mut found = self
            .files()
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| exts.iter().any(|e| e == ext))
            })
            .map(Path::to_path_buf)
            .collect::<Vec<_>>();
        found.sort_unstable();
        found
    }

    fn files(&self) -> impl Iterator<Item = &Path> {
        self.index.iter().filter_map(|(path, &id)| {
            matches!(self.nodes[id].kind, NodeKind::File { .. }).then_some(path.as_ref())
        })
    }

    /// Apply a watcher event to the tree.
    ///
    /// Events outside every root and directory events are ignored; `None` is
    /// returned for both. `Change` on an unknown file is treated as `Add`.
    pub fn process_file_change(
        &mut self,
        kind: ChangeKind,
        path: &Path,
        metadata: Option<&FileMetadata>,
    ) -> Option<AppliedChange> {
        if self.root_of(path).is_none() {
            tracing::trace!(path = ?path, "change event outside roots ignored");
            return None;
        }
        if metadata.is_some_and(FileMetadata::is_dir) {
            return None;
        }
        let existing = self.index.get(path).copied();
        if let Some(id) = existing {
            if matches!(self.nodes[id].kind, NodeKind::Dir { .. }) {
                return None;
            }
        }
        match kind {
            ChangeKind::Add | ChangeKind::Change => {
                if let Some(id) = existing {
                    if let NodeKind::File { content } = &mut self.nodes[id].kind {
                        *content = None;
                    }
                    Some(AppliedChange { kind: ChangeKind::Change, path: path.to_path_buf() })
                } else {
                    self.insert_file_node(path);
                    Some(AppliedChange { kind: ChangeKind::Add, path: path.to_path_buf() })
                }
            }
            ChangeKind::Delete => {
                let id = existing?;
                self.remove_node(id);
                Some(AppliedChange { kind: ChangeKind::Delete, path: path.to_path_buf() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::MemoryFileSystem;

    fn build(files: &[(&str, &str)], options: &GraphOptions) -> Fastfs<MemoryFileSystem> {
        let fs = MemoryFileSystem::new(files);
        let mut fastfs = Fastfs::new(fs, options);
        fastfs.build(options).unwrap();
        fastfs
    }

    fn options() -> GraphOptions {
        GraphOptions::default().with_project_root("/r").sanitize()
    }

    #[test]
    fn exists_and_read() {
        let mut fastfs = build(&[("/r/a.js", "let a;"), ("/r/sub/b.js", "let b;")], &options());
        assert!(fastfs.file_exists(Path::new("/r/a.js")));
        assert!(fastfs.file_exists(Path::new("/r/sub/b.js")));
        assert!(fastfs.dir_exists(Path::new("/r/sub")));
        assert!(!fastfs.file_exists(Path::new("/r/sub")));
        assert!(!fastfs.file_exists(Path::new("/r/missing.js")));
        assert_eq!(&*fastfs.read_file(Path::new("/r/a.js")).unwrap(), "let a;");
    }

    #[test]
    fn read_is_cached() {
        let fs = MemoryFileSystem::new(&[("/r/a.js", "one")]);
        let mut fastfs = Fastfs::new(fs.clone(), &options());
        fastfs.build(&options()).unwrap();
        assert_eq!(&*fastfs.read_file(Path::new("/r/a.js")).unwrap(), "one");
        fs.add_file(Path::new("/r/a.js"), "two");
        // No change event processed: the cached content is served.
        assert_eq!(&*fastfs.read_file(Path::new("/r/a.js")).unwrap(), "one");
        fastfs.process_file_change(ChangeKind::Change, Path::new("/r/a.js"), None);
        assert_eq!(&*fastfs.read_file(Path::new("/r/a.js")).unwrap(), "two");
    }

    #[test]
    fn outside_roots() {
        let mut fastfs = build(&[("/r/a.js", "")], &options());
        assert!(!fastfs.file_exists(Path::new("/elsewhere/a.js")));
        let error = fastfs.read_file(Path::new("/elsewhere/a.js")).unwrap_err();
        assert!(error.is_not_found_in_roots());
        assert_eq!(error, GraphError::NotFoundInRoots(PathBuf::from("/elsewhere/a.js")));
        let error = fastfs.read_file(Path::new("/r/missing.js")).unwrap_err();
        assert!(!error.is_not_found_in_roots());
        assert_eq!(error, GraphError::FileNotFound(PathBuf::from("/r/missing.js")));
    }

    #[test]
    fn lazy_roots_materialize_on_access() {
        let fs = MemoryFileSystem::new(&[("/lazy/dep/index.js", "x")]);
        let options = GraphOptions::default().with_lazy_root("/lazy").sanitize();
        let mut fastfs = Fastfs::new(fs, &options);
        fastfs.build(&options).unwrap();
        assert!(fastfs.file_exists(Path::new("/lazy/dep/index.js")));
        assert!(fastfs.dir_exists(Path::new("/lazy/dep")));
        assert!(!fastfs.file_exists(Path::new("/lazy/dep/missing.js")));
    }

    #[test]
    fn blacklist_skips_crawl() {
        let options = GraphOptions {
            blacklist: Some(Regex::new(r"__tests__").unwrap()),
            ..options()
        };
        let mut fastfs =
            build(&[("/r/a.js", ""), ("/r/__tests__/a-test.js", "")], &options);
        assert!(fastfs.file_exists(Path::new("/r/a.js")));
        assert!(!fastfs.file_exists(Path::new("/r/__tests__/a-test.js")));
    }

    #[test]
    fn closest_walks_ancestors() {
        let mut fastfs = build(
            &[
                ("/r/package.json", "{}"),
                ("/r/sub/deep/a.js", ""),
                ("/r/sub/package.json", "{}"),
            ],
            &options(),
        );
        assert_eq!(
            fastfs.closest(Path::new("/r/sub/deep/a.js"), "package.json"),
            Some(PathBuf::from("/r/sub/package.json"))
        );
        assert_eq!(
            fastfs.closest(Path::new("/r/sub/package.json"), "package.json"),
            Some(PathBuf::from("/r/package.json"))
        );
    }

    #[test]
    fn pattern_scans() {
        let fastfs = build(
            &[("/r/a.js", ""), ("/r/sub/b.js", ""), ("/r/img.png", "")],
            &options(),
        );
        assert_eq!(
            fastfs.match_files_by_pattern(&Regex::new(r"\.js$").unwrap()),
            vec![PathBuf::from("/r/a.js"), PathBuf::from("/r/sub/b.js")]
        );
        assert_eq!(
            fastfs.matches(Path::new("/r/sub"), &Regex::new(r"\.js$").unwrap()),
            vec![PathBuf::from("/r/sub/b.js")]
        );
        assert_eq!(
            fastfs.find_files_by_exts(&["png".to_string()]),
            vec![PathBuf::from("/r/img.png")]
        );
    }

    #[test]
    fn change_events() {
        let fs = MemoryFileSystem::new(&[("/r/a.js", "")]);
        let mut fastfs = Fastfs::new(fs.clone(), &options());
        fastfs.build(&options()).unwrap();

        // Add
        fs.add_file(Path::new("/r/b.js"), "");
        let applied =
            fastfs.process_file_change(ChangeKind::Add, Path::new("/r/b.js"), None).unwrap();
        assert_eq!(applied.kind, ChangeKind::Add);
        assert!(fastfs.file_exists(Path::new("/r/b.js")));

        // Delete
        fs.remove_file(Path::new("/r/b.js"));
        let applied =
            fastfs.process_file_change(ChangeKind::Delete, Path::new("/r/b.js"), None).unwrap();
        assert_eq!(applied.kind, ChangeKind::Delete);
        assert!(!fastfs.file_exists(Path::new("/r/b.js")));

        // Delete of an unknown path is a no-op.
        assert_eq!(
            fastfs.process_file_change(ChangeKind::Delete, Path::new("/r/b.js"), None),
            None
        );

        // Events outside roots are ignored.
        assert_eq!(
            fastfs.process_file_change(ChangeKind::Add, Path::new("/other/c.js"), None),
            None
        );
    }
}
