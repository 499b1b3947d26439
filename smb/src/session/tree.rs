//! Tree connections: a bound share plus its open-file table (spec §3's
//! *Tree connection*, §4.5's FID allocation).

use std::collections::HashMap;

use crate::collaborators::{FileHandle, ShareAccess, ShareType};
use crate::error::{Error, Result, SmbStatus};

/// A 16-bit tree id, scoped to a virtual circuit. `0` is reserved.
pub type Tid = u16;

/// A 16-bit file id, scoped to a tree connection. `0` is reserved.
pub type Fid = u16;

/// An open file or directory, as tracked by the tree that opened it.
pub struct NetworkFile {
    pub handle: FileHandle,
    pub path: String,
    pub write_access: bool,
    pub delete_on_close: bool,
}

pub struct TreeConnection {
    pub tid: Tid,
    pub share_name: String,
    pub share_type: ShareType,
    pub access: ShareAccess,
    files: HashMap<Fid, NetworkFile>,
    next_fid_hint: u16,
    max_files: u32,
}

impl TreeConnection {
    pub fn new(tid: Tid, share_name: String, share_type: ShareType, access: ShareAccess, max_files: u32) -> Self {
        TreeConnection {
            tid,
            share_name,
            share_type,
            access,
            files: HashMap::new(),
            next_fid_hint: 1,
            max_files,
        }
    }

    pub fn is_admin_pipe(&self) -> bool {
        self.share_type == ShareType::AdminPipe
    }

    /// Enforces spec §4.6's read/write access predicates ahead of
    /// dispatching to the filesystem collaborator.
    pub fn check_access(&self, requires_write: bool) -> Result<()> {
        match (self.access, requires_write) {
            (ShareAccess::NoAccess, _) => Err(Error::Status(SmbStatus::ACCESS_DENIED)),
            (ShareAccess::ReadOnly, true) => Err(Error::Status(SmbStatus::ACCESS_DENIED)),
            _ => Ok(()),
        }
    }

    pub fn open_file(&mut self, file: NetworkFile) -> Result<Fid> {
        if self.files.len() as u32 >= self.max_files {
            return Err(Error::Status(SmbStatus::TOO_MANY_OPENED_FILES));
        }
        let mut fid = self.next_fid_hint;
        if fid == 0 {
            fid = 1;
        }
        let start = fid;
        while self.files.contains_key(&fid) {
            fid = fid.wrapping_add(1);
            if fid == 0 {
                fid = 1;
            }
            if fid == start {
                return Err(Error::Status(SmbStatus::TOO_MANY_OPENED_FILES));
            }
        }
        self.next_fid_hint = fid.wrapping_add(1);
        if self.next_fid_hint == 0 {
            self.next_fid_hint = 1;
        }
        self.files.insert(fid, file);
        Ok(fid)
    }

    pub fn file(&self, fid: Fid) -> Option<&NetworkFile> {
        self.files.get(&fid)
    }

    pub fn file_mut(&mut self, fid: Fid) -> Option<&mut NetworkFile> {
        self.files.get_mut(&fid)
    }

    pub fn close_file(&mut self, fid: Fid) -> Option<NetworkFile> {
        self.files.remove(&fid)
    }

    pub fn all_fids(&self) -> Vec<Fid> {
        self.files.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw_tree() -> TreeConnection {
        TreeConnection::new(1, "share".into(), ShareType::Disk, ShareAccess::Writable, 4)
    }

    #[test]
    fn fid_zero_is_never_allocated() {
        let mut tree = rw_tree();
        for _ in 0..5 {
            let fid = tree.open_file(NetworkFile {
                handle: 1,
                path: "x".into(),
                write_access: false,
                delete_on_close: false,
            });
            if let Ok(fid) = fid {
                assert_ne!(fid, 0);
            }
        }
    }

    #[test]
    fn read_only_tree_rejects_write_access() {
        let tree = TreeConnection::new(1, "share".into(), ShareType::Disk, ShareAccess::ReadOnly, 4);
        assert!(tree.check_access(false).is_ok());
        assert!(matches!(tree.check_access(true), Err(Error::Status(s)) if s == SmbStatus::ACCESS_DENIED));
    }

    #[test]
    fn too_many_open_files_is_rejected_once_table_is_full() {
        let mut tree = rw_tree();
        for _ in 0..4 {
            tree.open_file(NetworkFile {
                handle: 1,
                path: "x".into(),
                write_access: false,
                delete_on_close: false,
            })
            .unwrap();
        }
        let err = tree.open_file(NetworkFile {
            handle: 1,
            path: "x".into(),
            write_access: false,
            delete_on_close: false,
        });
        assert!(matches!(err, Err(Error::Status(s)) if s == SmbStatus::TOO_MANY_OPENED_FILES));
    }
}
