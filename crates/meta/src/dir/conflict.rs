//! Decision table for move and copy when the destination may already exist.

use super::path::DirPath;
use crate::error::{Error, ErrorKind};
use crate::models::EntryKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Move,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    AlreadyExists,
    IsADirectory,
}

impl Conflict {
    pub fn raise(self, path: &DirPath) -> Error {
        let path = path.to_string();
        match self {
            Self::AlreadyExists => Error::from(ErrorKind::AlreadyExists(path)),
            Self::IsADirectory => Error::from(ErrorKind::IsADirectory(path)),
        }
    }
}

/// What to do with the source once the destination has been inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Destination is free: place the source there.
    Insert,
    /// Delete the destination (and its subtree), then place the source there.
    Replace,
    /// Destination is a directory: place the source inside it under its own name.
    Nest,
    Fail(Conflict),
}

pub fn plan(op: Op, src: EntryKind, dst: Option<EntryKind>, overwrite: bool) -> Plan {
    use EntryKind::{Dir, File};
    let Some(dst) = dst else {
        return Plan::Insert;
    };
    match (src, dst, op) {
        (File, File, _) | (Dir, File, _) if overwrite => Plan::Replace,
        (File, Dir, _) if overwrite => Plan::Nest,
        (Dir, Dir, Op::Move) => Plan::Nest,
        _ => Plan::Fail(Conflict::AlreadyExists),
    }
}

/// After choosing [`Plan::Nest`], decide what happens when the source's name
/// is already taken inside the destination directory.
pub fn plan_nested(src: EntryKind, collision: Option<EntryKind>, overwrite: bool) -> Plan {
    match (src, collision) {
        (_, None) => Plan::Insert,
        (_, Some(EntryKind::File)) if overwrite => Plan::Replace,
        (EntryKind::File, Some(EntryKind::Dir)) => Plan::Fail(Conflict::IsADirectory),
        _ => Plan::Fail(Conflict::AlreadyExists),
    }
}
