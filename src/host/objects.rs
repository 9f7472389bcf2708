//! Git object encoding for the filesystem host
//!
//! Objects use git's real formats and SHA-1 ids, so a store written here can
//! be inspected with `git cat-file` once the loose objects are copied into a
//! `.git/objects` directory.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

use gix_object::Kind;
use sha1::{Digest, Sha1};

use crate::error::HostError;

/// Git SHA-1 identifier (40 hex characters)
pub type ObjectId = String;

pub const TREE_MODE: &str = "40000";

/// A git object with its id
#[derive(Debug, Clone)]
pub struct GitObject {
    pub id: ObjectId,
    pub kind: Kind,
    pub data: Vec<u8>,
}

impl GitObject {
    /// Create a GitObject from raw object data (without header)
    pub fn from_raw(kind: Kind, data: Vec<u8>) -> Self {
        let id = compute_object_id(kind, &data);
        Self { id, kind, data }
    }

    /// Parse a loose object ("type size\0data")
    fn from_loose_format(content: &[u8]) -> Result<Self, HostError> {
        let null_pos = content
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| HostError::Decode("no null terminator in object header".into()))?;

        let header = std::str::from_utf8(&content[..null_pos])
            .map_err(|_| HostError::Decode("invalid UTF-8 in object header".into()))?;

        let kind = match header.split_once(' ').map(|(kind, _)| kind) {
            Some("commit") => Kind::Commit,
            Some("tree") => Kind::Tree,
            Some("blob") => Kind::Blob,
            Some("tag") => Kind::Tag,
            _ => return Err(HostError::Decode(format!("invalid object header: {}", header))),
        };

        Ok(Self::from_raw(kind, content[null_pos + 1..].to_vec()))
    }

    fn to_loose_format(&self) -> Vec<u8> {
        let mut result = format!("{} {}\0", kind_name(self.kind), self.data.len()).into_bytes();
        result.extend_from_slice(&self.data);
        result
    }
}

fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

fn compute_object_id(kind: Kind, data: &[u8]) -> ObjectId {
    let header = format!("{} {}\0", kind_name(kind), data.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Whether `id` looks like a full SHA-1. Anything else is never a path.
pub fn is_object_id(id: &str) -> bool {
    id.len() == 40 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn loose_path(objects_dir: &Path, id: &str) -> PathBuf {
    let (dir, file) = id.split_at(2);
    objects_dir.join(dir).join(file)
}

/// Read a zlib-compressed loose object
pub fn read_loose_object(objects_dir: &Path, id: &str) -> Result<GitObject, HostError> {
    if !is_object_id(id) {
        return Err(HostError::NotFound(format!("object {}", id)));
    }
    let path = loose_path(objects_dir, id);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HostError::NotFound(format!("object {}", id)));
        }
        Err(e) => return Err(e.into()),
    };
    let mut decoder = flate2::read::ZlibDecoder::new(file);
    let mut content = Vec::new();
    decoder.read_to_end(&mut content)?;

    GitObject::from_loose_format(&content)
}

/// Write a loose object unless it already exists (objects are immutable)
pub fn write_loose_object(objects_dir: &Path, obj: &GitObject) -> Result<(), HostError> {
    let path = loose_path(objects_dir, &obj.id);
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write beside the final path and rename so readers never see a partial object
    let dir = path.parent().unwrap_or(objects_dir);
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    let mut encoder = flate2::write::ZlibEncoder::new(temp, flate2::Compression::default());
    encoder.write_all(&obj.to_loose_format())?;
    let temp = encoder.finish()?;
    temp.persist(&path).map_err(|e| HostError::Io(e.error))?;

    Ok(())
}

/// One entry of a single tree level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTreeEntry {
    pub mode: String,
    pub name: String,
    pub id: ObjectId,
}

impl RawTreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode == TREE_MODE
    }

    // git compares directory names as if they ended in '/'
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

pub fn encode_tree(mut entries: Vec<RawTreeEntry>) -> Result<Vec<u8>, HostError> {
    entries.sort_by_key(RawTreeEntry::sort_key);
    let mut data = Vec::new();
    for entry in entries {
        let raw_id = hex::decode(&entry.id)
            .map_err(|_| HostError::Rejected(format!("invalid object id {}", entry.id)))?;
        data.extend_from_slice(format!("{} {}\0", entry.mode, entry.name).as_bytes());
        data.extend_from_slice(&raw_id);
    }
    Ok(data)
}

pub fn decode_tree(mut data: &[u8]) -> Result<Vec<RawTreeEntry>, HostError> {
    let malformed = || HostError::Decode("malformed tree object".into());
    let mut entries = Vec::new();
    while !data.is_empty() {
        let space = data.iter().position(|&b| b == b' ').ok_or_else(malformed)?;
        let null = data.iter().position(|&b| b == 0).ok_or_else(malformed)?;
        if null < space || data.len() < null + 21 {
            return Err(malformed());
        }
        let mode = std::str::from_utf8(&data[..space]).map_err(|_| malformed())?;
        let name = std::str::from_utf8(&data[space + 1..null]).map_err(|_| malformed())?;
        entries.push(RawTreeEntry {
            mode: mode.to_string(),
            name: name.to_string(),
            id: hex::encode(&data[null + 1..null + 21]),
        });
        data = &data[null + 21..];
    }
    Ok(entries)
}

/// The parts of a commit object this crate reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// "Name <email> <unix-seconds> <tz>"
    pub author: String,
    pub message: String,
}

pub fn encode_commit(commit: &RawCommit) -> Vec<u8> {
    let mut text = format!("tree {}\n", commit.tree);
    for parent in &commit.parents {
        text.push_str(&format!("parent {}\n", parent));
    }
    text.push_str(&format!("author {}\n", commit.author));
    text.push_str(&format!("committer {}\n\n", commit.author));
    text.push_str(&commit.message);
    if !commit.message.ends_with('\n') {
        text.push('\n');
    }
    text.into_bytes()
}

pub fn decode_commit(data: &[u8]) -> Result<RawCommit, HostError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| HostError::Decode("commit is not valid UTF-8".into()))?;
    let (headers, message) = text.split_once("\n\n").unwrap_or((text, ""));

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = String::new();
    for line in headers.lines() {
        if let Some(id) = line.strip_prefix("tree ") {
            tree = Some(id.to_string());
        } else if let Some(id) = line.strip_prefix("parent ") {
            parents.push(id.to_string());
        } else if let Some(who) = line.strip_prefix("author ") {
            author = who.to_string();
        }
    }

    Ok(RawCommit {
        tree: tree.ok_or_else(|| HostError::Decode("commit has no tree".into()))?,
        parents,
        author,
        message: message.to_string(),
    })
}
