//! Snapshot storage
//!
//! Configuration documents move between the engine and the device as files;
//! the store names them `<base_name>_<postfix>.xml` under one directory so a
//! cycle's snapshots (export, merge base, clone reference, preset) are
//! inspectable after the fact.

use crate::document::Document;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Role of a snapshot within one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postfix {
    /// The device's own export taken at the start of the cycle.
    Original,
    /// The merged document submitted to the device.
    Base,
    /// A reference export from another server, used when cloning.
    Reference,
    /// The minimal preparatory document imported before the main one.
    Preset,
}

impl Postfix {
    fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Base => "base",
            Self::Reference => "reference",
            Self::Preset => "preset",
        }
    }
}

/// File-backed document storage for one target device.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    base_name: String,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the named snapshot.
    pub fn path(&self, postfix: Postfix) -> PathBuf {
        self.dir
            .join(format!("{}_{}.xml", self.base_name, postfix.as_str()))
    }

    /// Read and parse the named snapshot.
    pub fn read(&self, postfix: Postfix) -> Result<Document> {
        let text = std::fs::read_to_string(self.path(postfix))?;
        Document::parse(&text)
    }

    /// Serialize a document into the named snapshot, returning its path.
    pub fn write(&self, postfix: Postfix, doc: &Document) -> Result<PathBuf> {
        let path = self.path(postfix);
        std::fs::write(&path, doc.to_xml())?;
        Ok(path)
    }
}
