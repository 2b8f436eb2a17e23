//! Storage wrapper that fails writes on demand.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

/// Delegates to `inner` until armed. While armed, appends write half of
/// their first buffer and then fail. With `fail_rewrites` set, whole-file
/// writes fail as well.
#[derive(Debug)]
pub struct FaultyStorage {
    inner: Arc<dyn Storage>,
    tear_appends: AtomicBool,
    fail_rewrites: AtomicBool,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            tear_appends: AtomicBool::new(false),
            fail_rewrites: AtomicBool::new(false),
        }
    }

    pub fn tear_appends(&self, on: bool) {
        self.tear_appends.store(on, Ordering::SeqCst);
    }

    pub fn fail_rewrites(&self, on: bool) {
        self.fail_rewrites.store(on, Ordering::SeqCst);
    }
}

impl Storage for FaultyStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(name)
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        if self.fail_rewrites.load(Ordering::SeqCst) {
            return Err(StorageError::IoError("disk full".into()).into());
        }
        self.inner.create_output(name)
    }

    fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let output = self.inner.create_output_append(name)?;
        if self.tear_appends.load(Ordering::SeqCst) {
            Ok(Box::new(TornOutput { inner: output }))
        } else {
            Ok(output)
        }
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner.rename_file(old_name, new_name)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

#[derive(Debug)]
struct TornOutput {
    inner: Box<dyn StorageOutput>,
}

impl Write for TornOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(&buf[..buf.len() / 2])?;
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StorageOutput for TornOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.inner.flush_and_sync()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
