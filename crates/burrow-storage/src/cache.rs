//! Read-through page cache with dirty tracking.
//!
//! The cache is what ties page modifications to the log: a transaction
//! mutates cached pages, and only a flush writes them to the data file
//! (recording FLUSH_PAGE so recovery can skip redo for them).

use burrow_common::{BurrowError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::pagefile::PageFile;

/// One cached page.
#[derive(Debug, Clone)]
pub struct Page {
    address: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl Page {
    fn new(address: u64, data: Vec<u8>) -> Self {
        Self {
            address,
            data,
            dirty: false,
        }
    }

    /// Byte offset of this page in the data file.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Current page contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copies `bytes` into the page at `rel` and marks it dirty.
    pub fn patch(&mut self, rel: usize, bytes: &[u8]) {
        self.data[rel..rel + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }

    /// Replaces the whole page content and marks it dirty.
    pub fn replace(&mut self, data: Vec<u8>) {
        self.data = data;
        self.dirty = true;
    }

    /// True if the page has modifications not yet written to the file.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after a flush.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

/// Read-through cache of page-aligned offsets to page buffers.
pub struct PageCache {
    pages: HashMap<u64, Page>,
    page_size: usize,
}

impl PageCache {
    /// Creates an empty cache for pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            pages: HashMap::new(),
            page_size,
        }
    }

    /// Returns the cached page at `address`, loading it from the data
    /// file on first access. The address must be page-aligned.
    pub fn get_or_load(&mut self, file: &PageFile, address: u64) -> Result<&mut Page> {
        if address % self.page_size as u64 != 0 {
            return Err(BurrowError::invalid_parameter("address", address));
        }

        match self.pages.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let data = file.read(address, self.page_size)?;
                Ok(entry.insert(Page::new(address, data)))
            }
        }
    }

    /// Returns the cached page at `address`, if present.
    pub fn get(&self, address: u64) -> Option<&Page> {
        self.pages.get(&address)
    }

    /// Returns the cached page at `address` mutably, if present.
    pub fn get_mut(&mut self, address: u64) -> Option<&mut Page> {
        self.pages.get_mut(&address)
    }

    /// Addresses of all dirty pages, in address order.
    pub fn dirty_addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self
            .pages
            .values()
            .filter(|p| p.is_dirty())
            .map(|p| p.address())
            .collect();
        addresses.sort_unstable();
        addresses
    }

    /// Drops all dirty flags without writing anything.
    ///
    /// Pages keep their (possibly modified) contents but will not be
    /// flushed; crash-simulation tests use this to force recovery to
    /// replay the log.
    pub fn clear_dirty_flags(&mut self) {
        for page in self.pages.values_mut() {
            page.clear_dirty();
        }
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
