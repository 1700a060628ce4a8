//! Transaction context.
//!
//! A transaction remembers the before-image of every page it touches.
//! The images serve two purposes: the first touch of a page is logged
//! as a PREWRITE (crash undo), and an in-process abort restores the
//! cached pages from them directly.

use burrow_common::TxnId;
use std::collections::BTreeMap;

/// An open transaction on a database handle.
pub struct Transaction {
    id: TxnId,
    before_images: BTreeMap<u64, Vec<u8>>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId) -> Self {
        Self {
            id,
            before_images: BTreeMap::new(),
        }
    }

    /// This transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// True if the page at `address` was already touched (and therefore
    /// its before-image logged).
    pub(crate) fn is_touched(&self, address: u64) -> bool {
        self.before_images.contains_key(&address)
    }

    /// Remembers the pre-modification content of the page at `address`.
    pub(crate) fn record_before(&mut self, address: u64, image: Vec<u8>) {
        self.before_images.entry(address).or_insert(image);
    }

    /// Addresses of all touched pages, in address order.
    pub(crate) fn touched_pages(&self) -> Vec<u64> {
        self.before_images.keys().copied().collect()
    }

    /// Consumes the transaction, yielding the saved before-images.
    pub(crate) fn into_before_images(self) -> BTreeMap<u64, Vec<u8>> {
        self.before_images
    }
}
