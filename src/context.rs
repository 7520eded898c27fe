//! Link-wide state shared by every worker during the scan and apply passes.

use crate::args::Args;
use crate::error::Error;
use crate::error::Result;
use anyhow::bail;
use bumpalo_herd::Herd;
use hashbrown::HashMap;
use itertools::Itertools as _;
use std::mem::take;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;

pub struct Context<'data> {
    pub args: Args,

    /// Backing store for decompressed section contents. The buffers live as
    /// long as the link, like the sections that borrow them.
    herd: &'data Herd,

    /// Set when any dynamic relocation lands in a read-only section, so the
    /// output can carry the `DT_TEXTREL` marker. Only meaningful if the link
    /// succeeds.
    pub has_textrel: AtomicBool,

    /// Undefined-reference sites, keyed by symbol name. Flushed by
    /// `report_undef_errors`.
    pub(crate) undef_errors: Mutex<HashMap<&'data str, Vec<String>>>,

    /// Non-fatal errors recorded while scanning continues. The next
    /// checkpoint fails the link if anything is in here.
    errors: Mutex<Vec<Error>>,
}

impl<'data> Context<'data> {
    pub fn new(args: Args, herd: &'data Herd) -> Self {
        Self {
            args,
            herd,
            has_textrel: AtomicBool::new(false),
            undef_errors: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn alloc_content(&self, len: usize) -> &'data mut [u8] {
        self.herd.get().alloc_slice_fill_default(len)
    }

    /// Records an error without stopping the current pass, so that one link
    /// reports every bad relocation rather than the first.
    pub fn report_error(&self, error: Error) {
        self.errors.lock().unwrap().push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().unwrap().is_empty()
    }

    /// Fails the link if any error was recorded since the last checkpoint.
    pub fn checkpoint(&self) -> Result {
        let mut errors: Vec<Error> = take(self.errors.lock().unwrap().as_mut());
        if errors.len() > 1 {
            let combined = errors.iter().map(|error| error.to_string()).join("\n");
            bail!("link failed with {} errors:\n{combined}", errors.len());
        }
        if let Some(error) = errors.pop() {
            return Err(error);
        }
        Ok(())
    }
}
