//! Entry scanner for skiff.
//!
//! Turns dropped or picked items (local paths, in-memory blobs, remote paths)
//! into the flat entry list the transfer engine consumes.
//!
//! # Overview
//!
//! - **Pre-order listing**: each directory placeholder is emitted before its
//!   children, so a consumer can always create a directory before writing
//!   into it.
//! - **Cooperative**: yields to the runtime every few directory children so
//!   very large trees do not starve other tasks.
//! - **Recoverable**: an unreadable directory becomes a [`ScanWarning`] and is
//!   skipped; its siblings stay in the result.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(bridge: std::sync::Arc<dyn skiff_core::FsBridge>) {
//! use skiff_scan::{EntryScanner, ScanInput};
//!
//! let scanner = EntryScanner::new(bridge, 10);
//! let outcome = scanner.scan(vec![ScanInput::path("/home/me/docs")]).await;
//!
//! println!("{} files, {} bytes", outcome.file_count(), outcome.total_bytes());
//! # }
//! ```

mod progress;
mod scanner;

pub use progress::ScanProgress;
pub use scanner::{EntryScanner, ScanInput, ScanOutcome};

// Re-export core types for convenience
pub use skiff_core::{ContentHandle, Entry, ScanWarning, WarningKind};
