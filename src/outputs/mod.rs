//! Output writers.
//!
//! # Output Structure
//!
//! ```text
//! report_dir/
//! └── 2025-03-07/
//!     ├── 091500.json
//!     └── 153000.json
//! ```

pub mod json;
