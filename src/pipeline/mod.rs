//! Pipeline stages for turning petition scans into wire-ready page images.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested alone and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ normalize ──▶ encode
//! (bytes)   (pdfium)   (crop+grey)   (base64 PNG)
//! ```
//!
//! 1. [`input`]     — read the file and decide PDF vs. image
//! 2. [`render`]    — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`normalize`] — vertical crop, greyscale, deterministic page names
//! 4. [`encode`]    — PNG-encode and base64-wrap each page for the vendor
//!
//! [`crate::preprocess::ImagePreprocessor`] drives steps 1–3.

pub mod encode;
pub mod input;
pub mod normalize;
pub mod render;
