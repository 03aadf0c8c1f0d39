//! Core of a multi-pane medical image viewer: per-pane viewing sessions, the
//! canvas transform, tools, overlay compositing and the layout that ties panes
//! together. The eframe shell in [`app`] only forwards input.

pub mod analysis;
pub mod app;
pub mod compositor;
pub mod config;
pub mod dicom;
pub mod error;
pub mod hanging;
pub mod launch;
pub mod layout;
pub mod loader;
pub mod measure;
pub mod renderer;
pub mod session;
pub mod shortcuts;
pub mod snapshot;
pub mod tools;
pub mod transform;

#[cfg(test)]
mod test_support;
