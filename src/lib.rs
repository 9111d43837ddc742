//! Cache-backed enrichment server for recorded camera footage.
//!
//! Browsing endpoints walk the camera/date/video directory layout; thumbnail
//! and label pipelines derive artifacts on demand through a single-flight,
//! content-addressed disk cache. Frame extraction shells out to ffmpeg;
//! classification goes to a remote worker or an embedded ONNX detector.

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod infer;
pub mod paths;
pub mod pipeline;
pub mod scanner;
pub mod supervisor;
