//! Small text helpers shared by the stores and the chat pipeline.

pub mod text_utils;

pub use text_utils::TextUtils;
