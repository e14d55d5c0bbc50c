//! Memory primitives for the `amalgam` runtime.
//!
//! - [`layout`]: pure placement math for mixin buffers and their
//!   back-reference slots
//! - [`arena`]: a thread-safe chunked bump arena backing pooled allocators

pub mod arena;
pub mod layout;

pub use arena::{Arena, ArenaStats};
pub use layout::{
    BACK_REFERENCE_SIZE, align_up, calculate_mem_size_for_mixin, calculate_mixin_offset,
    is_valid_alignment, is_valid_placement,
};
