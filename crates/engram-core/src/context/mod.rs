//! Context assembly
//!
//! Budgeted, deduplicated, per-source markdown composition over
//! search results, for injection into an agent's prompt.

pub mod assembler;
pub mod dedup;
pub mod formatting;
pub mod models;
pub mod tokens;

pub use assembler::ContextAssembler;
pub use dedup::deduplicate_items;
pub use formatting::{
    assemble_markdown, assemble_premortem_markdown, format_code, format_commit, format_experience,
    format_memory, format_value,
};
pub use models::{
    ContextConfig, ContextError, ContextItem, DedupKey, FormattedContext, SourceKind,
};
pub use tokens::{cap_item_tokens, distribute_budget, estimate_tokens, truncate_to_tokens};
