//! Retrieval-augmented query path: embed, search, assemble context, generate.

pub mod prompt;
mod query;

pub use prompt::{AssembledContext, ContextBudget, assemble_context, system_prompt};
pub use query::{QueryError, QueryResult, QueryService, QuerySettings, SupportingChunk};
