//! SQLite persistence for sources, articles and the domain blocklist.

mod articles;
mod blocklist;
mod schema;
mod sources;
mod types;

pub use articles::{ARTICLE_INSERT_CHUNK, MAX_BOUND_PARAMS};
pub use schema::Database;
pub use types::{
    Article, BlockedDomain, DatabaseError, IconType, NewArticle, Source, SourceMetadata,
};
