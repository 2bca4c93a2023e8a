pub mod batch;
pub mod candidates;
pub mod config;
pub mod edits;
pub mod error;
pub mod mediawiki;
pub mod patch;
pub mod registry;
pub mod session;
pub mod summary;
pub mod wikitext;
