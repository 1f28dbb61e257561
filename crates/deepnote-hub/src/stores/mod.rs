pub mod github;

pub use github::{GitHubConfig, GitHubDocumentStore};
