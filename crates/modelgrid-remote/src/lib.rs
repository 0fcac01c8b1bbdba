//! modelgrid-remote — HTTP implementations of the collaborator traits.
//!
//! ```text
//! RemoteConfig::connect()
//!   ├── RemoteEmbedder     POST /embed
//!   ├── RemoteTrainer      POST /train → RemoteModel (POST /models/{id}/predict)
//!   ├── RemoteBackend      POST /services/{svc}/traffic, GET …/health
//!   ├── RemoteDataSource   GET /services/{svc}/traffic, GET …/examples
//!   └── LogNotifier | WebhookNotifier, wrapped by GithubIssueNotifier
//! ```

pub mod client;
pub mod collaborators;
pub mod config;
pub mod notify;

pub use client::HttpClient;
pub use collaborators::{RemoteBackend, RemoteDataSource, RemoteEmbedder, RemoteModel, RemoteTrainer};
pub use config::{GithubConfig, RemoteCollaborators, RemoteConfig};
pub use notify::{GithubIssueNotifier, LogNotifier, WebhookNotifier};
