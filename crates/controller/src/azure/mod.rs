//! Azure Resource Manager access for scale-set instances.

pub mod client;
pub mod credential;
pub mod models;

pub use client::ComputeClient;
pub use credential::AzureCredential;
