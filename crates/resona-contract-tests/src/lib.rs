#![forbid(unsafe_code)]

//! Cross-crate contract tests: golden JSON config fixtures and worker
//! behavior driven through a mock backend. Nothing in here touches a live
//! GL context.

#[cfg(test)]
mod worker_contracts;
