//! CRM reconciliation of flushed batches.

mod crm_traits;
mod memory_store;
mod message_merge;
mod person_resolution;
mod reconcile_model;
mod reconciler;

pub use crm_traits::CrmStore;
pub use memory_store::{InMemoryCrmStore, UpdateCall};
pub use message_merge::{apply_message_engagement, merge_clicked_urls};
pub use person_resolution::{email_domain, normalize_domain, resolve_targets, ResolvedTargets};
pub use reconcile_model::*;
pub use reconciler::Reconciler;
