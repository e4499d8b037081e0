//! Persistence of subscription lists.
//!
//! The aggregation engine only needs two things from storage: the set of
//! subscribed channel ids and a way to write enriched thumbnails back. Both
//! live in [`SubscriptionStore`], a small JSON-file store.

mod lists;

pub use lists::{
    StoreError, SubscriptionInList, SubscriptionList, SubscriptionListsData, SubscriptionStore,
    DEFAULT_LIST_ID,
};
