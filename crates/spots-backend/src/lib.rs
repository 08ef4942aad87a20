//! Data-access layer for spots, reviews, and pilot profiles, plus the
//! app-open ad runtime.

pub mod app_open_ad;
pub mod repository;

pub use app_open_ad::{AppOpenAdManager, LoadOptions};
pub use repository::{RepositoryConfig, ReviewAdded, SpotsError, SpotsRepository};
