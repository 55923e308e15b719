//! Cookieconsent Store - SQLite persistence for consent totals, the cookie
//! registry, and banner configuration, plus the schema normalizer that
//! upgrades legacy layouts in place.

pub mod banner;
pub mod clock;
pub mod counter;
pub mod db;
pub mod install;
pub mod normalize;
pub mod registry;
pub mod schema;
pub mod tables;

pub use banner::BannerConfigStore;
pub use clock::{Clock, FixedClock, SystemClock, UidGenerator, UuidGenerator};
pub use counter::ConsentCounter;
pub use db::Database;
pub use install::{install, uninstall};
pub use normalize::{NormalizeReport, SchemaNormalizer, Step, StepOutcome, StepRecord};
pub use registry::CookieRegistry;
