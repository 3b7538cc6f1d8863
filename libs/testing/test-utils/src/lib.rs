//! Shared test infrastructure for the reminder crates.
//!
//! - `TestDatabase`: a throwaway PostgreSQL container with every migration applied
//! - `TestBroker`: a throwaway RabbitMQ with the delayed-message plugin
//! - `TestDataBuilder`: deterministic ids, emails and bodies derived from the test name
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let data = TestDataBuilder::from_test_name("my_postgres_test");
//!     let user_id = db.create_test_user(&data.email("owner")).await;
//! }
//! ```

mod postgres;
mod rabbitmq;

pub use postgres::TestDatabase;
pub use rabbitmq::TestBroker;

/// Deterministic test data keyed by a seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name so reruns produce the same data.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Positive id in the upper half of the `i64` range, out of reach of BIGSERIAL rows.
    pub fn user_id(&self) -> i64 {
        (self.seed >> 2) as i64 | (1 << 61)
    }

    pub fn email(&self, label: &str) -> String {
        format!("{}-{}@reminders.test", label, self.seed)
    }

    pub fn body(&self, label: &str) -> String {
        format!("test reminder {} #{}", label, self.seed % 10_000)
    }
}
