use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::mailer::{self, Mailer};
use crate::rate_limit::RateLimiter;
use crate::storage::{LocalStorage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = crate::db::connect(&config.database_url).await?;
        let storage =
            Arc::new(LocalStorage::new(config.upload_dir.clone()).await?) as Arc<dyn StorageClient>;
        let mailer = mailer::build(&config.mail)?;
        Ok(Self::from_parts(db, config, storage, mailer))
    }

    pub fn from_parts(
        db: PgPool,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            db,
            config,
            storage,
            mailer,
            limiter,
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    /// Records every put/delete; `fail_deletes` makes deletes error.
    #[derive(Default)]
    pub struct FakeStorage {
        pub stored: Mutex<Vec<String>>,
        pub deleted: Mutex<Vec<String>>,
        pub fail_deletes: bool,
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(
            &self,
            field: &str,
            _body: Bytes,
            content_type: &str,
            original_name: Option<&str>,
        ) -> anyhow::Result<String> {
            let name = crate::storage::generate_file_name(field, content_type, original_name);
            self.stored.lock().unwrap().push(name.clone());
            Ok(name)
        }
        async fn delete_object(&self, reference: &str) -> anyhow::Result<()> {
            self.deleted.lock().unwrap().push(reference.to_string());
            if self.fail_deletes {
                anyhow::bail!("disk on fire");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    impl AppState {
        /// Lazily connecting pool, so nothing touches a real DB unless queried.
        pub fn fake() -> Self {
            Self::fake_with(AppConfig::for_tests())
        }

        pub fn fake_with(config: AppConfig) -> Self {
            let db = sqlx::postgres::PgPoolOptions::new()
                .connect_lazy(&config.database_url)
                .expect("lazy pool ok");
            Self::from_parts(
                db,
                Arc::new(config),
                Arc::new(FakeStorage::default()),
                Arc::new(FakeMailer::default()),
            )
        }
    }
}
