use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cacheable::{
    CacheBackend, CacheBinding, CacheKey, CacheLayer, CacheSettings, Cacheable, CallArgs,
    ClassSpec, MemoryBackend, MethodSpec, RedisBackend, TieredCache,
};

use crate::output::{print_stats, print_step, print_success};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

static USER_REPOSITORY: LazyLock<Arc<ClassSpec>> = LazyLock::new(|| {
    ClassSpec::builder("UserRepository")
        .method(
            MethodSpec::new("get_user")
                .params(["user_id"])
                .cache(Some(Duration::from_secs(300))),
        )
        .method(
            MethodSpec::new("update_user")
                .params(["user_id", "name"])
                .invalidate("get_user"),
        )
        .method(MethodSpec::new("clear").invalidate_all())
        .build()
});

/// In-memory user table whose reads are cached.
pub struct UserRepository {
    cache: CacheBinding,
    users: Mutex<HashMap<u64, String>>,
    fetches: AtomicUsize,
}

impl Cacheable for UserRepository {
    fn cache_binding(&self) -> &CacheBinding {
        &self.cache
    }
}

impl UserRepository {
    pub fn new(layer: Arc<dyn CacheLayer>) -> Self {
        let users = (1..=3).map(|id| (id, format!("User {id}"))).collect();
        Self {
            cache: CacheBinding::new(USER_REPOSITORY.clone(), layer),
            users: Mutex::new(users),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn get_user(&self, user_id: u64) -> Result<User> {
        let args = CallArgs::new().arg("user_id", &user_id)?;
        self.cache_binding()
            .invoke("get_user", args, || async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                // Simulated database round trip
                tokio::time::sleep(Duration::from_millis(20)).await;
                let name = self
                    .users
                    .lock()
                    .get(&user_id)
                    .cloned()
                    .with_context(|| format!("user {user_id} not found"))?;
                Ok(User { id: user_id, name })
            })
            .await
    }

    pub async fn update_user(&self, user_id: u64, name: &str) -> Result<()> {
        let args = CallArgs::new()
            .arg("user_id", &user_id)?
            .arg("name", name)?;
        self.cache_binding()
            .invoke("update_user", args, || async move {
                let mut users = self.users.lock();
                let entry = users
                    .get_mut(&user_id)
                    .with_context(|| format!("user {user_id} not found"))?;
                *entry = name.to_string();
                Ok(())
            })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.cache_binding()
            .invoke("clear", CallArgs::new(), || async { Ok(()) })
            .await
    }
}

pub async fn demo(layer: Arc<dyn CacheLayer>) -> Result<()> {
    let repo = UserRepository::new(layer.clone());

    for _ in 0..2 {
        let user = repo.get_user(1).await?;
        print_step(&format!(
            "get_user(1) = {} (fetches: {})",
            serde_json::to_string(&user)?,
            repo.fetches()
        ));
    }

    repo.update_user(1, "X").await?;
    print_step("update_user(1, \"X\")");

    let user = repo.get_user(1).await?;
    print_step(&format!(
        "get_user(1) = {} (fetches: {})",
        serde_json::to_string(&user)?,
        repo.fetches()
    ));

    repo.clear().await?;
    print_step("clear()");

    print_stats(&layer.stats());
    print_success("Demo finished");
    Ok(())
}

pub async fn ttl(layer: Arc<dyn CacheLayer>, ttl: Duration) -> Result<()> {
    let key = CacheKey::from_raw(format!("cli:ttl:{}", std::process::id()));
    let computed = AtomicUsize::new(0);

    let checkpoints = [Duration::ZERO, ttl * 2 / 5, ttl * 2];
    let start = tokio::time::Instant::now();
    for at in checkpoints {
        tokio::time::sleep_until(start + at).await;
        cacheable::read_through(layer.as_ref(), &key, Some(ttl), || async {
            Ok::<_, anyhow::Error>(computed.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .await?;
        print_step(&format!(
            "read at {:>4}ms: computations = {}",
            at.as_millis(),
            computed.load(Ordering::SeqCst)
        ));
    }

    layer.invalidate(&key).await?;
    print_stats(&layer.stats());
    print_success("TTL scenario finished");
    Ok(())
}

/// Two processes sharing one slow tier, each with its own fast tier.
pub async fn tier(settings: &CacheSettings) -> Result<()> {
    let slow: Arc<dyn CacheBackend> = if settings.backend.uses_redis() {
        Arc::new(RedisBackend::connect(&settings.redis).await?)
    } else {
        Arc::new(MemoryBackend::new())
    };
    print_step(&format!("slow tier: {}", slow.name()));

    let fast_ttl = settings.tier.fast_ttl();
    let first: Arc<dyn CacheLayer> = Arc::new(TieredCache::new(
        Arc::new(MemoryBackend::new()),
        slow.clone(),
        fast_ttl,
    ));
    let second_fast = Arc::new(MemoryBackend::new());
    let second: Arc<dyn CacheLayer> = Arc::new(TieredCache::new(
        second_fast.clone(),
        slow.clone(),
        fast_ttl,
    ));

    let writer = UserRepository::new(first);
    let reader = UserRepository::new(second.clone());

    writer.get_user(2).await?;
    print_step(&format!("instance A computed get_user(2) (fetches: {})", writer.fetches()));

    for _ in 0..2 {
        let user = reader.get_user(2).await?;
        print_step(&format!(
            "instance B read {} (fetches: {}, fast entries: {})",
            user.name,
            reader.fetches(),
            second_fast.len()
        ));
    }

    writer.clear().await?;
    print_stats(&second.stats());
    print_success("Tier scenario finished");
    Ok(())
}

pub async fn ping(settings: &CacheSettings) -> Result<()> {
    if !settings.backend.uses_redis() {
        print_success("In-memory backend, nothing to ping");
        return Ok(());
    }
    let backend = RedisBackend::new(&settings.redis)?;
    backend
        .ping()
        .await
        .with_context(|| format!("Redis at {}:{}", settings.redis.host, settings.redis.port))?;
    print_success(&format!(
        "Redis at {}:{} answered",
        settings.redis.host, settings.redis.port
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_layer() -> Arc<dyn CacheLayer> {
        Arc::new(cacheable::CacheCoordinator::new(Arc::new(MemoryBackend::new())))
    }

    #[tokio::test]
    async fn test_update_is_visible_after_invalidation() {
        let repo = UserRepository::new(memory_layer());

        assert_eq!(repo.get_user(1).await.unwrap().name, "User 1");
        repo.update_user(1, "X").await.unwrap();
        assert_eq!(repo.users.lock().get(&1).map(String::as_str), Some("X"));

        assert_eq!(repo.get_user(1).await.unwrap().name, "X");
        assert_eq!(repo.fetches(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_is_reported() {
        let repo = UserRepository::new(memory_layer());

        let err = repo.update_user(9, "X").await.unwrap_err();
        assert!(err.to_string().contains("user 9 not found"));
        assert!(repo.get_user(9).await.is_err());
    }
}
