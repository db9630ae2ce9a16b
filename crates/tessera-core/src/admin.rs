//! User administration and authentication on the [`Router`].
//!
//! User records are kept on every shard. A change is applied shard by
//! shard, the local one first, and stops at the first shard that fails.

use std::sync::Arc;

use tessera_pool::{Context, PoolResult, Shard};
use tessera_store::StoreError;
use tessera_types::{Level, User, UserClaims};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::router::Router;

impl Router {
    /// Check a login and password and open a session.
    pub async fn authenticate(&self, login: &str, password: &str) -> CoreResult<String> {
        self.auth.auth_by_password(login, password).await
    }

    /// Resolve a session token to its claims.
    pub async fn claims(&self, token: &str) -> CoreResult<UserClaims> {
        self.auth.auth_by_token(token).await
    }

    /// Callers may administer users up to their own level.
    fn require_user_admin(&self, claims: Option<&UserClaims>, level: Level) -> CoreResult<()> {
        if !self.security.enabled {
            return Ok(());
        }
        match claims {
            Some(c) if c.level.permits(level) => Ok(()),
            _ => Err(CoreError::Forbidden),
        }
    }

    async fn put_user_everywhere(&self, ctx: &Context, user: &User) -> CoreResult<()> {
        self.pool
            .iter(move |shard: Arc<dyn Shard>| async move { shard.put_user(ctx, user).await })
            .await?;
        Ok(())
    }

    /// Create a user. Returns the id the local shard assigned.
    pub async fn create_user(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        login: &str,
        password: &str,
        level: Level,
    ) -> CoreResult<u64> {
        self.require_user_admin(claims, level)?;
        self.admitted(ctx, async {
            if self.store.user_by_name(login).is_ok() {
                return Err(StoreError::UserExists(login.to_string()).into());
            }
            let user = User::new(login, password, level);
            self.put_user_everywhere(ctx, &user).await?;
            let id = self.store.user_by_name(login)?.id;
            info!(login, %level, id, "user created");
            Ok(id)
        })
        .await
    }

    /// Deactivate a user on every shard.
    ///
    /// Shards that never had the user are skipped.
    pub async fn delete_user(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        login: &str,
    ) -> CoreResult<()> {
        let target = self.store.user_by_name(login)?;
        self.require_user_admin(claims, target.level)?;
        self.admitted(ctx, async {
            self.pool
                .iter(move |shard: Arc<dyn Shard>| async move {
                    match shard.delete_user(ctx, login).await {
                        Err(e) if e.is_not_found() => PoolResult::Ok(()),
                        other => other,
                    }
                })
                .await?;
            info!(login, "user deleted");
            Ok(())
        })
        .await
    }

    pub async fn change_password(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        login: &str,
        password: &str,
    ) -> CoreResult<()> {
        let mut user = self.store.user_by_name(login)?;
        self.require_user_admin(claims, user.level)?;
        self.admitted(ctx, async {
            user.set_password(password);
            self.put_user_everywhere(ctx, &user).await?;
            info!(login, "password changed");
            Ok(())
        })
        .await
    }

    /// Move a user to another level. The caller must be cleared for both
    /// the old and the new level.
    pub async fn change_level(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        login: &str,
        level: Level,
    ) -> CoreResult<()> {
        let mut user = self.store.user_by_name(login)?;
        self.require_user_admin(claims, user.level.max(level))?;
        self.admitted(ctx, async {
            user.level = level;
            self.put_user_everywhere(ctx, &user).await?;
            info!(login, %level, "user level changed");
            Ok(())
        })
        .await
    }
}
