//! Object operations on the [`Router`].
//!
//! Objects are placed by their top-level name. The node's object index
//! records which shard owns each top-level object and the level that
//! guards it; nested paths follow their root.

use std::sync::Arc;

use tessera_pool::{Context, Shard};
use tessera_store::StoreError;
use tessera_types::{
    root_of, split_path, Level, ObjectInfo, ObjectOpOptions, ObjectOptions, SetToObjectOptions,
    ShardTarget, UserClaims,
};
use tracing::debug;

use crate::error::CoreResult;
use crate::router::Router;

impl Router {
    /// Owning shard and guard level of the object `path` lives under.
    ///
    /// An explicit shard wins over the index. Without one, an object the
    /// index does not know is [`StoreError::ObjectNotFound`].
    fn route_object(&self, path: &str, target: ShardTarget) -> CoreResult<(Arc<dyn Shard>, Level)> {
        split_path(path).map_err(StoreError::from)?;
        let root = root_of(path);
        let info = self.store.object_info(root).ok();
        let level = info.map(|i| i.level).unwrap_or_default();
        let shard = match (target, info) {
            (ShardTarget::Shard(id), _) => self.pool.shard(id)?,
            (_, Some(info)) => self.pool.shard(info.shard)?,
            (_, None) => return Err(StoreError::ObjectNotFound(root.to_string()).into()),
        };
        Ok((shard, level))
    }

    async fn record_object_info(&self, name: &str, info: ObjectInfo) {
        self.store.add_object_info(name, info);
        if let Some(log) = &self.log {
            log.write_add_object_info(name, info).await;
        }
    }

    async fn forget_object_info(&self, name: &str) {
        if self.store.delete_object_info(name) {
            if let Some(log) = &self.log {
                log.write_delete_object_info(name).await;
            }
        }
    }

    /// Create the object at `path` and any missing parents.
    ///
    /// A new top-level object goes to the explicit shard or the one with the
    /// most free memory. Nested paths go to their root's shard.
    pub async fn create_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        opts: ObjectOptions,
    ) -> CoreResult<ShardTarget> {
        split_path(path).map_err(StoreError::from)?;
        let root = root_of(path);
        let known = self.store.object_info(root).ok();
        let guard = known.map_or(opts.level, |i| i.level.max(opts.level));
        self.require(claims, guard)?;

        self.admitted(ctx, async {
            let shard = match (opts.target, known) {
                (ShardTarget::Shard(id), _) => self.pool.shard(id)?,
                (_, Some(info)) => self.pool.shard(info.shard)?,
                (_, None) => self.pool.pick_best()?,
            };
            shard.create_object(ctx, path, opts.level).await?;

            let id = shard.id();
            let is_root = root == path;
            if known.is_none() || is_root {
                let level = if is_root { opts.level } else { Level::Default };
                self.record_object_info(root, ObjectInfo::new(id, level)).await;
            }
            debug!(path, shard = %id, "object created");
            Ok(ShardTarget::Shard(id))
        })
        .await
    }

    pub async fn set_to_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        key: &str,
        data: &str,
        opts: SetToObjectOptions,
    ) -> CoreResult<()> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async {
            shard.set_to_object(ctx, path, key, data, opts.read_only).await?;
            Ok(())
        })
        .await
    }

    pub async fn get_from_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        key: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<String> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async { Ok(shard.get_from_object(ctx, path, key).await?) })
            .await
    }

    /// Tab-indented JSON of the object at `path`.
    pub async fn object_to_json(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<String> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async { Ok(shard.object_to_json(ctx, path).await?) })
            .await
    }

    pub async fn object_size(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<u64> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async { Ok(shard.object_size(ctx, path).await?) })
            .await
    }

    /// Whether `path` resolves to an object. Unknown roots are simply `false`.
    pub async fn is_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<bool> {
        let (shard, level) = match self.route_object(path, opts.target) {
            Ok(routed) => routed,
            Err(e) if e.kind() == tessera_types::ErrorKind::ObjectNotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        self.require(claims, level)?;
        self.admitted(ctx, async { Ok(shard.is_object(ctx, path).await?) })
            .await
    }

    /// Delete the object at `path`. Deleting a top-level object also drops
    /// its index entry.
    pub async fn delete_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<()> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async {
            shard.delete_object(ctx, path).await?;
            let root = root_of(path);
            if root == path {
                self.forget_object_info(root).await;
            }
            debug!(path, shard = %shard.id(), "object deleted");
            Ok(())
        })
        .await
    }

    /// Attach the object `src` under `dst`. Both live on `dst`'s shard.
    pub async fn attach_to_object(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        dst: &str,
        src: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<()> {
        let (shard, level) = self.route_object(dst, opts.target)?;
        split_path(src).map_err(StoreError::from)?;
        let src_level = self
            .store
            .object_info(root_of(src))
            .map(|i| i.level)
            .unwrap_or_default();
        self.require(claims, level.max(src_level))?;
        self.admitted(ctx, async {
            shard.attach_to_object(ctx, dst, src).await?;
            Ok(())
        })
        .await
    }

    pub async fn delete_attr(
        &self,
        ctx: &Context,
        claims: Option<&UserClaims>,
        path: &str,
        key: &str,
        opts: ObjectOpOptions,
    ) -> CoreResult<()> {
        let (shard, level) = self.route_object(path, opts.target)?;
        self.require(claims, level)?;
        self.admitted(ctx, async {
            shard.delete_attr(ctx, path, key).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::router::tests::harness;
    use tessera_types::{ErrorKind, Ram, ShardId};
    use tessera_wal::{read_all, Mutation, TransactionLog, WalConfig};

    fn remotes() -> [Ram; 2] {
        [Ram::new(100, 30), Ram::new(100, 60)]
    }

    #[tokio::test]
    async fn nested_paths_follow_their_root() {
        let h = harness(&remotes(), None).await;
        let ctx = Context::background();
        let r = &h.router;

        let placed = r
            .create_object(&ctx, None, "user", ObjectOptions::default())
            .await
            .unwrap();
        assert_eq!(placed, ShardTarget::Shard(ShardId::new(2)));

        // Shard 1 now has more room, but the subtree stays with its root.
        h.remote(1).set_ram(Ram::new(100, 99));
        let placed = r
            .create_object(&ctx, None, "user.profile", ObjectOptions::default())
            .await
            .unwrap();
        assert_eq!(placed, ShardTarget::Shard(ShardId::new(2)));

        let any = ObjectOpOptions::default();
        r.set_to_object(&ctx, None, "user.profile", "name", "ada", SetToObjectOptions::default())
            .await
            .unwrap();
        assert_eq!(
            r.get_from_object(&ctx, None, "user.profile", "name", any).await.unwrap(),
            "ada"
        );
        assert_eq!(r.object_size(&ctx, None, "user", any).await.unwrap(), 1);
        assert!(r.is_object(&ctx, None, "user.profile", any).await.unwrap());
        assert!(!r.is_object(&ctx, None, "nobody", any).await.unwrap());
        assert!(r
            .object_to_json(&ctx, None, "user", any)
            .await
            .unwrap()
            .contains("\"ada\""));
        assert_eq!(h.remote(1).calls("CreateObject"), 0);
    }

    #[tokio::test]
    async fn unknown_objects_are_not_found() {
        let h = harness(&remotes(), None).await;
        let ctx = Context::background();
        let err = h
            .router
            .get_from_object(&ctx, None, "ghost", "k", ObjectOpOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);

        let err = h
            .router
            .create_object(&ctx, None, "a..b", ObjectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
    }

    #[tokio::test]
    async fn object_level_guards_every_operation() {
        let h = harness(&remotes(), None).await;
        let ctx = Context::background();
        let admin = UserClaims::new("root", Level::Secret);
        let user = UserClaims::new("u", Level::Default);
        let any = ObjectOpOptions::default();

        h.router
            .create_object(&ctx, Some(&admin), "vault", ObjectOptions::with_level(Level::Secret))
            .await
            .unwrap();

        let denied = [
            h.router
                .create_object(&ctx, Some(&user), "vault.inner", ObjectOptions::default())
                .await
                .unwrap_err(),
            h.router
                .set_to_object(&ctx, Some(&user), "vault", "k", "v", SetToObjectOptions::default())
                .await
                .unwrap_err(),
            h.router
                .object_to_json(&ctx, Some(&user), "vault", any)
                .await
                .unwrap_err(),
            h.router
                .delete_object(&ctx, Some(&user), "vault", any)
                .await
                .unwrap_err(),
        ];
        for err in denied {
            assert!(matches!(err, CoreError::Forbidden), "{err:?}");
        }
        assert_eq!(h.remote(2).calls("SetToObject"), 0);
        assert_eq!(h.remote(2).calls("DeleteObject"), 0);

        h.router
            .set_to_object(&ctx, Some(&admin), "vault", "k", "v", SetToObjectOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attach_checks_both_objects() {
        let h = harness(&[], None).await;
        let ctx = Context::background();
        let admin = UserClaims::new("root", Level::Secret);
        let user = UserClaims::new("u", Level::Default);
        let any = ObjectOpOptions::default();

        h.router
            .create_object(&ctx, None, "shelf", ObjectOptions::default())
            .await
            .unwrap();
        h.router
            .create_object(&ctx, Some(&admin), "jewels", ObjectOptions::with_level(Level::Secret))
            .await
            .unwrap();
        h.router
            .create_object(&ctx, None, "books", ObjectOptions::default())
            .await
            .unwrap();

        let err = h
            .router
            .attach_to_object(&ctx, Some(&user), "shelf", "jewels", any)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));

        h.router
            .attach_to_object(&ctx, Some(&user), "shelf", "books", any)
            .await
            .unwrap();
        assert!(h.router.is_object(&ctx, None, "shelf.books", any).await.unwrap());

        let err = h
            .router
            .attach_to_object(&ctx, None, "books", "shelf", any)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularAttachment);
    }

    #[tokio::test]
    async fn root_delete_drops_index_entry() {
        let h = harness(&remotes(), None).await;
        let ctx = Context::background();
        let any = ObjectOpOptions::default();
        h.router
            .create_object(&ctx, None, "tmp.a", ObjectOptions::default())
            .await
            .unwrap();
        h.router
            .set_to_object(&ctx, None, "tmp.a", "x", "1", SetToObjectOptions::default())
            .await
            .unwrap();

        h.router.delete_attr(&ctx, None, "tmp.a", "x", any).await.unwrap();
        h.router.delete_object(&ctx, None, "tmp.a", any).await.unwrap();
        assert!(h.router.store().object_info("tmp").is_ok());

        h.router.delete_object(&ctx, None, "tmp", any).await.unwrap();
        assert!(h.router.store().object_info("tmp").is_err());
        assert!(!h.router.is_object(&ctx, None, "tmp", any).await.unwrap());
    }

    #[tokio::test]
    async fn index_changes_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(TransactionLog::open(&WalConfig::in_dir(dir.path())).unwrap());
        let h = harness(&[], Some(Arc::clone(&log))).await;
        let ctx = Context::background();

        h.router
            .create_object(&ctx, None, "cfg", ObjectOptions::with_level(Level::Restricted))
            .await
            .unwrap_err();
        let admin = UserClaims::new("root", Level::Secret);
        h.router
            .create_object(&ctx, Some(&admin), "cfg", ObjectOptions::with_level(Level::Restricted))
            .await
            .unwrap();
        h.router
            .delete_object(&ctx, Some(&admin), "cfg", ObjectOpOptions::default())
            .await
            .unwrap();
        log.flush().await;

        let mut seen = Vec::new();
        read_all(dir.path(), |_, m| seen.push(m)).unwrap();
        assert_eq!(
            seen,
            vec![
                Mutation::CreateObject {
                    path: "cfg".into(),
                    level: Level::Restricted
                },
                Mutation::AddObjectInfo {
                    name: "cfg".into(),
                    info: ObjectInfo::new(ShardId::LOCAL, Level::Restricted),
                },
                Mutation::DeleteObject { path: "cfg".into() },
                Mutation::DeleteObjectInfo { name: "cfg".into() },
            ]
        );
        log.stop().await.unwrap();
    }
}
