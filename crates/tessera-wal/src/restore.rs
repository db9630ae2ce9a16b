use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tessera_store::{Store, StoreError, StoreResult};
use tessera_types::{Level, ObjectInfo, SetOptions, SetToObjectOptions, User, Value};
use tracing::{debug, info, warn};

use crate::error::{WalError, WalResult};
use crate::event::{Event, Mutation};
use crate::segment;

/// Replay target for the transaction log.
///
/// Each method applies one committed mutation. Implementations must accept
/// records in log order and must not log them again.
pub trait Restorer {
    fn restore_set(&self, key: &str, value: &Value) -> StoreResult<()>;
    fn restore_delete(&self, key: &str) -> StoreResult<()>;
    fn restore_set_to_object(&self, path: &str, key: &str, data: &str, read_only: bool)
        -> StoreResult<()>;
    fn restore_delete_attr(&self, path: &str, key: &str) -> StoreResult<()>;
    fn restore_create_object(&self, path: &str, level: Level) -> StoreResult<()>;
    fn restore_attach(&self, dst: &str, src: &str) -> StoreResult<()>;
    fn restore_delete_object(&self, path: &str) -> StoreResult<()>;
    fn restore_user(&self, user: &User) -> StoreResult<()>;
    fn restore_delete_user(&self, login: &str) -> StoreResult<()>;
    fn restore_add_object_info(&self, name: &str, info: ObjectInfo) -> StoreResult<()>;
    fn restore_delete_object_info(&self, name: &str) -> StoreResult<()>;
}

impl Restorer for Store {
    fn restore_set(&self, key: &str, value: &Value) -> StoreResult<()> {
        let opts = SetOptions {
            read_only: value.read_only,
            level: value.level,
            ..SetOptions::default()
        };
        self.set(key, &value.data, &opts)
    }

    fn restore_delete(&self, key: &str) -> StoreResult<()> {
        self.delete(key)
    }

    fn restore_set_to_object(
        &self,
        path: &str,
        key: &str,
        data: &str,
        read_only: bool,
    ) -> StoreResult<()> {
        let opts = SetToObjectOptions {
            read_only,
            ..SetToObjectOptions::default()
        };
        self.set_to_object(path, key, data, &opts)
    }

    fn restore_delete_attr(&self, path: &str, key: &str) -> StoreResult<()> {
        self.delete_attr(path, key)
    }

    fn restore_create_object(&self, path: &str, level: Level) -> StoreResult<()> {
        self.create_object(path, level)
    }

    fn restore_attach(&self, dst: &str, src: &str) -> StoreResult<()> {
        self.attach_to_object(dst, src)
    }

    fn restore_delete_object(&self, path: &str) -> StoreResult<()> {
        self.delete_object(path)
    }

    fn restore_user(&self, user: &User) -> StoreResult<()> {
        self.put_user(user.clone());
        Ok(())
    }

    fn restore_delete_user(&self, login: &str) -> StoreResult<()> {
        self.delete_user(login).map(|_| ())
    }

    fn restore_add_object_info(&self, name: &str, info: ObjectInfo) -> StoreResult<()> {
        self.add_object_info(name, info);
        Ok(())
    }

    fn restore_delete_object_info(&self, name: &str) -> StoreResult<()> {
        if self.delete_object_info(name) {
            Ok(())
        } else {
            Err(StoreError::ObjectNotFound(name.to_string()))
        }
    }
}

/// Apply one mutation to a restorer.
pub fn apply<R: Restorer + ?Sized>(restorer: &R, mutation: &Mutation) -> StoreResult<()> {
    match mutation {
        Mutation::Set { key, value } => restorer.restore_set(key, value),
        Mutation::Delete { key } => restorer.restore_delete(key),
        Mutation::SetToObject {
            path,
            key,
            data,
            read_only,
        } => restorer.restore_set_to_object(path, key, data, *read_only),
        Mutation::DeleteAttr { path, key } => restorer.restore_delete_attr(path, key),
        Mutation::CreateObject { path, level } => restorer.restore_create_object(path, *level),
        Mutation::Attach { dst, src } => restorer.restore_attach(dst, src),
        Mutation::DeleteObject { path } => restorer.restore_delete_object(path),
        Mutation::CreateUser(user) => restorer.restore_user(user),
        Mutation::DeleteUser { login } => restorer.restore_delete_user(login),
        Mutation::AddObjectInfo { name, info } => restorer.restore_add_object_info(name, *info),
        Mutation::DeleteObjectInfo { name } => restorer.restore_delete_object_info(name),
    }
}

/// Outcome of a successful replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub segments: usize,
    pub events: u64,
    /// Records the restorer refused; they are logged and skipped.
    pub rejected: u64,
}

/// Read every segment in `dir` in numeric order, yielding decoded mutations.
///
/// Stops at the first undecodable line with [`WalError::Corrupted`].
pub fn read_all<F>(dir: &Path, mut visit: F) -> WalResult<usize>
where
    F: FnMut(u64, Mutation),
{
    let segments = segment::list(dir)?;
    for &number in &segments {
        let path = segment::path(dir, number);
        let reader = BufReader::new(File::open(&path)?);
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let corrupted = |reason: String| WalError::Corrupted {
                segment: number,
                line: index + 1,
                reason,
            };
            let event = Event::decode_line(&line).map_err(corrupted)?;
            let mutation = Mutation::from_event(&event).map_err(corrupted)?;
            visit(number, mutation);
        }
        debug!(segment = number, "segment read");
    }
    Ok(segments.len())
}

/// Replay every segment in `dir` into `restorer`.
///
/// A corrupted line aborts with an error; mutations applied before it stay
/// applied. A record the restorer rejects is logged and skipped, since the
/// log only holds mutations that succeeded when they were first made.
pub fn restore<R: Restorer + ?Sized>(dir: &Path, restorer: &R) -> WalResult<RestoreStats> {
    let mut events = 0;
    let mut rejected = 0;
    let segments = read_all(dir, |segment, mutation| {
        events += 1;
        if let Err(e) = apply(restorer, &mutation) {
            rejected += 1;
            warn!(segment, kind = %mutation.kind(), error = %e, "replayed record rejected");
        }
    })?;
    let stats = RestoreStats {
        segments,
        events,
        rejected,
    };
    info!(
        segments = stats.segments,
        events = stats.events,
        rejected = stats.rejected,
        "transaction log restored"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_segment(dir: &Path, number: u64, mutations: &[Mutation]) {
        let body: String = mutations.iter().map(|m| m.to_event().encode_line()).collect();
        fs::write(segment::path(dir, number), body).unwrap();
    }

    fn set(key: &str, data: &str) -> Mutation {
        Mutation::Set {
            key: key.into(),
            value: Value::new(data),
        }
    }

    #[test]
    fn replay_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            1,
            &[set("a", "1"), set("a", "2"), Mutation::Delete { key: "a".into() }],
        );
        let store = Store::new();
        let stats = restore(dir.path(), &store).unwrap();
        assert_eq!(stats.events, 3);
        assert!(matches!(store.get("a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn segments_replay_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 10, &[set("a", "3")]);
        write_segment(dir.path(), 2, &[set("a", "2")]);
        write_segment(dir.path(), 1, &[set("a", "1")]);
        let store = Store::new();
        let stats = restore(dir.path(), &store).unwrap();
        assert_eq!(stats.segments, 3);
        assert_eq!(store.get("a").unwrap().data, "3");
    }

    #[test]
    fn corrupted_line_aborts_but_keeps_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = set("a", "1").to_event().encode_line();
        body.push_str("1 YQ==\n");
        body.push_str(&set("b", "2").to_event().encode_line());
        fs::write(segment::path(dir.path(), 1), body).unwrap();

        let store = Store::new();
        let err = restore(dir.path(), &store).unwrap_err();
        assert!(matches!(err, WalError::Corrupted { segment: 1, line: 2, .. }));
        assert_eq!(store.get("a").unwrap().data, "1");
        assert!(store.get("b").is_err());
    }

    #[test]
    fn object_and_user_records_replay() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("alice", "pw", Level::Restricted);
        write_segment(
            dir.path(),
            1,
            &[
                Mutation::CreateObject { path: "x".into(), level: Level::Default },
                Mutation::CreateObject { path: "y".into(), level: Level::Secret },
                Mutation::Attach { dst: "x".into(), src: "y".into() },
                Mutation::SetToObject {
                    path: "y".into(),
                    key: "k".into(),
                    data: "v".into(),
                    read_only: false,
                },
                Mutation::SetToObject {
                    path: "x".into(),
                    key: "gone".into(),
                    data: "v".into(),
                    read_only: false,
                },
                Mutation::DeleteAttr { path: "x".into(), key: "gone".into() },
                Mutation::AddObjectInfo {
                    name: "x".into(),
                    info: ObjectInfo::new(tessera_types::ShardId::LOCAL, Level::Default),
                },
                Mutation::CreateUser(user),
                Mutation::CreateUser(User::new("bob", "pw", Level::Default)),
                Mutation::DeleteUser { login: "bob".into() },
            ],
        );

        let store = Store::new();
        let stats = restore(dir.path(), &store).unwrap();
        assert_eq!(stats.rejected, 0);
        assert_eq!(store.get_from_object("x.y", "k").unwrap(), "v");
        assert!(store.get_from_object("x", "gone").is_err());
        assert_eq!(store.object_level("y").unwrap(), Level::Secret);
        assert!(store.object_info("x").is_ok());
        assert!(store.user_by_name("alice").unwrap().verify_password("pw"));
        assert!(store.user_by_name("bob").is_err());
    }

    #[test]
    fn rejected_records_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(
            dir.path(),
            1,
            &[Mutation::Delete { key: "never".into() }, set("a", "1")],
        );
        let store = Store::new();
        let stats = restore(dir.path(), &store).unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(store.get("a").unwrap().data, "1");
    }

    #[test]
    fn empty_directory_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stats = restore(dir.path(), &Store::new()).unwrap();
        assert_eq!(stats, RestoreStats::default());
    }
}
