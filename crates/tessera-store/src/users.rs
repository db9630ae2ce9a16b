use std::collections::BTreeMap;

use tessera_types::User;

use crate::error::{StoreError, StoreResult};

/// User records keyed by id, with a change counter for incremental sync.
#[derive(Debug, Default)]
pub struct UserTable {
    by_id: BTreeMap<u64, User>,
    next_id: u64,
    change_seq: u64,
}

impl UserTable {
    pub fn new() -> Self {
        Self {
            by_id: BTreeMap::new(),
            next_id: 1,
            change_seq: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.change_seq += 1;
        self.change_seq
    }

    fn id_by_login(&self, login: &str) -> Option<u64> {
        self.by_id
            .values()
            .find(|u| u.login == login)
            .map(|u| u.id)
    }

    /// Register a new user. An inactive record with the same login is reused.
    pub fn create(&mut self, mut user: User) -> StoreResult<u64> {
        let id = match self.id_by_login(&user.login) {
            Some(id) if self.by_id[&id].active => {
                return Err(StoreError::UserExists(user.login))
            }
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        user.id = id;
        user.active = true;
        user.change_seq = self.bump();
        self.by_id.insert(id, user);
        Ok(id)
    }

    /// Insert or replace the record for `user.login` as-is, keeping a known id.
    ///
    /// Used by log replay and peer sync, where the record is authoritative.
    pub fn upsert(&mut self, mut user: User) -> u64 {
        let id = match self.id_by_login(&user.login) {
            Some(id) => id,
            None => {
                let id = self.next_id.max(user.id);
                self.next_id = id + 1;
                id
            }
        };
        user.id = id;
        user.change_seq = self.bump();
        self.by_id.insert(id, user);
        id
    }

    pub fn by_id(&self, id: u64) -> StoreResult<User> {
        self.by_id
            .get(&id)
            .filter(|u| u.active)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(format!("#{id}")))
    }

    pub fn by_name(&self, login: &str) -> StoreResult<User> {
        self.by_id
            .values()
            .find(|u| u.login == login && u.active)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(login.to_string()))
    }

    /// Soft delete: the record stays but becomes inactive.
    pub fn delete(&mut self, login: &str) -> StoreResult<User> {
        let id = self.by_name(login)?.id;
        let seq = self.bump();
        let user = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| StoreError::UserNotFound(login.to_string()))?;
        user.active = false;
        user.change_seq = seq;
        Ok(user.clone())
    }

    /// Replace an existing active user, matched by id.
    pub fn save(&mut self, mut user: User) -> StoreResult<()> {
        match self.by_id.get(&user.id) {
            Some(existing) if existing.active => {}
            _ => return Err(StoreError::UserNotFound(user.login)),
        }
        user.change_seq = self.bump();
        self.by_id.insert(user.id, user);
        Ok(())
    }

    pub fn change_seq(&self) -> u64 {
        self.change_seq
    }

    pub fn active(&self) -> Vec<User> {
        self.by_id.values().filter(|u| u.active).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.values().all(|u| !u.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::Level;

    #[test]
    fn create_assigns_ids_and_rejects_duplicates() {
        let mut table = UserTable::new();
        let a = table.create(User::new("alice", "pw", Level::Default)).unwrap();
        let b = table.create(User::new("bob", "pw", Level::Secret)).unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            table.create(User::new("alice", "other", Level::Default)),
            Err(StoreError::UserExists(_))
        ));
    }

    #[test]
    fn delete_is_soft_and_login_can_be_reused() {
        let mut table = UserTable::new();
        let id = table.create(User::new("alice", "pw", Level::Default)).unwrap();
        table.delete("alice").unwrap();
        assert!(table.by_name("alice").is_err());
        assert!(table.by_id(id).is_err());

        let again = table.create(User::new("alice", "pw2", Level::Restricted)).unwrap();
        assert_eq!(again, id);
        assert_eq!(table.by_name("alice").unwrap().level, Level::Restricted);
    }

    #[test]
    fn change_seq_advances_on_every_mutation() {
        let mut table = UserTable::new();
        assert_eq!(table.change_seq(), 0);
        table.create(User::new("alice", "pw", Level::Default)).unwrap();
        let mut user = table.by_name("alice").unwrap();
        assert_eq!(user.change_seq, 1);

        user.level = Level::Secret;
        table.save(user).unwrap();
        assert_eq!(table.change_seq(), 2);
        assert_eq!(table.by_name("alice").unwrap().change_seq, 2);

        table.delete("alice").unwrap();
        assert_eq!(table.change_seq(), 3);
    }

    #[test]
    fn save_requires_active_user() {
        let mut table = UserTable::new();
        let mut ghost = User::new("ghost", "pw", Level::Default);
        ghost.id = 42;
        assert!(table.save(ghost).is_err());
    }

    #[test]
    fn upsert_keeps_id_for_known_login() {
        let mut table = UserTable::new();
        let id = table.create(User::new("alice", "pw", Level::Default)).unwrap();
        let mut replayed = User::new("alice", "pw", Level::Secret);
        replayed.active = false;
        assert_eq!(table.upsert(replayed), id);
        assert!(table.by_name("alice").is_err());
        assert!(table.is_empty());
    }
}
