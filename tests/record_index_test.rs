//! Tests of a single record index, outside of any undo session.

use chainstate_rs::{
    record_index::{RecordIndex, RecordIndexError},
    types::data_types::RecordId,
    versioned_store::VersionedStore,
};

mod common;

use common::records::{balance_key, name_key, Account, BY_BALANCE, BY_NAME};

fn names<'a>(accounts: impl Iterator<Item = &'a Account>) -> Vec<String> {
    accounts.map(|account| account.name.clone()).collect()
}

/// Tests that inserted records get consecutive identities and can be found both by identity and by
/// each secondary ordering.
#[test]
fn insert_and_find_test() {
    let mut index = RecordIndex::<Account>::new();

    let alice = index.insert(Account::new("alice", 10)).unwrap();
    let bob = index.insert(Account::new("bob", 20)).unwrap();
    let carol = index.insert(Account::new("carol", 10)).unwrap();
    assert_eq!(alice, RecordId::new(0));
    assert_eq!(bob, RecordId::new(1));
    assert_eq!(carol, RecordId::new(2));
    assert_eq!(index.len(), 3);

    assert_eq!(index.find(bob).unwrap().name, "bob");
    assert!(index.find(RecordId::new(3)).is_none());
    assert_eq!(
        index.find_by(BY_NAME, &name_key("carol")).unwrap().unwrap().id,
        carol
    );
    assert!(index.find_by(BY_NAME, &name_key("dave")).unwrap().is_none());

    let tens = index.find_all_by(BY_BALANCE, &balance_key(10)).unwrap();
    assert_eq!(names(tens.into_iter()), vec!["alice", "carol"]);

    assert_eq!(
        names(index.iter_by(BY_BALANCE).unwrap()),
        vec!["alice", "carol", "bob"]
    );
    assert_eq!(
        names(index.range_by(BY_BALANCE, &balance_key(15), &balance_key(25)).unwrap()),
        vec!["bob"]
    );
    assert_eq!(
        index
            .range_by(BY_BALANCE, &balance_key(25), &balance_key(15))
            .unwrap()
            .count(),
        0
    );

    assert!(matches!(
        index.find_by("by_colour", &name_key("red")),
        Err(RecordIndexError::UnknownSecondaryIndex { .. })
    ));
}

/// Tests that a mutation that would violate a unique ordering fails and leaves every ordering as it
/// was.
#[test]
fn constraint_violation_test() {
    let mut index = RecordIndex::<Account>::new();
    let alice = index.insert(Account::new("alice", 10)).unwrap();
    let bob = index.insert(Account::new("bob", 20)).unwrap();

    match index.insert(Account::new("alice", 30)) {
        Err(RecordIndexError::ConstraintViolation {
            index: violated,
            existing,
            ..
        }) => {
            assert_eq!(violated, BY_NAME);
            assert_eq!(existing, alice);
        }
        other => panic!("expected a constraint violation, got {:?}", other),
    }
    assert_eq!(index.len(), 2);
    assert!(index.find_all_by(BY_BALANCE, &balance_key(30)).unwrap().is_empty());

    let result = index.modify(bob, |account| {
        account.name = "alice".to_string();
        account.balance = 99;
    });
    assert!(matches!(
        result,
        Err(RecordIndexError::ConstraintViolation { .. })
    ));
    let bob_record = index.get(bob).unwrap();
    assert_eq!(bob_record.name, "bob");
    assert_eq!(bob_record.balance, 20);
    assert_eq!(
        index.find_by(BY_NAME, &name_key("bob")).unwrap().unwrap().id,
        bob
    );
    assert!(index.find_all_by(BY_BALANCE, &balance_key(99)).unwrap().is_empty());

    // Re-assigning a record's own unique key to itself is not a violation.
    index
        .modify(alice, |account| account.balance = 11)
        .unwrap();
    assert_eq!(
        names(index.find_all_by(BY_BALANCE, &balance_key(11)).unwrap().into_iter()),
        vec!["alice"]
    );
}

/// Tests the errors of `modify` and `remove` on identities that do not exist or would change.
#[test]
fn modify_and_remove_errors_test() {
    let mut index = RecordIndex::<Account>::new();
    let alice = index.insert(Account::new("alice", 10)).unwrap();

    assert!(matches!(
        index.modify(RecordId::new(7), |account| account.balance = 1),
        Err(RecordIndexError::KeyNotFound { .. })
    ));
    assert!(matches!(
        index.remove(RecordId::new(7)),
        Err(RecordIndexError::KeyNotFound { .. })
    ));
    assert!(matches!(
        index.modify(alice, |account| account.id = RecordId::new(5)),
        Err(RecordIndexError::IdentityChanged { .. })
    ));
    assert_eq!(index.get(alice).unwrap().id, alice);
}

/// Tests that removing a record and creating a similar one never re-issues the removed identity.
#[test]
fn id_monotonicity_test() {
    let mut index = RecordIndex::<Account>::new();
    let first = index.insert(Account::new("alice", 10)).unwrap();
    let removed = index.remove(first).unwrap();
    assert_eq!(removed.name, "alice");
    assert!(index.find_by(BY_NAME, &name_key("alice")).unwrap().is_none());

    let second = index.insert(Account::new("alice", 10)).unwrap();
    assert!(second > first);
    assert_eq!(index.next_id(), RecordId::new(2));
    assert_eq!(
        index.find_by(BY_NAME, &name_key("alice")).unwrap().unwrap().id,
        second
    );
}

/// Tests that identities issued inside a reverted undo session are not issued again.
#[test]
fn id_monotonicity_across_undo_test() {
    let mut store = VersionedStore::new();
    store.add_index::<Account>().unwrap();

    // 1. Create a record inside a session, then revert the session.
    let mut session = store.start_session();
    let first = session.insert(Account::new("alice", 10)).unwrap();
    session.undo().unwrap();
    assert!(store.index::<Account>().unwrap().find(first).is_none());

    // 2. The next record gets a fresh identity.
    let second = store.insert(Account::new("bob", 20)).unwrap();
    assert!(second > first);

    // 3. The same holds for a session dropped without being closed, and for nested sessions.
    let third = {
        let mut outer = store.start_session();
        let mut inner = outer.start_session();
        let third = inner.insert(Account::new("carol", 30)).unwrap();
        inner.squash().unwrap();
        third
    };
    let fourth = store.insert(Account::new("carol", 30)).unwrap();
    assert!(third > second);
    assert!(fourth > third);
    assert_eq!(store.index::<Account>().unwrap().next_id(), RecordId::new(4));
}
