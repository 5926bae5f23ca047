use nimbus::users::UserStore;

#[tokio::test]
async fn register_and_authenticate() {
    let users = UserStore::new();
    assert!(users.register("alice", "hunter2").await);
    assert!(users.exists("alice").await);
    assert!(users.authenticate("alice", "hunter2").await);
    assert!(users.created_at("alice").await.is_some());
}

#[tokio::test]
async fn duplicate_username_rejected() {
    let users = UserStore::new();
    assert!(users.register("alice", "first").await);
    assert!(!users.register("alice", "second").await);
    assert_eq!(users.count().await, 1);

    // Original password still the valid one
    assert!(users.authenticate("alice", "first").await);
    assert!(!users.authenticate("alice", "second").await);
}

#[tokio::test]
async fn wrong_password_rejected() {
    let users = UserStore::new();
    users.register("bob", "correct").await;
    assert!(!users.authenticate("bob", "incorrect").await);
    assert!(!users.authenticate("bob", "").await);
}

#[tokio::test]
async fn unknown_user_rejected() {
    let users = UserStore::new();
    assert!(!users.authenticate("ghost", "whatever").await);
    assert!(!users.exists("ghost").await);
}

#[tokio::test]
async fn blank_credentials_rejected() {
    let users = UserStore::new();
    assert!(!users.register("", "password").await);
    assert!(!users.register("   ", "password").await);
    assert!(!users.register("alice", "").await);
    assert_eq!(users.count().await, 0);
}

#[tokio::test]
async fn delete_removes_user() {
    let users = UserStore::new();
    users.register("carol", "pw").await;
    assert!(users.delete("carol").await);
    assert!(!users.exists("carol").await);
    assert!(!users.authenticate("carol", "pw").await);

    // Deleting again reports false
    assert!(!users.delete("carol").await);
}

#[tokio::test]
async fn same_password_hashes_differently_per_user() {
    // Distinct salts mean one user's hash leaks nothing about another's
    let users = UserStore::new();
    users.register("alice", "shared").await;
    users.register("bob", "shared").await;

    assert!(users.authenticate("alice", "shared").await);
    assert!(users.authenticate("bob", "shared").await);
    assert!(!users.authenticate("alice", "sharedx").await);
}
