//! Admin table scenarios: account listing, rotation, and diffing.

mod common;

use common::{MockServer, session_for, wait_until};
use std::sync::Arc;

#[tokio::test]
async fn account_listings_rotate_and_diff() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |_| {});
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.handshake("userrights=0 usertype=2").await;
    assert!(wait_until(|| session.is_logged_in()).await);

    // First listing pass: two accounts, no previous snapshot to diff.
    let lister = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.cmd_list_accounts().await }
    });
    let list = peer.expect_cmd("listaccounts").await;
    assert_eq!(list.params.int("id"), Some(2));
    assert_eq!(list.params.int("index"), Some(0));
    peer.send("begin id=2").await;
    peer.send("useraccount username=\"a\" password=\"pa\" usertype=1 userrights=3")
        .await;
    peer.send("useraccount username=\"b\" password=\"pb\" usertype=1 userrights=3")
        .await;
    peer.send("end id=2").await;
    lister
        .await
        .expect("join")
        .expect("first listing succeeds");
    assert!(
        !session
            .logbook
            .history()
            .iter()
            .any(|line| line.contains("User account changes.")),
        "first listing must not produce a diff"
    );

    // Second pass: b changed its password, a is gone, c is new.
    let lister = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.cmd_list_accounts().await }
    });
    peer.expect_cmd("listaccounts").await;
    peer.send("begin id=2").await;
    peer.send("useraccount username=\"b\" password=\"changed\" usertype=1 userrights=3")
        .await;
    peer.send("useraccount username=\"c\" password=\"pc\" usertype=1 userrights=3")
        .await;
    peer.send("end id=2").await;
    lister
        .await
        .expect("join")
        .expect("second listing succeeds");

    let history = session.logbook.history().join("\n");
    assert!(history.contains("User account changes."), "{history}");
    assert!(history.contains("been added:\nc") || history.contains("been added:\r\nc"),
        "added account missing: {history}"
    );
    assert!(
        history.contains("been removed:\na") || history.contains("been removed:\r\na"),
        "removed account missing: {history}"
    );
    assert!(history.contains("Old password: pb"), "{history}");
    assert!(history.contains("New password: changed"), "{history}");

    session.shutdown().await;
    let _ = task.await;
}

#[tokio::test]
async fn ban_listings_report_added_and_lifted_addresses() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |_| {});
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    // BAN_USERS right, not an admin
    peer.handshake("userrights=64 usertype=1").await;
    assert!(wait_until(|| session.is_logged_in()).await);

    let lister = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.cmd_list_bans().await }
    });
    let list = peer.expect_cmd("listbans").await;
    assert_eq!(list.params.int("id"), Some(3));
    peer.send("begin id=3").await;
    peer.send("userbanned ipaddr=\"10.0.0.1\" nickname=\"troll\" username=\"troll\"")
        .await;
    peer.send("end id=3").await;
    lister.await.expect("join").expect("first listing");

    let lister = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.cmd_list_bans().await }
    });
    peer.expect_cmd("listbans").await;
    peer.send("begin id=3").await;
    peer.send("userbanned ipaddr=\"10.0.0.2\" nickname=\"other\" username=\"other\"")
        .await;
    peer.send("end id=3").await;
    lister.await.expect("join").expect("second listing");

    let history = session.logbook.history().join("\n");
    assert!(history.contains("Ban changes."), "{history}");
    assert!(history.contains("10.0.0.2"), "{history}");
    assert!(history.contains("no longer banned"), "{history}");

    session.shutdown().await;
    let _ = task.await;
}

#[tokio::test]
async fn non_admin_cannot_list_accounts() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |_| {});
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.handshake("userrights=3 usertype=1").await;
    assert!(wait_until(|| session.is_logged_in()).await);

    let err = session
        .cmd_list_accounts()
        .await
        .expect_err("must be rejected locally");
    assert!(err.to_string().contains("Insufficient permission"));

    session.shutdown().await;
    let _ = task.await;
}
