//! End-to-end session scenarios: handshake, silent enumeration, forced
//! logout, kick with reconnect.

mod common;

use common::{MockServer, session_for, wait_until};
use std::sync::Arc;
use std::time::Duration;
use ttbot::session::SessionState;

#[tokio::test]
async fn handshake_logs_in_and_mirrors_own_user() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |cfg| {
        cfg.nickname = "bot".into();
    });
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.send("teamtalk servername=\"x\" maxusers=50 protocol=\"5.6\" userid=3 usertimeout=60")
        .await;

    let login = peer.expect_cmd("login").await;
    assert_eq!(login.params.get("nickname"), Some("bot"));
    assert_eq!(login.params.get("clientname"), Some("ttbot"));
    assert_eq!(login.params.int("id"), Some(1));
    assert!(login.params.contains("username"));
    assert!(login.params.contains("password"));

    peer.send("accepted userid=3 userrights=8454143 usertype=1 nickname=\"bot\" username=\"\"")
        .await;
    peer.send("begin id=1").await;
    peer.send("end id=1").await;

    assert!(wait_until(|| session.is_logged_in()).await);
    assert!(wait_until(|| session.state() == SessionState::LoggedIn).await);
    assert_eq!(session.uid(), 3);
    assert!(
        wait_until(|| {
            let model = session.model.read();
            model.user(3).is_some()
        })
        .await
    );
    let user = session.model.read().user(3).cloned().expect("own user");
    assert_eq!(user.nickname, "bot");
    assert_eq!(user.client_name, "ttbot");

    session.shutdown().await;
    let _ = task.await;
}

#[tokio::test]
async fn channel_enumeration_during_login_is_silent() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |cfg| {
        cfg.display_server_events = true;
    });
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.send("teamtalk servername=\"x\" maxusers=50 protocol=\"5.6\" userid=3 usertimeout=60")
        .await;
    let _login = peer.expect_cmd("login").await;
    peer.send("accepted userid=3 userrights=3 usertype=1 nickname=\"bot\" username=\"\"")
        .await;
    peer.send("begin id=1").await;
    peer.send("addchannel chanid=1 parentid=0 name=\"\" protected=0 maxusers=100 type=1")
        .await;
    for i in 2..=10 {
        peer.send(&format!(
            "addchannel chanid={i} parentid=1 name=\"room{i}\" protected=0 maxusers=100 type=0"
        ))
        .await;
    }
    peer.send("end id=1").await;

    assert!(
        wait_until(|| session.model.read().channel_count() == 10).await,
        "channels were not mirrored"
    );
    assert_eq!(session.model.read().path(5), "/room5/");

    // the enumeration produced no per-channel event lines
    let history = session.logbook.history();
    assert!(
        !history.iter().any(|line| line.contains("Channel added.")),
        "enumeration was logged: {history:?}"
    );

    session.shutdown().await;
    let _ = task.await;
}

#[tokio::test]
async fn forced_logout_without_policy_stays_down() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |_| {});
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.handshake("userrights=3 usertype=1").await;
    assert!(wait_until(|| session.is_logged_in()).await);

    peer.send("loggedout").await;
    let _ = task.await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_logged_in());
    assert_eq!(session.model.read().user_count(), 0);
}

#[tokio::test]
async fn kick_with_reconnect_policy_dials_again() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |cfg| {
        cfg.auto_connect_on_kick = true;
    });
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.handshake("userrights=3 usertype=1").await;
    assert!(wait_until(|| session.is_logged_in()).await);

    // kicker id 2 is unknown to the model; the kick must still register
    peer.send("kicked kickerid=2").await;
    assert!(wait_until(|| session.kicked()).await);
    peer.send("loggedout").await;
    drop(peer);

    // the engine must come back on its own
    let mut second = server.accept().await;
    second
        .send("teamtalk servername=\"x\" maxusers=50 protocol=\"5.6\" userid=3 usertimeout=60")
        .await;
    let login = second.expect_cmd("login").await;
    assert_eq!(login.params.int("id"), Some(1));

    session.shutdown().await;
    let _ = task.await;
}

#[tokio::test]
async fn disconnect_without_policy_ends_the_session() {
    let server = MockServer::bind().await;
    let session = session_for(server.addr(), |_| {});
    let task = tokio::spawn(Arc::clone(&session).run());

    let mut peer = server.accept().await;
    peer.handshake("userrights=3 usertype=1").await;
    assert!(wait_until(|| session.is_logged_in()).await);
    drop(peer);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session task should end")
        .expect("join");
    assert_eq!(session.state(), SessionState::Disconnected);
}
