//! Integration tests for the dispatch and pacing pipeline, driven over the
//! wire: addressed commands, nested expansion, CTCP, and pagination.

mod common;

use common::{accept, listen, Bot, ServerConn};

async fn connect(extra_config: &str) -> (Bot, ServerConn) {
    let (listener, port) = listen().await.unwrap();
    let bot = Bot::spawn(port, extra_config).unwrap();
    let mut conn = accept(&listener).await.unwrap();
    conn.handshake().await.unwrap();
    (bot, conn)
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (_bot, mut conn) = connect("").await;

    conn.send(":alice!a@h PRIVMSG #chan :)echo hello there")
        .await
        .unwrap();
    let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(reply, "PRIVMSG #chan :hello there");
}

#[tokio::test]
async fn test_unaddressed_text_is_ignored() {
    let (_bot, mut conn) = connect("").await;

    conn.send(":alice!a@h PRIVMSG #chan :echo no sigil here")
        .await
        .unwrap();
    // Nothing should come back; confirm liveness with a PING afterwards
    conn.send("PING :still-there").await.unwrap();
    let line = conn
        .expect(|l| l.starts_with("PONG") || l.starts_with("PRIVMSG"))
        .await
        .unwrap();
    assert_eq!(line, "PONG still-there");
}

#[tokio::test]
async fn test_nested_expansion_over_the_wire() {
    let (_bot, mut conn) = connect("").await;

    conn.send(":alice!a@h PRIVMSG #chan :))echo {1,2,3}")
        .await
        .unwrap();
    for expected in ["PRIVMSG #chan :1", "PRIVMSG #chan :2", "PRIVMSG #chan :3"] {
        let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
        assert_eq!(reply, expected);
    }
}

#[tokio::test]
async fn test_nested_scan_error_is_reported() {
    let (_bot, mut conn) = connect("").await;

    conn.send(":alice!a@h PRIVMSG #chan :))broken {")
        .await
        .unwrap();
    let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(reply, "PRIVMSG #chan :Error: missing 1 closing brace(s)");
}

#[tokio::test]
async fn test_ctcp_version_reply() {
    let (_bot, mut conn) = connect("").await;

    conn.send(":alice!a@h PRIVMSG bot :\u{1}VERSION\u{1}")
        .await
        .unwrap();
    let reply = conn.expect(|l| l.starts_with("NOTICE")).await.unwrap();
    assert!(
        reply.starts_with("NOTICE alice :\u{1}VERSION slircb"),
        "{reply}"
    );
}

#[tokio::test]
async fn test_pagination_and_more_retrieval() {
    // chunk_size 150 with an unknown own host leaves a 60 byte payload
    // budget (50 once the pagination suffix is reserved)
    let config = r#"
[spool]
chunk_size = 150
instant_threshold = 2
more_threshold = 10
"#;
    let (_bot, mut conn) = connect(config).await;

    let long = "a".repeat(300);
    conn.send(&format!(":alice!a@h PRIVMSG #chan :)echo {long}"))
        .await
        .unwrap();

    // Two instant chunks: a full one, then a reduced one annotated with
    // the withheld count
    let first = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(first, format!("PRIVMSG #chan :{}", "a".repeat(60)));
    let second = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(
        second,
        format!("PRIVMSG #chan :{} \u{2}(4 more)", "a".repeat(50))
    );

    // Page the rest out, oldest first
    for expected in [
        format!("PRIVMSG #chan :{} \u{2}(3 more)", "a".repeat(50)),
        format!("PRIVMSG #chan :{} \u{2}(2 more)", "a".repeat(50)),
        format!("PRIVMSG #chan :{} \u{2}(1 more)", "a".repeat(50)),
        format!("PRIVMSG #chan :{}", "a".repeat(40)),
    ] {
        conn.send(":alice!a@h PRIVMSG #chan :)more").await.unwrap();
        let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
        assert_eq!(reply, expected);
    }

    conn.send(":alice!a@h PRIVMSG #chan :)more").await.unwrap();
    let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(reply, "PRIVMSG #chan :No more messages.");
}

#[tokio::test]
async fn test_pagination_is_per_requester() {
    let config = r#"
[spool]
chunk_size = 150
instant_threshold = 2
more_threshold = 10
"#;
    let (_bot, mut conn) = connect(config).await;

    let long = "b".repeat(150);
    conn.send(&format!(":alice!a@h PRIVMSG #chan :)echo {long}"))
        .await
        .unwrap();
    conn.expect(|l| l.contains("more)")).await.unwrap();

    // Someone else cannot page out alice's chunks
    conn.send(":mallory!m@h PRIVMSG #chan :)more").await.unwrap();
    let reply = conn.expect(|l| l.starts_with("PRIVMSG")).await.unwrap();
    assert_eq!(reply, "PRIVMSG #chan :No more messages.");
}
