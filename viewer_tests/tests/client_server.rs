//! Full socket-based integration tests for viewer ↔ backend communication.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use viewer_client::client::{ConnState, ViewerClient};
use viewer_client::motion::InstantAnimator;
use viewer_client::render::NullRenderAdapter;
use viewer_server::server::{bind_ephemeral, parse_console_line};
use viewer_shared::config::SessionConfig;
use viewer_shared::grid::TilePos;
use viewer_shared::net::{cmd, Envelope, ViewerListener};

fn session_config(server_addr: &str) -> SessionConfig {
    SessionConfig::from_json_str(&format!(
        r#"{{
            "server_addr": "{server_addr}",
            "sec_per_step": 60,
            "start_date": "February 13, 2023",
            "start_time": "23:59:00",
            "roster": [
                {{"name": "Maria Lopez", "spawn": {{"x": 3, "y": 4}}}},
                {{"name": "Atlas", "spawn": {{"x": 75, "y": 31}}, "player": true}}
            ]
        }}"#
    ))
    .expect("test config parses")
}

async fn connect_client(server_addr: &str) -> anyhow::Result<ViewerClient> {
    let cfg = session_config(server_addr);
    ViewerClient::connect(
        &cfg,
        None,
        Arc::new(InstantAnimator),
        Box::new(NullRenderAdapter),
    )
    .await
}

/// Unit-style test: console shorthands produce protocol envelopes.
#[test]
fn console_shorthands_cover_the_command_table() {
    for line in [
        "tick 5",
        "snapshot",
        "navigate Maria Lopez, down, 2",
        "emoji Maria Lopez, 🎉",
        "chat Maria Lopez, good morning",
        "town",
        "npcs",
        "npc Maria Lopez",
        "player",
        "restart",
    ] {
        assert!(parse_console_line(line).is_ok(), "shorthand failed: {line}");
    }
}

/// Full integration: backend drives a walk and a tick; the viewer's
/// registry and clock follow.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn viewer_follows_backend_commands() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let (mut backend, addr) = bind_ephemeral(vec!["Maria Lopez".to_string()]).await?;

    let backend_task = tokio::spawn(async move {
        // Accept the viewer and finish the handshake.
        while backend.peer_count() == 0 {
            backend.try_accept(Duration::from_millis(50)).await?;
        }
        while backend.ready_count() == 0 {
            backend.poll_peers(Duration::from_millis(10)).await?;
        }

        // Drive: one walk order, then a five-step tick.
        let walk = parse_console_line("navigate Maria Lopez, down, 2").expect("shorthand");
        backend.broadcast(&walk).await?;
        let tick = parse_console_line("tick 5").expect("shorthand");
        backend.broadcast(&tick).await?;

        // Drain the ui.tick reply.
        for _ in 0..20 {
            backend.poll_peers(Duration::from_millis(10)).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut client = connect_client(&addr.to_string()).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        client.poll(Duration::from_millis(20)).await?;

        let walked = client
            .dispatcher()
            .registry()
            .get("Maria Lopez")
            .map(|e| e.position == TilePos::new(3, 5))
            .unwrap_or(false);
        if walked && client.dispatcher().clock().step() == 5 {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "viewer never converged: step={} pos={:?}",
                client.dispatcher().clock().step(),
                client
                    .dispatcher()
                    .registry()
                    .get("Maria Lopez")
                    .map(|e| e.position)
            );
        }
    }

    assert_eq!(client.state, ConnState::Ready);
    // 23:59 + 5 minutes rolled past midnight.
    let readout = client.dispatcher().clock().readout()?;
    assert_eq!(readout.time, "00:04:00");
    assert_eq!(readout.date, "February 14, 2023");

    backend_task.await??;
    Ok(())
}

/// A zero-step tick is answered with a full snapshot and advances nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_request_round_trips() -> anyhow::Result<()> {
    let listener = ViewerListener::bind("127.0.0.1:0".parse()?).await?;
    let addr = listener.local_addr()?;

    let server_task = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await?;

        let hello = conn.recv().await?;
        assert_eq!(hello.command, cmd::VIEWER_HELLO);
        conn.send(&Envelope::bare(cmd::SERVER_WELCOME)).await?;

        conn.send(&Envelope::new(cmd::SERVER_TICK, json!({"steps": 0})))
            .await?;

        loop {
            let env = conn.recv().await?;
            if env.command == "server.tick.response" {
                return Ok::<_, anyhow::Error>(env);
            }
        }
    });

    let mut client = connect_client(&addr.to_string()).await?;
    while !server_task.is_finished() {
        client.poll(Duration::from_millis(10)).await?;
    }

    let snapshot = server_task.await??;
    assert_eq!(snapshot.data["clock"]["step"], 0);
    assert_eq!(snapshot.data["positions"]["Maria Lopez"]["x"], 3);
    assert_eq!(snapshot.data["positions"]["Maria Lopez"]["y"], 4);
    assert_eq!(client.dispatcher().clock().step(), 0);
    Ok(())
}

/// `server.restart` sends the connection back through the handshake, after
/// which commands flow again.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_re_runs_the_handshake() -> anyhow::Result<()> {
    let listener = ViewerListener::bind("127.0.0.1:0".parse()?).await?;
    let addr = listener.local_addr()?;

    let server_task = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await?;

        let hello = conn.recv().await?;
        assert_eq!(hello.command, cmd::VIEWER_HELLO);
        conn.send(&Envelope::bare(cmd::SERVER_WELCOME)).await?;

        conn.send(&Envelope::bare(cmd::SERVER_RESTART)).await?;

        // The viewer must say hello again.
        let hello = conn.recv().await?;
        assert_eq!(hello.command, cmd::VIEWER_HELLO);
        conn.send(&Envelope::bare(cmd::SERVER_WELCOME)).await?;

        conn.send(&Envelope::new(cmd::SERVER_TICK, json!({"steps": 3})))
            .await?;

        loop {
            let env = conn.recv().await?;
            if env.command == cmd::UI_TICK {
                return Ok::<_, anyhow::Error>(env);
            }
        }
    });

    let mut client = connect_client(&addr.to_string()).await?;
    while !server_task.is_finished() {
        client.poll(Duration::from_millis(10)).await?;
    }

    let ui_tick = server_task.await??;
    assert_eq!(ui_tick.data["clock"]["step"], 3);
    assert_eq!(client.dispatcher().clock().step(), 3);
    assert_eq!(client.state, ConnState::Ready);
    Ok(())
}

/// Commands arriving before the handshake completes are rejected and the
/// connection still becomes usable.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_commands_are_rejected_not_fatal() -> anyhow::Result<()> {
    let listener = ViewerListener::bind("127.0.0.1:0".parse()?).await?;
    let addr = listener.local_addr()?;

    let server_task = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await?;

        let hello = conn.recv().await?;
        assert_eq!(hello.command, cmd::VIEWER_HELLO);

        // Command before the welcome: must be dropped.
        conn.send(&Envelope::new(cmd::SERVER_TICK, json!({"steps": 7})))
            .await?;
        conn.send(&Envelope::bare(cmd::SERVER_WELCOME)).await?;

        conn.send(&Envelope::new(cmd::SERVER_TICK, json!({"steps": 2})))
            .await?;

        loop {
            let env = conn.recv().await?;
            if env.command == cmd::UI_TICK {
                return Ok::<_, anyhow::Error>(env);
            }
        }
    });

    let mut client = connect_client(&addr.to_string()).await?;
    while !server_task.is_finished() {
        client.poll(Duration::from_millis(10)).await?;
    }

    server_task.await??;
    // Only the post-welcome tick applied.
    assert_eq!(client.dispatcher().clock().step(), 2);
    Ok(())
}
