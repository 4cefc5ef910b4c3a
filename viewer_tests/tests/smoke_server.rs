use std::time::Duration;

use viewer_server::server::bind_ephemeral;

/// Smoke test: backend can run demo beats with no viewers attached.
#[tokio::test]
async fn backend_runs_without_peers() -> anyhow::Result<()> {
    let (mut backend, _addr) = bind_ephemeral(vec!["Maria Lopez".to_string()]).await?;
    for _ in 0..3 {
        backend.try_accept(Duration::from_millis(1)).await?;
        backend.poll_peers(Duration::from_millis(1)).await?;
        backend.demo_step().await?;
    }
    assert_eq!(backend.ticks_sent(), 3);
    assert_eq!(backend.peer_count(), 0);
    Ok(())
}
