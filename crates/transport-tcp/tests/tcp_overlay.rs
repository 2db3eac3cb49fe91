use std::sync::Arc;
use std::time::Duration;

use shoot_core::{Client, Identity, MessageKind, Overlay, PeerHandle, ShootConfig};
use storage::LocalStorage;
use tempfile::TempDir;
use transport_tcp::TcpOverlay;

type TcpClient = Client<TcpOverlay, LocalStorage>;

async fn start(name: &str, output: &std::path::Path) -> anyhow::Result<(Arc<TcpOverlay>, Arc<TcpClient>)> {
    let (overlay, events) = TcpOverlay::bind(Identity::generate(), "127.0.0.1:0".parse()?).await?;
    let cfg = ShootConfig::default()
        .with_instance_id(name)
        .with_output_dir(Some(output.to_path_buf()));
    let client = Arc::new(Client::new(overlay.clone(), LocalStorage::new(), cfg));

    let runner = client.clone();
    tokio::spawn(async move { runner.run(events).await });
    Ok((overlay, client))
}

#[tokio::test]
async fn test_greeting_and_transfer_over_tcp() -> anyhow::Result<()> {
    let dir_a = TempDir::new()?;
    let dir_b = TempDir::new()?;
    let (overlay_a, client_a) = start("alice@tcp", dir_a.path()).await?;
    let (overlay_b, client_b) = start("bob@tcp", dir_b.path()).await?;

    let mid_b = overlay_a.connect(overlay_b.local_addr()).await?;
    assert_eq!(mid_b, overlay_b.local_peer());
    let mid_a = overlay_a.local_peer();

    tokio::time::timeout(Duration::from_secs(5), async {
        client_a.registry().observe().wait_for(|s| s.contains(&mid_b)).await;
        client_b.registry().observe().wait_for(|s| s.contains(&mid_a)).await;
    })
    .await?;
    assert_eq!(client_a.registry().resolve(&mid_b).unwrap().display_name, "bob@tcp");
    assert_eq!(client_b.registry().resolve(&mid_a).unwrap().display_name, "alice@tcp");

    let body = vec![42u8; 100_000];
    let file = dir_a.path().join("blob.bin");
    std::fs::write(&file, &body)?;
    client_a.send_file_to(&mid_b, &file).await?;

    let target = dir_b.path().join("blob.bin");
    tokio::time::timeout(Duration::from_secs(5), async {
        while std::fs::read(&target).map(|b| b != body).unwrap_or(true) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_simultaneous_dials_still_greet_both_ways() -> anyhow::Result<()> {
    let dir_a = TempDir::new()?;
    let dir_b = TempDir::new()?;
    let (overlay_a, client_a) = start("alice@tcp", dir_a.path()).await?;
    let (overlay_b, client_b) = start("bob@tcp", dir_b.path()).await?;
    let mid_a = overlay_a.local_peer();
    let mid_b = overlay_b.local_peer();

    let (ab, ba) = tokio::join!(
        overlay_a.connect(overlay_b.local_addr()),
        overlay_b.connect(overlay_a.local_addr()),
    );
    assert_eq!(ab?, mid_b);
    assert_eq!(ba?, mid_a);

    tokio::time::timeout(Duration::from_secs(5), async {
        client_a.registry().observe().wait_for(|s| s.contains(&mid_b)).await;
        client_b.registry().observe().wait_for(|s| s.contains(&mid_a)).await;
    })
    .await?;
    assert_eq!(overlay_a.connected_peers().await, vec![mid_b]);
    assert_eq!(overlay_b.connected_peers().await, vec![mid_a]);
    Ok(())
}

#[tokio::test]
async fn test_send_without_connection_is_rejected() -> anyhow::Result<()> {
    let (overlay, _events) = TcpOverlay::bind(Identity::generate(), "127.0.0.1:0".parse()?).await?;
    let stranger = Identity::generate().peer_id();

    let result = overlay
        .send_message(&PeerHandle::new(stranger), MessageKind::GreetingRequest, b"x".to_vec())
        .await;
    assert!(result.is_err());
    assert!(!overlay.is_connected(&stranger).await);
    Ok(())
}
