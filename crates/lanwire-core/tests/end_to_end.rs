// SPDX-License-Identifier: AGPL-3.0
// End-to-end tests: a real server and client talking over loopback.

use lanwire_core::{
    EngineError, EngineEvent, TransferDirection, TransferEngine, TransferStatus,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

struct Receiver {
    engine: TransferEngine,
    port: u16,
    download_dir: PathBuf,
    _config: tempfile::TempDir,
    _downloads: tempfile::TempDir,
}

/// Start a receiver engine on an ephemeral port
async fn start_receiver(trusted: Vec<String>) -> Receiver {
    let config = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();

    let engine = TransferEngine::with_config_dir(config.path()).unwrap();
    let mut settings = engine.get_settings();
    settings.port = 0;
    settings.download_dir = downloads.path().to_path_buf();
    settings.trusted_hosts = trusted;
    engine.update_settings(settings).await.unwrap();

    let port = engine.start_server().await.unwrap();

    Receiver {
        engine,
        port,
        download_dir: downloads.path().to_path_buf(),
        _config: config,
        _downloads: downloads,
    }
}

fn sender_engine() -> (tempfile::TempDir, TransferEngine) {
    let config = tempfile::tempdir().unwrap();
    let engine = TransferEngine::with_config_dir(config.path()).unwrap();
    (config, engine)
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Wait for the next transfer-request event
async fn next_request(rx: &mut broadcast::Receiver<EngineEvent>) -> String {
    timeout(Duration::from_secs(5), async {
        loop {
            if let EngineEvent::TransferRequest { transfer } = rx.recv().await.unwrap() {
                return transfer.id;
            }
        }
    })
    .await
    .expect("no transfer request observed")
}

#[tokio::test]
async fn trusted_sender_transfers_without_a_decision() {
    let receiver = start_receiver(vec!["127.0.0.1".to_string()]).await;
    let (sender_dir, sender) = sender_engine();
    let source = write_file(&sender_dir, "x.jpg", &vec![7u8; 1_048_576]);

    let mut events = receiver.engine.subscribe();

    let transfer_id = sender
        .send_files("127.0.0.1", receiver.port, vec![source])
        .await
        .unwrap();

    // The file landed intact
    let received = std::fs::read(receiver.download_dir.join("x.jpg")).unwrap();
    assert_eq!(received.len(), 1_048_576);

    // Never entered pending
    assert!(receiver.engine.pending_transfers().await.is_empty());

    // Both sides recorded a completed transfer
    let receiver_history = receiver.engine.transfer_history();
    assert_eq!(receiver_history.len(), 1);
    assert_eq!(receiver_history[0].id, transfer_id);
    assert_eq!(receiver_history[0].status, TransferStatus::Completed);
    assert_eq!(receiver_history[0].direction, TransferDirection::Received);
    assert_eq!(receiver_history[0].bytes_transferred, 1_048_576);
    assert_eq!(receiver_history[0].total_size, 1_048_576);

    let sender_history = sender.transfer_history();
    assert_eq!(sender_history.len(), 1);
    assert_eq!(sender_history[0].status, TransferStatus::Completed);
    assert_eq!(sender_history[0].direction, TransferDirection::Sent);

    // A completion event was broadcast
    let completed = timeout(Duration::from_secs(5), async {
        loop {
            if let EngineEvent::TransferComplete { transfer_id } = events.recv().await.unwrap() {
                return transfer_id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, transfer_id);
}

#[tokio::test]
async fn untrusted_sender_waits_for_acceptance() {
    let receiver = start_receiver(vec![]).await;
    let (sender_dir, sender) = sender_engine();
    let source = write_file(&sender_dir, "notes.txt", b"meeting at noon");

    let mut events = receiver.engine.subscribe();
    let port = receiver.port;

    let send_task = tokio::spawn(async move {
        sender
            .send_files("127.0.0.1", port, vec![source])
            .await
            .map(|id| (sender, id))
    });

    let transfer_id = next_request(&mut events).await;
    assert_eq!(receiver.engine.pending_transfers().await.len(), 1);

    let token = receiver.engine.accept_transfer(&transfer_id).await.unwrap();
    assert!(!token.is_empty());

    let (sender, sent_id) = send_task.await.unwrap().unwrap();
    assert_eq!(sent_id, transfer_id);

    let received = std::fs::read(receiver.download_dir.join("notes.txt")).unwrap();
    assert_eq!(received, b"meeting at noon");
    assert_eq!(sender.transfer_history()[0].status, TransferStatus::Completed);
}

#[tokio::test]
async fn rejection_reaches_the_sender() {
    let receiver = start_receiver(vec![]).await;
    let (sender_dir, sender) = sender_engine();
    let source = write_file(&sender_dir, "secret.bin", b"nope");

    let mut events = receiver.engine.subscribe();
    let port = receiver.port;

    let send_task =
        tokio::spawn(async move { sender.send_files("127.0.0.1", port, vec![source]).await });

    let transfer_id = next_request(&mut events).await;
    receiver.engine.reject_transfer(&transfer_id).await.unwrap();

    let result = send_task.await.unwrap();
    assert!(matches!(result, Err(EngineError::Rejected)));

    // Nothing was written and the rejection is in history
    assert!(std::fs::read_dir(&receiver.download_dir)
        .unwrap()
        .next()
        .is_none());
    let history = receiver.engine.transfer_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransferStatus::Rejected);
}

#[tokio::test]
async fn cancelling_a_pending_transfer_stops_the_sender() {
    let receiver = start_receiver(vec![]).await;
    let (sender_dir, sender) = sender_engine();
    let source = write_file(&sender_dir, "big.bin", &[1u8; 64]);

    let mut events = receiver.engine.subscribe();
    let port = receiver.port;

    let send_task =
        tokio::spawn(async move { sender.send_files("127.0.0.1", port, vec![source]).await });

    let transfer_id = next_request(&mut events).await;
    receiver.engine.cancel_transfer(&transfer_id).await.unwrap();
    // Cancelling again is a harmless no-op
    receiver.engine.cancel_transfer(&transfer_id).await.unwrap();

    let result = send_task.await.unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn same_file_name_twice_never_overwrites() {
    let receiver = start_receiver(vec!["127.0.0.1".to_string()]).await;

    for content in [b"first!".as_slice(), b"second".as_slice()] {
        let (sender_dir, sender) = sender_engine();
        let source = write_file(&sender_dir, "a.txt", content);
        sender
            .send_files("127.0.0.1", receiver.port, vec![source])
            .await
            .unwrap();
    }

    assert_eq!(
        std::fs::read(receiver.download_dir.join("a.txt")).unwrap(),
        b"first!"
    );
    assert_eq!(
        std::fs::read(receiver.download_dir.join("a (1).txt")).unwrap(),
        b"second"
    );
}

#[tokio::test]
async fn directory_send_reconstructs_structure() {
    let receiver = start_receiver(vec!["127.0.0.1".to_string()]).await;
    let (sender_dir, sender) = sender_engine();

    let root = sender_dir.path().join("album");
    std::fs::create_dir_all(root.join("covers")).unwrap();
    std::fs::write(root.join("track01.flac"), b"audio-1").unwrap();
    std::fs::write(root.join("covers/front.png"), b"image-1").unwrap();

    sender
        .send_directory("127.0.0.1", receiver.port, &root)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(receiver.download_dir.join("track01.flac")).unwrap(),
        b"audio-1"
    );
    assert_eq!(
        std::fs::read(receiver.download_dir.join("covers/front.png")).unwrap(),
        b"image-1"
    );
}

#[tokio::test]
async fn transfers_from_two_senders_proceed_independently() {
    let receiver = start_receiver(vec![]).await;
    let mut events = receiver.engine.subscribe();
    let port = receiver.port;

    let (dir_a, sender_a) = sender_engine();
    let source_a = write_file(&dir_a, "a.bin", &[0xaau8; 256]);
    let task_a =
        tokio::spawn(async move { sender_a.send_files("127.0.0.1", port, vec![source_a]).await });

    let id_a = next_request(&mut events).await;

    let (dir_b, sender_b) = sender_engine();
    let source_b = write_file(&dir_b, "b.bin", &[0xbbu8; 256]);
    let task_b =
        tokio::spawn(async move { sender_b.send_files("127.0.0.1", port, vec![source_b]).await });

    let id_b = next_request(&mut events).await;

    // Decide B first; A stays pending and unaffected
    receiver.engine.accept_transfer(&id_b).await.unwrap();
    task_b.await.unwrap().unwrap();
    assert!(receiver.download_dir.join("b.bin").exists());

    let pending = receiver.engine.pending_transfers().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id_a);

    receiver.engine.accept_transfer(&id_a).await.unwrap();
    task_a.await.unwrap().unwrap();
    assert!(receiver.download_dir.join("a.bin").exists());

    assert_eq!(receiver.engine.transfer_history().len(), 2);
}

#[tokio::test]
async fn accept_all_decides_every_pending_transfer() {
    let receiver = start_receiver(vec![]).await;
    let mut events = receiver.engine.subscribe();
    let port = receiver.port;

    let mut tasks = Vec::new();
    for name in ["one.txt", "two.txt"] {
        let (dir, sender) = sender_engine();
        let source = write_file(&dir, name, b"payload");
        tasks.push(tokio::spawn(async move {
            let result = sender.send_files("127.0.0.1", port, vec![source]).await;
            drop(dir);
            result
        }));
    }

    next_request(&mut events).await;
    next_request(&mut events).await;

    let accepted = receiver.engine.accept_all_transfers().await;
    assert_eq!(accepted.len(), 2);

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert!(receiver.download_dir.join("one.txt").exists());
    assert!(receiver.download_dir.join("two.txt").exists());
}

#[tokio::test]
async fn peer_info_and_health_are_served() {
    let receiver = start_receiver(vec![]).await;
    let mut settings = receiver.engine.get_settings();
    settings.device_name = "test-receiver".to_string();
    receiver.engine.update_settings(settings).await.unwrap();

    let (_dir, sender) = sender_engine();
    assert!(sender.check_peer("127.0.0.1", receiver.port).await.unwrap());

    let info = sender.peer_info("127.0.0.1", receiver.port).await.unwrap();
    assert_eq!(info.device_name, "test-receiver");
    assert!(!info.version.is_empty());
}

#[tokio::test]
async fn port_rebind_moves_the_listener() {
    let receiver = start_receiver(vec![]).await;
    let old_port = receiver.port;
    let mut events = receiver.engine.subscribe();

    let mut settings = receiver.engine.get_settings();
    settings.port = 0; // any free port, but a fresh bind
    // Force a rebind by picking a concrete different port
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    settings.port = probe.local_addr().unwrap().port();
    drop(probe);
    receiver.engine.update_settings(settings).await.unwrap();

    let status = receiver.engine.server_status().await;
    assert!(status.running);
    let new_port = status.port.unwrap();
    assert_ne!(new_port, old_port);

    let observed = timeout(Duration::from_secs(5), async {
        loop {
            if let EngineEvent::PortChanged { old_port, new_port } = events.recv().await.unwrap() {
                return (old_port, new_port);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(observed, (old_port, new_port));

    let (_dir, sender) = sender_engine();
    assert!(sender.check_peer("127.0.0.1", new_port).await.unwrap());
}
