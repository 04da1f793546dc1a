use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::*;
use crate::model::ReleaseMessage;
use crate::MemoryStore;
use crate::ReleaseMessageStore;

#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<u64>>,
}

impl ReleaseMessageListener for Collector {
    fn handle_message(
        &self,
        message: &ReleaseMessage,
    ) {
        self.seen.lock().push(message.id);
    }
}

#[test]
fn test_scanner_skips_history_and_delivers_new_messages_in_order() {
    let store = Arc::new(MemoryStore::new());
    store.save("a+default+old").unwrap();
    let scanner = ReleaseMessageScanner::new(store.clone(), Duration::from_secs(1)).unwrap();
    let collector = Arc::new(Collector::default());
    scanner.add_listener(collector.clone());
    scanner.add_listener(collector.clone());

    let ids: Vec<u64> = (0..3).map(|_| store.save("a+default+ns").unwrap().id).collect();

    assert_eq!(scanner.scan().unwrap(), 3);
    assert_eq!(*collector.seen.lock(), ids);
    assert_eq!(scanner.scan().unwrap(), 0);
    assert_eq!(scanner.max_id_scanned(), *ids.last().unwrap());
}

#[test]
fn test_scan_drains_more_than_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let scanner = ReleaseMessageScanner::new(store.clone(), Duration::from_secs(1)).unwrap();
    let collector = Arc::new(Collector::default());
    scanner.add_listener(collector.clone());

    let total = crate::constants::SCAN_BATCH_SIZE + 7;
    for i in 0..total {
        store.save(&format!("a+default+ns{}", i % 3)).unwrap();
    }

    assert_eq!(scanner.scan().unwrap(), total);
    assert_eq!(collector.seen.lock().len(), total);
}

#[tokio::test(start_paused = true)]
async fn test_run_scans_periodically_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let scanner = Arc::new(ReleaseMessageScanner::new(store.clone(), Duration::from_millis(100)).unwrap());
    let collector = Arc::new(Collector::default());
    scanner.add_listener(collector.clone());
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(scanner.clone().run(rx));

    store.save("a+default+ns").unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(collector.seen.lock().len(), 1);

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
