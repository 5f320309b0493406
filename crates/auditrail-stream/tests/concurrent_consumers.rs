use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auditrail_db::DbRuntimeSettings;
use auditrail_stream::{DurableStream, ReadCursor, SqliteStream};

const STREAM: &str = "audit-events";
const GROUP: &str = "audit-indexer";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_are_delivered_once_per_group() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stream.db");
    let stream = Arc::new(
        SqliteStream::open(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("stream should open"),
    );
    stream.create_group_if_absent(STREAM, GROUP).await.unwrap();
    let writers_done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let stream = stream.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let fields = HashMap::from([("payload".to_string(), format!("{w}-{i}"))]);
                    stream.append(STREAM, fields).await.expect("append");
                }
            })
        })
        .collect();

    let readers: Vec<_> = ["indexer-1", "indexer-2"]
        .into_iter()
        .map(|consumer| {
            let stream = stream.clone();
            let writers_done = writers_done.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    // Sampled before the read so an empty batch after the
                    // last append really means drained.
                    let finished = writers_done.load(Ordering::SeqCst);
                    let batch = stream
                        .read_group(
                            STREAM,
                            GROUP,
                            consumer,
                            16,
                            ReadCursor::NeverDelivered,
                            Some(Duration::from_millis(100)),
                        )
                        .await
                        .expect("read");
                    if batch.is_empty() {
                        if finished {
                            break;
                        }
                        continue;
                    }
                    let ids: Vec<_> = batch.iter().map(|e| e.id).collect();
                    stream.ack(STREAM, GROUP, &ids).await.expect("ack");
                    seen.extend(batch.into_iter().map(|e| e.fields["payload"].clone()));
                }
                seen
            })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap();
    }
    writers_done.store(true, Ordering::SeqCst);
    let mut delivered = Vec::new();
    for reader in readers {
        delivered.extend(reader.await.unwrap());
    }

    let unique: HashSet<&String> = delivered.iter().collect();
    assert_eq!(delivered.len(), 400, "every entry delivered");
    assert_eq!(unique.len(), 400, "no entry delivered twice");
    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 0);
}
