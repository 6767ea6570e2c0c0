//! Watch-query resolver thread
//!
//! Periodically re-resolves one query and spawns a recording thread for
//! every stream not seen before. Streams admitted here are not
//! phase-locked: they skip the header barrier, and their header chunks
//! may land later in the file, which flags the recording as possibly
//! unsorted.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

use super::{join_all_timed, recorder, RecordingShared};

pub(crate) fn run(shared: &Arc<RecordingShared>, query: &str) {
    let mut known_uids: HashSet<String> = HashSet::new();
    let mut known_source_ids: HashSet<String> = HashSet::new();
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    info!("watching for streams with properties {query}");
    while !shared.is_shutdown() {
        let results = match shared
            .source
            .resolve_query(query, 0, shared.config.resolve_interval)
        {
            Ok(results) => results,
            Err(e) => {
                error!("error while resolving the watch query {query}: {e}");
                break;
            }
        };

        for info in results {
            if known_uids.contains(&info.uid) {
                continue;
            }
            // A restarted device comes back with a new uid but the same
            // source id; don't record it twice.
            if !info.source_id.is_empty() && known_source_ids.contains(&info.source_id) {
                continue;
            }
            info!("found a new stream named {}, adding it to the recording", info.name);
            known_uids.insert(info.uid.clone());
            if !info.source_id.is_empty() {
                known_source_ids.insert(info.source_id.clone());
            }
            shared.mark_unsorted();

            let shared = Arc::clone(shared);
            threads.push(std::thread::spawn(move || {
                recorder::run(&shared, info, false);
            }));
        }
    }

    join_all_timed(threads, shared.config.max_join_wait, "stream");
}
