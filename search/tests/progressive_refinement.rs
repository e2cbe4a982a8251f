use clip_search::{QueryController, SearchEngine};
use clip_store::config::StoreConfig;
use clip_store::record::{ContentType, IngestedContent};
use clip_store::Store;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn filler(n: usize) -> IngestedContent {
    IngestedContent {
        kind: ContentType::Text,
        plain_text: format!("filler clipboard entry number {n}"),
        note: None,
        app_bundle_id: None,
        raw_payload: Vec::new(),
    }
}

fn target() -> IngestedContent {
    IngestedContent {
        kind: ContentType::Text,
        plain_text: "zz_target_oldest".to_string(),
        note: None,
        app_bundle_id: None,
        raw_payload: Vec::new(),
    }
}

/// A large corpus searched through a [`QueryController`] should surface a
/// prefilter page immediately, then settle on the authoritative full-fuzzy
/// page (which must include the target even though it's buried far behind
/// thousands of filler entries) without the caller driving anything beyond
/// `set_query`/`tick`.
#[test]
fn large_corpus_search_through_the_controller_converges_on_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path());
    let store = Arc::new(Store::open(config.clone()).unwrap());

    let base = SystemTime::now();
    for n in 0..2000 {
        store.upsert(filler(n), base + Duration::from_millis(n as u64)).unwrap();
    }
    store.upsert(target(), base).unwrap();

    let engine = Arc::new(SearchEngine::open(Arc::clone(&store), config));
    let mut controller = QueryController::with_debounce(engine, Duration::ZERO);

    controller.set_query("zz_target_oldest");
    std::thread::sleep(Duration::from_millis(20));
    controller.tick();

    // First settle: either an immediate prefilter page, or (if the
    // background build raced ahead) the authoritative page already.
    assert!(!controller.state().items.is_empty());

    // Give the background full-index build time to finish and re-tick;
    // `run_search_and_commit` re-dispatches itself once the prefilter
    // resolves, so a second settle should land on the full result.
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(20));
        controller.tick();
        if controller.state().total_count >= 0 {
            break;
        }
    }

    assert_eq!(controller.state().total_count, 1);
    assert_eq!(controller.state().items.len(), 1);
    assert_eq!(controller.state().items[0].plain_text, "zz_target_oldest");
}

/// Deleting the currently selected item and re-running the same query
/// reconciles selection onto a surviving item rather than a stale id.
#[test]
fn deleting_the_selected_item_reconciles_selection_on_next_search() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path());
    let store = Arc::new(Store::open(config.clone()).unwrap());

    let now = SystemTime::now();
    let a = store
        .upsert(
            IngestedContent {
                kind: ContentType::Text,
                plain_text: "alpha".to_string(),
                note: None,
                app_bundle_id: None,
                raw_payload: Vec::new(),
            },
            now,
        )
        .unwrap();
    store
        .upsert(
            IngestedContent {
                kind: ContentType::Text,
                plain_text: "beta".to_string(),
                note: None,
                app_bundle_id: None,
                raw_payload: Vec::new(),
            },
            now + Duration::from_secs(1),
        )
        .unwrap();

    let engine = Arc::new(SearchEngine::open(Arc::clone(&store), config));
    let mut controller = QueryController::with_debounce(engine, Duration::ZERO);

    controller.set_query("");
    std::thread::sleep(Duration::from_millis(10));
    controller.tick();
    assert!(controller.state().items.iter().any(|r| r.id == a.id));

    store.delete(a.id).unwrap();

    // `known_data_version` already changed, so the recent-items cache
    // misses on its own; no explicit invalidation call is needed here.
    controller.set_query("");
    std::thread::sleep(Duration::from_millis(10));
    controller.tick();

    assert!(!controller.state().items.iter().any(|r| r.id == a.id));
    assert_ne!(controller.state().selected_id, Some(a.id));
}
