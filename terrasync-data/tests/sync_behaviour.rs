//! Behavioural tests for [`LayerSync`] against a scripted WFS.
//!
//! Each scenario runs the full pipeline on a paused current-thread runtime,
//! so pacing and retry delays cost no wall-clock time.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use terrasync_core::format_timestamp;
use terrasync_core::test_support::MemoryWriter;
use terrasync_data::layers::CADASTRAL;
use terrasync_data::sync::{LayerSync, SyncReport, SyncSettings};
use terrasync_data::test_support::{Failure, ScriptedSource, feature_xml, requested_offsets};
use terrasync_data::wfs::{FeatureSource, RetryPolicy};
use tokio_util::sync::CancellationToken;

struct SyncWorld {
    pending: RefCell<Option<ScriptedSource>>,
    source: RefCell<Option<Arc<ScriptedSource>>>,
    settings: Cell<SyncSettings>,
    writer: MemoryWriter,
    reports: RefCell<Vec<SyncReport>>,
}

#[fixture]
fn world() -> SyncWorld {
    SyncWorld {
        pending: RefCell::new(None),
        source: RefCell::new(None),
        settings: Cell::new(
            SyncSettings::default()
                .with_requests_per_second(50)
                .with_poll_interval(Duration::from_millis(10))
                .with_retry(RetryPolicy::default().with_jitter(false)),
        ),
        writer: MemoryWriter::new(CADASTRAL.schema.version_field),
        reports: RefCell::new(Vec::new()),
    }
}

fn script(world: &SyncWorld, edit: impl FnOnce(ScriptedSource) -> ScriptedSource) {
    let source = world
        .pending
        .borrow_mut()
        .take()
        .expect("layer must be described first");
    world.pending.replace(Some(edit(source)));
}

fn adjust(world: &SyncWorld, edit: impl FnOnce(SyncSettings) -> SyncSettings) {
    world.settings.set(edit(world.settings.get()));
}

/// The scripted source, frozen on first use so reruns hit the same layer.
fn shared_source(world: &SyncWorld) -> Arc<ScriptedSource> {
    let mut shared = world.source.borrow_mut();
    if shared.is_none() {
        let source = world
            .pending
            .borrow_mut()
            .take()
            .expect("layer must be described first");
        *shared = Some(Arc::new(source));
    }
    Arc::clone(shared.as_ref().expect("source frozen above"))
}

fn last_report(world: &SyncWorld) -> SyncReport {
    *world.reports.borrow().last().expect("layer must be synchronised")
}

// --- Given steps ---

#[given("a layer of {total} parcels")]
fn layer_of(world: &SyncWorld, total: u64) {
    world.pending.replace(Some(ScriptedSource::new(total)));
}

#[given("a page size of {size}")]
fn page_size(world: &SyncWorld, size: u64) {
    adjust(world, |settings| settings.with_page_size(size));
}

#[given("a batch size of {size}")]
fn batch_size(world: &SyncWorld, size: usize) {
    adjust(world, |settings| settings.with_batch_size(size));
}

#[given("at most {limit} concurrent requests")]
fn concurrency(world: &SyncWorld, limit: usize) {
    adjust(world, |settings| settings.with_max_concurrent(limit));
}

#[given("responses that take {millis} milliseconds")]
fn latency(world: &SyncWorld, millis: u64) {
    script(world, |source| {
        source.with_latency(Duration::from_millis(millis))
    });
}

#[given("the page at offset {offset} always fails with status {status}")]
fn failing_page(world: &SyncWorld, offset: u64, status: u16) {
    script(world, |source| {
        source.failing_always(offset, Failure::Status(status))
    });
}

#[given("parcel {id} registered at {stamp}")]
fn registered(world: &SyncWorld, id: i64, stamp: String) {
    script(world, |source| source.with_registration(id, Some(&stamp)));
}

#[given("a copy of parcel {id} registered at {stamp} on the page at offset {offset}")]
fn extra_copy(world: &SyncWorld, id: i64, stamp: String, offset: u64) {
    script(world, |source| {
        source.with_extra_feature(offset, feature_xml(id, Some(&stamp)))
    });
}

// --- When steps ---

#[when("the layer is synchronised")]
fn synchronise(world: &SyncWorld) {
    run_once(world);
}

#[when("the layer is synchronised again")]
fn synchronise_again(world: &SyncWorld) {
    assert!(!world.reports.borrow().is_empty(), "no earlier run");
    run_once(world);
}

fn run_once(world: &SyncWorld) {
    let source: Arc<dyn FeatureSource> = shared_source(world);
    let pipeline =
        LayerSync::new(source, CADASTRAL, world.settings.get()).expect("valid settings");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("build runtime");
    let report = runtime
        .block_on(pipeline.sync(world.writer.clone(), CancellationToken::new()))
        .expect("sync succeeds");
    world.reports.borrow_mut().push(report);
}

// --- Then steps ---

#[then("the store holds {count} rows")]
fn store_holds(world: &SyncWorld, count: u64) {
    assert_eq!(last_report(world).stored_rows, count);
    assert_eq!(world.writer.rows().len() as u64, count);
}

#[then("no batches were written")]
fn no_batches(world: &SyncWorld) {
    assert!(world.writer.batch_sizes().is_empty());
    assert_eq!(last_report(world).stats.batches_written, 0);
}

#[then("only the total was requested")]
fn only_probe(world: &SyncWorld) {
    let calls = shared_source(world).calls();
    assert_eq!(calls.len(), 1, "unexpected calls: {calls:?}");
    assert_eq!(calls.first().map(|call| call.count), Some(1));
}

#[then("the requested page offsets are {offsets}")]
fn requested(world: &SyncWorld, offsets: String) {
    let mut expected: Vec<u64> = offsets
        .split(',')
        .map(|offset| offset.trim().parse().expect("numeric offset"))
        .collect();
    expected.sort_unstable();
    let mut actual: Vec<u64> = requested_offsets(&shared_source(world)).into_iter().collect();
    actual.sort_unstable();
    assert_eq!(actual, expected);
}

#[then("{count} batches were written")]
fn batches_written(world: &SyncWorld, count: u64) {
    assert_eq!(last_report(world).stats.batches_written, count);
    assert_eq!(world.writer.batch_sizes().len() as u64, count);
}

#[then("{count} page was skipped")]
fn pages_skipped(world: &SyncWorld, count: u64) {
    let report = last_report(world);
    assert_eq!(report.stats.pages_skipped, count);
    assert!(!report.is_complete());
}

#[then("{count} pages were fetched")]
fn pages_fetched(world: &SyncWorld, count: u64) {
    assert_eq!(last_report(world).stats.pages_fetched, count);
}

#[then("parcel {id} is stored with registration {stamp}")]
fn stored_registration(world: &SyncWorld, id: i64, stamp: String) {
    let row = world.writer.row(id).expect("parcel stored");
    let stored = row
        .timestamp(CADASTRAL.schema.version_field)
        .map(format_timestamp);
    assert_eq!(stored.as_deref(), Some(stamp.as_str()));
}

#[then("every run reports {count} stored rows")]
fn every_run(world: &SyncWorld, count: u64) {
    let reports = world.reports.borrow();
    assert!(reports.len() > 1, "expected repeated runs");
    assert!(reports.iter().all(|report| report.stored_rows == count));
}

#[then("at most {limit} requests were in flight at once")]
fn peak_in_flight(world: &SyncWorld, limit: usize) {
    let peak = shared_source(world).peak_in_flight();
    assert!(peak <= limit, "peak of {peak} requests in flight");
    assert!(peak > 1, "requests never overlapped");
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $title:literal) => {
        #[scenario(path = "tests/features/layer_sync.feature", name = $title)]
        fn $fn_name(world: SyncWorld) {
            let _ = world;
        }
    };
}

register_scenario!(
    empty_layer,
    "An empty layer completes without writing"
);
register_scenario!(
    paged_layer,
    "A layer spanning several pages is fetched page by page"
);
register_scenario!(failing_page_skipped, "A page that keeps failing is skipped");
register_scenario!(
    later_copy_wins,
    "A later copy of a parcel replaces an earlier one"
);
register_scenario!(
    earlier_copy_loses,
    "An earlier copy of a parcel never replaces a later one"
);
register_scenario!(
    rerun_idempotent,
    "Running the sync again leaves the store unchanged"
);
register_scenario!(
    concurrency_bounded,
    "Slow responses never exceed the concurrency limit"
);
