//! Candidate selection over a populated store.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::TempDir;

use upqueue_store::{JobId, JobState, JobStore, StoreConfig};

fn populated_store(dir: &TempDir, jobs: usize) -> JobStore {
    let mut store = JobStore::open(&StoreConfig::new(dir.path(), "bench")).unwrap();
    for i in 0..jobs {
        let id = JobId::new(format!("job-{i:06}")).unwrap();
        store.enqueue(&id, &[0u8; 256]).unwrap();
        // Leave only the newest job pending so selection scans everything.
        if i + 1 < jobs {
            store.update_state(&id, JobState::Complete).unwrap();
        }
    }
    store
}

fn bench_next_pending(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_pending_job");
    for jobs in [100, 1_000] {
        let dir = TempDir::new().unwrap();
        let store = populated_store(&dir, jobs);
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &store, |b, store| {
            b.iter(|| black_box(store.next_pending_job()))
        });
    }
    group.finish();
}

fn bench_reopen(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    drop(populated_store(&dir, 1_000));
    c.bench_function("open_1000_jobs", |b| {
        b.iter(|| black_box(JobStore::open(&StoreConfig::new(dir.path(), "bench")).unwrap()))
    });
}

criterion_group!(benches, bench_next_pending, bench_reopen);
criterion_main!(benches);
