use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;
use tlgstore::DiskStore;

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();
        let data = vec![b'x'; 1024];
        let mut counter = 0u64;

        b.iter(|| {
            let key = format!("id:{}", counter % 1000);
            black_box(db.put(key.as_bytes(), &data).unwrap());
            counter += 1;
        });
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();
        let data = vec![b'x'; 1024];

        let keys: Vec<String> = (0..100).map(|i| format!("id:{}", i)).collect();
        for key in &keys {
            db.put(key.as_bytes(), &data).unwrap();
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(db.get(keys[counter % 100].as_bytes()).unwrap());
            counter += 1;
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
