use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lowprofile_cache::{CacheKey, DiskCache, DEFAULT_NAMESPACE};
use tempfile::TempDir;

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key");
    group.throughput(Throughput::Elements(1));

    group.bench_function("for_locator", |b| {
        b.iter(|| {
            black_box(CacheKey::for_locator(black_box(
                "https://images.example.com/thumbnails/2014/07/Profile_Picture.png?size=large",
            )))
        });
    });

    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_16kb", |b| {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        let data = vec![b'x'; 16 * 1024];

        let keys: Vec<_> = (0..100)
            .map(|i| CacheKey::for_locator(&format!("http://host/{}.png", i)))
            .collect();
        for key in &keys {
            cache.put(key, &data);
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.get(&keys[counter % 100]).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_cache_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_absent", |b| {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        let key = CacheKey::for_locator("http://host/missing.png");

        b.iter(|| {
            black_box(cache.get(&key));
        });
    });

    group.finish();
}

fn bench_put_existing(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_existing_noop", |b| {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        let key = CacheKey::for_locator("http://host/a.png");
        let data = vec![b'x'; 16 * 1024];
        cache.put(&key, &data);

        b.iter(|| {
            black_box(cache.put(&key, &data));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_key_derivation,
    bench_cache_hit,
    bench_cache_miss,
    bench_put_existing
);
criterion_main!(benches);
