use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use revu_memory::estimate_tokens;

fn generate_diff(size: usize) -> String {
    let hunk = "@@ -10,7 +10,9 @@ fn handle(req: Request) -> Response {\n\
                -    let body = req.body();\n\
                +    let body = req.body().trim();\n";
    hunk.repeat(size / hunk.len() + 1)[..size].to_string()
}

fn token_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens");

    for size in [1_000, 10_000, 100_000] {
        let input = generate_diff(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("diff", size), &input, |b, input| {
            b.iter(|| estimate_tokens(black_box(input)));
        });
    }

    group.finish();
}

criterion_group!(benches, token_estimation);
criterion_main!(benches);
