//! Benchmarks for pipeline execution and pooling.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eventflow::cancellation::CancellationToken;
use eventflow::context::RunContext;
use eventflow::core::TypeKey;
use eventflow::pipeline::{Next, PipelineBuilder};
use eventflow::pool::ObjectPool;
use eventflow::services::ServiceProvider;
use std::sync::Arc;

struct Tick(u64);

fn pool_benchmark(c: &mut Criterion) {
    let pool = Arc::new(ObjectPool::<RunContext>::new(16));

    c.bench_function("pool_rent_return", |b| {
        b.iter(|| {
            let context = pool.rent();
            black_box(context.len())
        })
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let pipeline = Arc::new(
        PipelineBuilder::for_event::<Tick>()
            .wrap(|next: Next| async move {
                next.run().await?;
                anyhow::Ok(())
            })
            .handler(|tick: Arc<Tick>| async move {
                black_box(tick.0);
                anyhow::Ok(())
            })
            .build()
            .unwrap(),
    );
    let services = ServiceProvider::default();
    let token = CancellationToken::new();

    c.bench_function("pipeline_execute", |b| {
        b.iter(|| {
            let context = RunContext::new();
            context.insert_value(TypeKey::of::<Tick>(), Arc::new(Tick(7)));
            runtime
                .block_on(pipeline.execute(context, &services, &token))
                .unwrap()
        })
    });
}

criterion_group!(benches, pool_benchmark, pipeline_benchmark);
criterion_main!(benches);
