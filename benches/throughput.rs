use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use serde_json::json;
use std::hint::black_box;
use switchyard::router::{ParamKind, Router};
use switchyard::{Body, Dispatcher, HeaderVec, RouteDefinition, RuntimeConfig};

const TABLE_SIZES: [usize; 3] = [10, 100, 1000];

fn zoo_router(extra: usize) -> Router<usize> {
    let mut router = Router::new();
    for i in 0..extra {
        router
            .register(Method::GET, &format!("/filler/{i}/static"), i, &[])
            .unwrap();
        router
            .register(Method::GET, &format!("/filler{i}/{{id}}"), i, &[])
            .unwrap();
    }
    router.register(Method::GET, "/zoo/animals", 0, &[]).unwrap();
    router
        .register(
            Method::GET,
            "/zoo/animals/{id}/toys/{toy_id}",
            1,
            &[("id", ParamKind::Int), ("toy_id", ParamKind::Int)],
        )
        .unwrap();
    router
        .register(
            Method::GET,
            "/complex/{a}/{b}/{c}/{d}/{e}/{f}/{g}/{h}",
            2,
            &[],
        )
        .unwrap();
    router
}

fn bench_static_vs_dynamic(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_match");
    for size in TABLE_SIZES {
        let router = zoo_router(size);
        group.bench_with_input(BenchmarkId::new("static", size), &router, |b, router| {
            b.iter(|| black_box(router.match_route(&Method::GET, black_box("/zoo/animals"))));
        });
        group.bench_with_input(BenchmarkId::new("dynamic", size), &router, |b, router| {
            b.iter(|| {
                black_box(router.match_route(&Method::GET, black_box("/zoo/animals/123/toys/456")))
            });
        });
    }
    group.finish();

    let router = zoo_router(0);
    c.bench_function("route_match_many_params", |b| {
        b.iter(|| black_box(router.match_route(&Method::GET, black_box("/complex/1/2/3/4/5/6/7/8"))));
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut dispatcher = Dispatcher::new(RuntimeConfig::default()).unwrap();
    dispatcher
        .register(
            Method::GET,
            "/async/{id:int}",
            RouteDefinition::non_blocking(|args| async move { anyhow::Ok(json!(args.i64("id")?)) }),
        )
        .unwrap();
    dispatcher
        .register(
            Method::GET,
            "/sync/{id:int}",
            RouteDefinition::blocking(|args| Ok(json!(args.i64("id")?))),
        )
        .unwrap();

    for mode in ["async", "sync"] {
        let path = format!("/{mode}/42");
        c.bench_function(&format!("dispatch_{mode}"), |b| {
            b.iter(|| {
                rt.block_on(dispatcher.handle(
                    Method::GET,
                    &path,
                    Vec::new(),
                    HeaderVec::new(),
                    Body::empty(),
                ))
            });
        });
    }
}

criterion_group!(benches, bench_static_vs_dynamic, bench_dispatch);
criterion_main!(benches);
