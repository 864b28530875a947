mod common;

use bytes::Bytes;
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use switchyard::context::{Body, HeaderVec};
use switchyard::ids::REQUEST_ID_HEADER;
use switchyard::{
    Dependency, DispatchError, HandlerResponse, HttpError, ParamKind, RegistrationError, Reply,
    RouteDefinition, RequestId,
};

#[derive(serde::Deserialize)]
struct NewPet {
    name: String,
}

fn pet(id: i64) -> Value {
    json!({ "id": id, "name": "Rex" })
}

#[tokio::test]
async fn test_blocking_and_non_blocking_handlers_have_same_shape() {
    let mut dispatcher = common::dispatcher(2);
    dispatcher
        .register(
            Method::GET,
            "/sync/pets/{id}",
            RouteDefinition::blocking(|args| Ok(pet(args.i64("id")?))).param("id", ParamKind::Int),
        )
        .unwrap();
    dispatcher
        .register(
            Method::GET,
            "/async/pets/{id}",
            RouteDefinition::non_blocking(|args| async move { anyhow::Ok(pet(args.i64("id")?)) })
                .param("id", ParamKind::Int),
        )
        .unwrap();

    let a = common::get(&dispatcher, "/sync/pets/7").await.unwrap();
    let b = common::get(&dispatcher, "/async/pets/7").await.unwrap();
    assert_eq!(a.status, b.status);
    assert_eq!(a.body, b.body);
    assert_eq!(a.get_header("content-type"), b.get_header("content-type"));
    assert_eq!(a.body, pet(7));
}

#[tokio::test]
async fn test_status_pair_and_full_reply() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::POST,
            "/pets",
            RouteDefinition::blocking(|args| {
                let new: NewPet = args.context().body.blocking_json()?;
                Ok((json!({ "name": new.name }), 201u16))
            }),
        )
        .unwrap();
    dispatcher
        .register(
            Method::GET,
            "/pets/export",
            RouteDefinition::blocking(|_| {
                let mut resp = HandlerResponse::new(200, HeaderVec::new(), json!("id,name"));
                resp.set_header("content-type", "text/csv".to_string());
                Ok(Reply::Full(resp))
            }),
        )
        .unwrap();

    let created = dispatcher
        .handle(
            Method::POST,
            "/pets",
            Vec::new(),
            HeaderVec::new(),
            Body::from_bytes(Bytes::from_static(br#"{"name":"Fido"}"#)),
        )
        .await
        .unwrap();
    assert_eq!(created.status, 201);
    assert_eq!(created.body, json!({ "name": "Fido" }));

    let export = common::get(&dispatcher, "/pets/export").await.unwrap();
    assert_eq!(export.get_header("content-type"), Some("text/csv"));
}

#[tokio::test]
async fn test_body_is_loaded_lazily() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(Method::POST, "/ignore", RouteDefinition::blocking(|_| Ok(json!("ok"))))
        .unwrap();

    let loads = common::Counter::default();
    let counter = loads.clone();
    let body = Body::deferred(move || async move {
        counter.hit();
        anyhow::Ok(Bytes::from_static(b"{}"))
    });
    dispatcher
        .handle(Method::POST, "/ignore", Vec::new(), HeaderVec::new(), body)
        .await
        .unwrap();
    assert_eq!(loads.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sibling_providers_read_the_body_once() {
    let mut dispatcher = common::dispatcher(2);
    let reads = |name: &'static str| {
        Dependency::non_blocking(name, move |args| async move {
            let pet: NewPet = args.context().body.json().await.map_err(HttpError::from)?;
            anyhow::Ok(json!(format!("{name}:{}", pet.name)))
        })
    };
    dispatcher
        .register(
            Method::POST,
            "/pets/check",
            RouteDefinition::blocking(|args| {
                let pet: NewPet = args.context().body.blocking_json()?;
                Ok(json!([args.str("spelling")?, args.str("species")?, pet.name]))
            })
            .dependency(reads("spelling"))
            .dependency(reads("species")),
        )
        .unwrap();

    let loads = common::Counter::default();
    let counter = loads.clone();
    let body = Body::deferred(move || async move {
        counter.hit();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        anyhow::Ok(Bytes::from_static(br#"{"name":"Fido"}"#))
    });
    let resp = dispatcher
        .handle(Method::POST, "/pets/check", Vec::new(), HeaderVec::new(), body)
        .await
        .unwrap();

    assert_eq!(resp.body, json!(["spelling:Fido", "species:Fido", "Fido"]));
    assert_eq!(loads.get(), 1);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::POST,
            "/pets",
            RouteDefinition::blocking(|args| {
                let new: NewPet = args
                    .context()
                    .body
                    .blocking_json()
                    .map_err(HttpError::from)?;
                Ok(json!(new.name))
            }),
        )
        .unwrap();

    let err = dispatcher
        .handle(
            Method::POST,
            "/pets",
            Vec::new(),
            HeaderVec::new(),
            Body::from_bytes(Bytes::from_static(b"{not json")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn test_routing_errors() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::GET,
            "/users/{id}",
            RouteDefinition::blocking(|args| Ok(json!(args.i64("id")?))).param("id", ParamKind::Int),
        )
        .unwrap();

    let not_found = common::get(&dispatcher, "/nope").await.unwrap_err();
    assert_eq!(not_found.status(), 404);

    let not_allowed = common::send(&dispatcher, Method::DELETE, "/users/1", &[])
        .await
        .unwrap_err();
    assert_eq!(not_allowed.status(), 405);

    match common::get(&dispatcher, "/users/abc").await.unwrap_err() {
        DispatchError::ParamConversion(e) => {
            assert_eq!(e.name.as_ref(), "id");
            assert_eq!(e.value, "abc");
        }
        other => panic!("expected conversion error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_parameters() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::GET,
            "/search",
            RouteDefinition::non_blocking(|args| async move {
                anyhow::Ok(json!({
                    "q": args.str("q")?,
                    "limit": args.i64("limit")?,
                    "exact": args.get("exact").cloned(),
                }))
            })
            .query_required("q", ParamKind::Str)
            .query_default("limit", ParamKind::Int, json!(20))
            .query("exact", ParamKind::Bool),
        )
        .unwrap();

    let resp = common::send(&dispatcher, Method::GET, "/search", &[("q", "cats")])
        .await
        .unwrap();
    assert_eq!(resp.body, json!({ "q": "cats", "limit": 20, "exact": null }));

    let resp = common::send(
        &dispatcher,
        Method::GET,
        "/search",
        &[("q", "cats"), ("limit", "5"), ("limit", "50"), ("exact", "yes")],
    )
    .await
    .unwrap();
    assert_eq!(resp.body, json!({ "q": "cats", "limit": 50, "exact": true }));

    let missing = common::get(&dispatcher, "/search").await.unwrap_err();
    assert!(matches!(missing, DispatchError::MissingParameter { ref name } if name == "q"));
    assert_eq!(missing.status(), 400);

    let bad = common::send(&dispatcher, Method::GET, "/search", &[("q", "x"), ("limit", "many")])
        .await
        .unwrap_err();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn test_handler_errors() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::GET,
            "/panic",
            RouteDefinition::blocking(|_| -> anyhow::Result<Value> { panic!("handler exploded") }),
        )
        .unwrap();
    dispatcher
        .register(
            Method::GET,
            "/opaque",
            RouteDefinition::non_blocking(|_| async {
                let result: anyhow::Result<Value> = Err(anyhow::anyhow!("connection reset"));
                result
            }),
        )
        .unwrap();
    dispatcher
        .register(
            Method::GET,
            "/teapot",
            RouteDefinition::blocking(|_| -> anyhow::Result<Value> {
                Err(HttpError::new(418, json!({ "brew": "tea" })).into())
            }),
        )
        .unwrap();

    let panicked = common::get(&dispatcher, "/panic").await.unwrap_err();
    assert!(matches!(panicked, DispatchError::Panicked(_)));
    assert_eq!(panicked.status(), 500);

    let opaque = common::get(&dispatcher, "/opaque").await.unwrap_err();
    assert!(matches!(opaque, DispatchError::Handler(_)));

    let teapot = common::get(&dispatcher, "/teapot").await.unwrap_err();
    assert_eq!(teapot.status(), 418);

    // The pool still serves after the panic
    let rendered = dispatcher
        .handle_to_response(Method::GET, "/teapot", Vec::new(), HeaderVec::new(), Body::empty())
        .await;
    assert_eq!(rendered.status, 418);
    assert_eq!(rendered.body["error"], json!({ "brew": "tea" }));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::GET,
            "/whoami",
            RouteDefinition::blocking(|args| Ok(json!(args.context().request_id.to_string()))),
        )
        .unwrap();

    let incoming = RequestId::new();
    let mut headers = HeaderVec::new();
    headers.push((Arc::from("X-Request-Id"), incoming.to_string()));
    let resp = dispatcher
        .handle(Method::GET, "/whoami", Vec::new(), headers, Body::empty())
        .await
        .unwrap();
    assert_eq!(resp.get_header(REQUEST_ID_HEADER), Some(incoming.to_string().as_str()));
    assert_eq!(resp.body, json!(incoming.to_string()));

    let rendered = dispatcher
        .handle_to_response(Method::GET, "/missing", Vec::new(), HeaderVec::new(), Body::empty())
        .await;
    assert_eq!(rendered.status, 404);
    let rid = rendered.get_header(REQUEST_ID_HEADER).unwrap();
    assert_eq!(rendered.body["request_id"], json!(rid));
}

#[test]
fn test_registration_errors() {
    let mut dispatcher = common::dispatcher(1);
    let handler = || RouteDefinition::blocking(|_| Ok(json!(null)));

    dispatcher
        .register(Method::GET, "/items", handler().name("items"))
        .unwrap();

    assert!(matches!(
        dispatcher.register(Method::GET, "/items", handler()),
        Err(RegistrationError::Route(_))
    ));
    assert!(matches!(
        dispatcher.register(Method::GET, "/other", handler().name("items")),
        Err(RegistrationError::Route(_))
    ));
    assert!(matches!(
        dispatcher.register(
            Method::GET,
            "/items/{id}",
            handler().query("id", ParamKind::Int)
        ),
        Err(RegistrationError::DuplicateParameter { .. })
    ));
    assert!(matches!(
        dispatcher.register(Method::GET, "/broken/{id", handler()),
        Err(RegistrationError::Route(_))
    ));
    assert_eq!(dispatcher.router().len(), 1);
}

#[tokio::test]
async fn test_url_for_named_route() {
    let mut dispatcher = common::dispatcher(1);
    dispatcher
        .register(
            Method::GET,
            "/owners/{owner}/pets/{id:int}",
            RouteDefinition::blocking(|_| Ok(json!(null))).name("owner_pet"),
        )
        .unwrap();

    let url = dispatcher
        .url_for("owner_pet", &[("owner", "jo"), ("id", "9")])
        .unwrap();
    assert_eq!(url, "/owners/jo/pets/9");
    assert!(common::get(&dispatcher, &url).await.is_ok());
    assert!(dispatcher.url_for("owner_pet", &[("owner", "jo")]).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_the_pool() {
    let mut dispatcher = common::dispatcher(4);
    dispatcher
        .register(
            Method::GET,
            "/work/{n:int}",
            RouteDefinition::blocking(|args| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(json!(args.i64("n")? * 10))
            }),
        )
        .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let tasks = (0..16).map(|n| {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { common::get(&dispatcher, &format!("/work/{n}")).await })
    });
    let results = futures::future::join_all(tasks).await;
    for (n, result) in results.into_iter().enumerate() {
        let resp = result.unwrap().unwrap();
        assert_eq!(resp.body, json!(n * 10));
    }

    let metrics = dispatcher.worker_pool_metrics();
    assert_eq!(metrics.completed, 16);
}
