use super::{ParamKind, RegisterError, RouteError, Router};
use http::Method;
use serde_json::json;

fn router_with(routes: &[(Method, &str, &'static str)]) -> Router<&'static str> {
    let mut router = Router::new();
    for (method, pattern, handler) in routes {
        router
            .register(method.clone(), pattern, *handler, &[])
            .unwrap();
    }
    router
}

#[test]
fn test_static_and_dynamic_split() {
    let router = router_with(&[
        (Method::GET, "/items", "list"),
        (Method::GET, "/items/{id}", "detail"),
        (Method::POST, "/items", "create"),
    ]);
    assert_eq!(router.len(), 3);
    assert_eq!(router.static_len(), 2);
    assert_eq!(router.dynamic_len(), 1);
    assert!(router.routes()[0].is_static);
    assert!(!router.routes()[1].is_static);
}

#[test]
fn test_route_ids_follow_registration_order() {
    let mut router = Router::new();
    let a = router.register(Method::GET, "/a", 'a', &[]).unwrap();
    let b = router.register(Method::GET, "/b/{x}", 'b', &[]).unwrap();
    assert_eq!((a, b), (0, 1));
    assert_eq!(router.route(b).unwrap().handler, 'b');
}

#[test]
fn test_declared_kind_overrides_inline() {
    let mut router = Router::new();
    router
        .register(Method::GET, "/v/{n:int}", (), &[("n", ParamKind::Float)])
        .unwrap();
    let m = router.match_route(&Method::GET, "/v/1.5").unwrap();
    assert_eq!(m.get_path_param("n"), Some(&json!(1.5)));
}

#[test]
fn test_undeclared_placeholder_defaults_to_str() {
    let router = router_with(&[(Method::GET, "/tags/{tag}", "tag")]);
    let m = router.match_route(&Method::GET, "/tags/007").unwrap();
    assert_eq!(m.get_path_param("tag"), Some(&json!("007")));
}

#[test]
fn test_unknown_declared_param_rejected() {
    let mut router: Router<()> = Router::new();
    let err = router
        .register(Method::GET, "/users/{id}", (), &[("user_id", ParamKind::Int)])
        .unwrap_err();
    assert!(matches!(err, RegisterError::UnknownParam { ref name, .. } if name == "user_id"));
    assert!(router.is_empty());
}

#[test]
fn test_conflict_only_for_same_method_and_static_path() {
    let mut router = Router::new();
    router.register(Method::GET, "/health", 1, &[]).unwrap();
    router.register(Method::HEAD, "/health", 2, &[]).unwrap();

    let err = router.register(Method::GET, "/health/", 3, &[]).unwrap_err();
    match err {
        RegisterError::Conflict(c) => {
            assert_eq!(c.path, "/health");
            assert_eq!(c.existing, 0);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Overlapping dynamic routes are allowed
    router.register(Method::GET, "/{a}", 4, &[]).unwrap();
    router.register(Method::GET, "/{b}", 5, &[]).unwrap();
    assert_eq!(router.len(), 4);
}

#[test]
fn test_percent_decoding_before_conversion() {
    let router = router_with(&[(Method::GET, "/search/{term}", "search")]);
    let m = router.match_route(&Method::GET, "/search/hello%20world").unwrap();
    assert_eq!(m.get_path_param("term"), Some(&json!("hello world")));
}

#[test]
fn test_query_suffix_and_slashes_ignored() {
    let router = router_with(&[(Method::GET, "/a/b", "ab")]);
    assert!(router.match_route(&Method::GET, "/a/b/").is_ok());
    assert!(router.match_route(&Method::GET, "//a//b").is_ok());
    assert!(router.match_route(&Method::GET, "/a/b?x=1").is_ok());
}

#[test]
fn test_static_terminal_other_method_falls_back_to_dynamic() {
    let router = router_with(&[
        (Method::GET, "/items", "list"),
        (Method::POST, "/{collection}", "create_any"),
    ]);
    let m = router.match_route(&Method::POST, "/items").unwrap();
    assert_eq!(*m.handler(), "create_any");
}

#[test]
fn test_allowed_methods_are_sorted_and_merged() {
    let router = router_with(&[
        (Method::PUT, "/things", "put"),
        (Method::GET, "/things", "get"),
        (Method::DELETE, "/{any}", "delete"),
    ]);
    match router.match_route(&Method::PATCH, "/things") {
        Err(RouteError::MethodNotAllowed { allowed, .. }) => {
            assert_eq!(allowed, vec![Method::DELETE, Method::GET, Method::PUT]);
        }
        other => panic!("expected 405, got {other:?}"),
    }
}

#[test]
fn test_conversion_failure_does_not_try_later_routes() {
    let mut router = Router::new();
    router
        .register(Method::GET, "/n/{id}", "int", &[("id", ParamKind::Int)])
        .unwrap();
    router.register(Method::GET, "/n/{slug}", "str", &[]).unwrap();

    let err = router.match_route(&Method::GET, "/n/abc").unwrap_err();
    assert!(matches!(err, RouteError::ParamConversion(ref e) if e.name.as_ref() == "id"));
}

#[test]
fn test_named_routes_and_url_for() {
    let mut router = Router::new();
    let id = router
        .register(Method::GET, "/users/{id}/files/{name}", (), &[])
        .unwrap();
    router.set_name(id, "user_file").unwrap();
    assert_eq!(router.name_of(id), Some("user_file"));

    let url = router
        .url_for("user_file", &[("id", "7"), ("name", "a b.txt")])
        .unwrap();
    assert_eq!(url, "/users/7/files/a%20b.txt");

    assert!(router.url_for("user_file", &[("id", "7")]).is_err());
    assert!(router.url_for("nope", &[]).is_err());
}

#[test]
fn test_duplicate_route_name_rejected() {
    let mut router = Router::new();
    let a = router.register(Method::GET, "/a", (), &[]).unwrap();
    let b = router.register(Method::GET, "/b", (), &[]).unwrap();
    router.set_name(a, "home").unwrap();
    router.set_name(a, "home").unwrap();
    assert!(matches!(
        router.set_name(b, "home"),
        Err(RegisterError::DuplicateName { .. })
    ));
    assert!(matches!(
        router.set_name(99, "other"),
        Err(RegisterError::UnknownRoute(99))
    ));
}

#[test]
fn test_path_patterns_in_order() {
    let router = router_with(&[
        (Method::GET, "/z", "z"),
        (Method::GET, "/a/{id}", "a"),
    ]);
    assert_eq!(router.path_patterns(), vec!["/z", "/a/{id}"]);
}

#[test]
fn test_non_ascii_literals_match_encoded_paths() {
    let mut router = router_with(&[
        (Method::GET, "/café", "cafe"),
        (Method::GET, "/menú/{item}", "menu_item"),
    ]);

    let m = router.match_route(&Method::GET, "/caf%C3%A9").unwrap();
    assert_eq!(*m.handler(), "cafe");
    let m = router.match_route(&Method::GET, "/café").unwrap();
    assert_eq!(*m.handler(), "cafe");

    let m = router.match_route(&Method::GET, "/men%C3%BA/taco%20al%20pastor").unwrap();
    assert_eq!(*m.handler(), "menu_item");
    assert_eq!(m.get_path_param("item"), Some(&json!("taco al pastor")));
    assert!(router.match_route(&Method::GET, "/menú/taco").is_ok());

    // Reverse routing encodes the literal too and round-trips
    let id = router.routes()[1].id;
    router.set_name(id, "menu_item").unwrap();
    let url = router.url_for("menu_item", &[("item", "flan")]).unwrap();
    assert_eq!(url, "/men%C3%BA/flan");
    assert_eq!(*router.match_route(&Method::GET, &url).unwrap().handler(), "menu_item");
}
