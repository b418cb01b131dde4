//! In-process fake of the WordPress REST API used by the integration tests

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use wp_todo::http::ClientOptions;
use wp_todo::models::Credentials;
use wp_todo::{RemindersBridge, Store, SyncEngine};

pub const COLLECTION: &str = "/wp-json/wp/v2/todo";

/// One request as the fake saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub base: String,
    pub with_plugin: bool,
    pub posts: BTreeMap<u64, Value>,
    pub terms: Vec<Value>,
    pub next_id: u64,
    pub requests: Vec<Recorded>,
    /// Post ids whose updates are rejected.
    pub failing: BTreeSet<u64>,
    /// Post ids whose updates answer 200 with an error object.
    pub failing_in_band: BTreeSet<u64>,
    /// Origin the route index advertises, when not the site's own.
    pub route_origin: Option<String>,
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeWp {
    pub base: String,
    state: Shared,
}

impl FakeWp {
    /// Site with the to-do plugin installed.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    pub async fn start_with(with_plugin: bool) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(Mutex::new(FakeState {
            base: base.clone(),
            with_plugin,
            next_id: 1000,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/", get(index))
            .route("/wp-json/wp/v2/users/me", get(current_user))
            .route("/wp-json/wp/v2/types", get(types))
            .route("/wp-json/wp/v2/taxonomies", get(taxonomies))
            .route("/wp-json/wp/v2/notebook", get(terms))
            .route(COLLECTION, get(list_posts).post(create_post))
            .route(
                "/wp-json/wp/v2/todo/{id}",
                axum::routing::post(update_post).delete(delete_post),
            )
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, state }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn seed_post(&self, id: u64, title: &str, status: &str, terms: &[u64]) {
        self.seed_post_with(id, title, status, terms, json!([]));
    }

    pub fn seed_post_with(&self, id: u64, title: &str, status: &str, terms: &[u64], meta: Value) {
        self.state().posts.insert(
            id,
            json!({
                "id": id,
                "title": { "raw": title, "rendered": title },
                "excerpt": { "raw": "", "rendered": "" },
                "status": status,
                "meta": meta,
                "notebook": terms,
            }),
        );
    }

    pub fn set_excerpt(&self, id: u64, excerpt: &str) {
        if let Some(post) = self.state().posts.get_mut(&id) {
            post["excerpt"] = json!({ "raw": excerpt, "rendered": excerpt });
        }
    }

    pub fn add_term(&self, id: u64, slug: &str, meta: Value) {
        self.state().terms.push(json!({
            "id": id,
            "slug": slug,
            "name": slug,
            "parent": 0,
            "meta": meta,
        }));
    }

    pub fn fail_updates_of(&self, id: u64) {
        self.state().failing.insert(id);
    }

    pub fn fail_updates_in_band(&self, id: u64) {
        self.state().failing_in_band.insert(id);
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.failing.clear();
        state.failing_in_band.clear();
    }

    /// Make the route index point at another origin, like a `www.` canonical host.
    pub fn advertise_routes_at(&self, origin: &str) {
        self.state().route_origin = Some(origin.to_string());
    }

    /// `host:port` of the site, without a scheme.
    pub fn host(&self) -> &str {
        self.base.trim_start_matches("http://")
    }

    pub fn post(&self, id: u64) -> Option<Value> {
        self.state().posts.get(&id).cloned()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Recorded requests with this method and path.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::from_parts("ann", "abcd efgh ijkl", "")
    }

    /// Engine connected to this site and backed by an in-memory store.
    pub async fn engine(&self, bridge: Box<dyn RemindersBridge>) -> SyncEngine {
        let store = Store::open_in_memory().unwrap();
        let mut engine = SyncEngine::new(store, bridge, &ClientOptions::default()).unwrap();
        engine.connect(&self.base, self.credentials()).await.unwrap();
        engine
    }
}

fn record(state: &mut FakeState, method: &str, path: String, query: HashMap<String, String>, body: Option<Value>) {
    state.requests.push(Recorded {
        method: method.to_string(),
        path,
        query,
        body,
    });
}

fn wp_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "message": message,
            "data": { "status": status.as_u16() },
        })),
    )
        .into_response()
}

fn link(href: String) -> Value {
    json!({ "self": [{ "href": href }] })
}

async fn index(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", "/".into(), query.clone(), None);

    if query.get("rest_route").map(String::as_str) != Some("/") {
        return (StatusCode::OK, "<html>Just another WordPress site</html>").into_response();
    }

    let base = state.base.clone();
    let origin = state.route_origin.clone().unwrap_or_else(|| base.clone());
    let api = format!("{}/wp-json/wp/v2", origin);
    Json(json!({
        "name": "Fake Site",
        "home": base,
        "url": base,
        "routes": {
            "/": {},
            "/wp/v2/users/me": { "_links": link(format!("{api}/users/me")) },
            "/wp/v2/types": { "_links": link(format!("{api}/types")) },
            "/wp/v2/taxonomies": { "_links": link(format!("{api}/taxonomies")) },
            "/wp/v2/todo": { "_links": link(format!("{api}/todo")) },
            "/acme/v1/users/me": {},
        }
    }))
    .into_response()
}

async fn current_user(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", "/wp-json/wp/v2/users/me".into(), HashMap::new(), None);

    if !headers.contains_key(header::AUTHORIZATION) {
        return wp_error(
            StatusCode::UNAUTHORIZED,
            "rest_not_logged_in",
            "You are not currently logged in.",
        );
    }

    Json(json!({
        "id": 1,
        "name": "Ann",
        "avatar_urls": { "24": "https://gravatar.test/24", "96": "https://gravatar.test/96" },
    }))
    .into_response()
}

async fn types(State(state): State<Shared>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", "/wp-json/wp/v2/types".into(), HashMap::new(), None);

    let api = format!("{}/wp-json/wp/v2", state.base);
    let mut types = Map::new();
    types.insert(
        "post".into(),
        json!({
            "slug": "post", "name": "Posts", "rest_base": "posts",
            "_links": { "wp:items": [{ "href": format!("{api}/posts") }] },
        }),
    );
    if state.with_plugin {
        types.insert(
            "todo".into(),
            json!({
                "slug": "todo", "name": "To-dos", "rest_base": "todo",
                "_links": { "wp:items": [{ "href": format!("{api}/todo") }] },
            }),
        );
    }
    Json(Value::Object(types)).into_response()
}

async fn taxonomies(State(state): State<Shared>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", "/wp-json/wp/v2/taxonomies".into(), HashMap::new(), None);

    let api = format!("{}/wp-json/wp/v2", state.base);
    let mut taxonomies = Map::new();
    taxonomies.insert(
        "category".into(),
        json!({
            "slug": "category", "name": "Categories", "rest_base": "categories", "types": ["post"],
            "_links": { "wp:items": [{ "href": format!("{api}/categories") }] },
        }),
    );
    if state.with_plugin {
        taxonomies.insert(
            "notebook".into(),
            json!({
                "slug": "notebook", "name": "Notebooks", "rest_base": "notebook", "types": ["todo"],
                "_links": { "wp:items": [{ "href": format!("{api}/notebook") }] },
            }),
        );
    }
    Json(Value::Object(taxonomies)).into_response()
}

async fn terms(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", "/wp-json/wp/v2/notebook".into(), query, None);
    Json(Value::Array(state.terms.clone())).into_response()
}

async fn list_posts(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", COLLECTION.into(), query.clone(), None);

    let per_page: usize = query.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(10);
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let status = query.get("status").cloned().unwrap_or_else(|| "publish".into());

    let matching: Vec<Value> = state
        .posts
        .values()
        .filter(|p| p["status"] == status.as_str())
        .cloned()
        .collect();

    let start = (page - 1) * per_page;
    if page > 1 && start >= matching.len() {
        return wp_error(
            StatusCode::BAD_REQUEST,
            "rest_post_invalid_page_number",
            "The page number requested is larger than the number of pages available.",
        );
    }

    let batch: Vec<Value> = matching.into_iter().skip(start).take(per_page).collect();
    Json(Value::Array(batch)).into_response()
}

fn apply(post: &mut Value, body: &Value) {
    if let Some(title) = body.get("title").and_then(Value::as_str) {
        post["title"] = json!({ "raw": title, "rendered": title });
    }
    if let Some(status) = body.get("status") {
        post["status"] = status.clone();
    }
    if let Some(excerpt) = body.get("excerpt").and_then(Value::as_str) {
        post["excerpt"] = json!({ "raw": excerpt, "rendered": excerpt });
    }
    if let Some(Value::Object(meta)) = body.get("meta") {
        if !post["meta"].is_object() {
            post["meta"] = json!({});
        }
        for (k, v) in meta {
            post["meta"][k] = v.clone();
        }
    }
    if let Some(terms) = body.get("notebook") {
        post["notebook"] = terms.clone();
    }
}

async fn create_post(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "POST", COLLECTION.into(), HashMap::new(), Some(body.clone()));

    state.next_id += 1;
    let id = state.next_id;
    let mut post = json!({
        "id": id,
        "title": { "raw": "", "rendered": "" },
        "excerpt": { "raw": "", "rendered": "" },
        "status": "draft",
        "meta": [],
        "notebook": [],
    });
    apply(&mut post, &body);
    state.posts.insert(id, post.clone());

    (StatusCode::CREATED, Json(post)).into_response()
}

async fn update_post(
    State(state): State<Shared>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "POST", format!("{COLLECTION}/{id}"), HashMap::new(), Some(body.clone()));

    if state.failing.contains(&id) {
        return wp_error(
            StatusCode::FORBIDDEN,
            "rest_cannot_edit",
            "Sorry, you are not allowed to edit this post.",
        );
    }
    if state.failing_in_band.contains(&id) {
        return wp_error(
            StatusCode::OK,
            "rest_invalid_param",
            "Invalid parameter(s): meta",
        );
    }
    let Some(post) = state.posts.get_mut(&id) else {
        return wp_error(StatusCode::NOT_FOUND, "rest_post_invalid_id", "Invalid post ID.");
    };
    apply(post, &body);
    Json(post.clone()).into_response()
}

async fn delete_post(State(state): State<Shared>, Path(id): Path<u64>) -> Response {
    let mut state = state.lock().unwrap();
    record(&mut state, "DELETE", format!("{COLLECTION}/{id}"), HashMap::new(), None);

    let Some(post) = state.posts.get_mut(&id) else {
        return wp_error(StatusCode::NOT_FOUND, "rest_post_invalid_id", "Invalid post ID.");
    };
    post["status"] = json!("trash");
    Json(post.clone()).into_response()
}
