//! Site capability discovery: REST root, current user, content types and taxonomies

use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ApiError, ConnectError};
use crate::http::{WpClient, origin_of};
use crate::models::{ContentType, Credentials, SiteConfiguration, Taxonomy};

/// Content type registered by the to-do plugin.
pub const PLUGIN_POST_TYPE: &str = "todo";
/// Taxonomy registered by the to-do plugin.
pub const PLUGIN_TAXONOMY: &str = "notebook";
/// Fallback content type when the plugin is absent.
pub const DEFAULT_POST_TYPE: &str = "post";
/// REST API host for sites hosted on WordPress.com.
pub const HOSTED_API_BASE: &str = "https://public-api.wordpress.com";

const HOSTED_DOMAIN: &str = "wordpress.com";

/// The REST index document (`?rest_route=/`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub site_icon_url: Option<String>,
    #[serde(default)]
    pub routes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar_urls: BTreeMap<String, String>,
}

/// A WordPress.com site picked during OAuth sign-in
#[derive(Debug, Clone)]
pub struct HostedSite {
    pub id: u64,
    pub url: String,
    pub name: String,
    pub icon_url: Option<String>,
}

/// What a successful connect attempt learned about the site
#[derive(Debug, Clone, Default)]
pub struct SiteDiscovery {
    /// Address the user typed, with the scheme that worked.
    pub site_url: String,
    pub rest_root: String,
    pub site_home: Option<String>,
    pub site_title: Option<String>,
    pub site_icon_url: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub post_types: Vec<ContentType>,
    pub taxonomies: BTreeMap<String, Taxonomy>,
    pub post_type: String,
    pub taxonomy: Option<String>,
    pub plugin_detected: bool,
}

impl SiteDiscovery {
    /// Merge into `site`, leaving fields discovery did not fetch untouched.
    pub fn apply_to(self, site: &mut SiteConfiguration) {
        site.rest_root = self.rest_root;
        if let Some(home) = self.site_home {
            site.site_home = home;
        }
        if let Some(title) = self.site_title {
            site.site_title = title;
        }
        if let Some(icon) = self.site_icon_url {
            site.site_icon_url = icon;
        }
        if let Some(username) = self.username {
            site.username = username;
        }
        if let Some(avatar) = self.avatar_url {
            site.avatar_url = avatar;
        }
        site.post_types = self.post_types;
        site.taxonomies = self.taxonomies;
        site.post_type = self.post_type;
        if self.taxonomy.is_some() {
            site.taxonomy = self.taxonomy;
        }
    }
}

/// Discover a self-hosted site and authenticate against it.
///
/// A bare host is tried over `https` first, then `http`. On success `client`
/// carries `credentials` and trusts only the origin that answered.
pub async fn connect(
    client: &mut WpClient,
    url: &str,
    credentials: Credentials,
) -> Result<SiteDiscovery, ConnectError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConnectError::InvalidUrl(url.to_string()));
    }

    let mut found = None;
    for candidate in candidate_urls(url) {
        let index = match discovery_url(&candidate) {
            Ok(index) => index,
            Err(_) => continue,
        };
        match client.get_anonymous(&index).await {
            Ok((final_url, body)) => {
                found = Some((candidate, final_url, body));
                break;
            }
            Err(e) => {
                tracing::info!(url = %index, error = %e, "REST index not reachable");
            }
        }
    }

    let Some((site_url, final_url, body)) = found else {
        return Err(unreachable_error(url));
    };

    let root: RootDocument = serde_json::from_value(body).map_err(|source| ApiError::Shape {
        url: final_url.to_string(),
        source,
    })?;
    let rest_root = strip_query(&final_url);

    client.set_credentials(credentials);
    client.trust_origin_of(&rest_root)?;

    let mut discovery = enumerate(client, &root, &rest_root).await?;
    discovery.site_url = site_url;
    discovery.site_home = Some(root.home.clone()).filter(|h| !h.is_empty());
    discovery.site_title = Some(root.name.clone()).filter(|n| !n.is_empty());
    discovery.site_icon_url = root.site_icon_url.clone().filter(|i| !i.is_empty());

    Ok(discovery)
}

/// Discover a WordPress.com site through the hosted REST API with an OAuth token.
pub async fn connect_hosted(
    client: &mut WpClient,
    api_base: &str,
    site: &HostedSite,
    token: &str,
) -> Result<SiteDiscovery, ConnectError> {
    let index = format!("{}/wp/v2/sites/{}/", api_base.trim_end_matches('/'), site.id);
    let (final_url, body) = client
        .get_anonymous(&index)
        .await
        .map_err(|_| ConnectError::Unreachable { url: index.clone() })?;

    let root: RootDocument = serde_json::from_value(body).map_err(|source| ApiError::Shape {
        url: final_url.to_string(),
        source,
    })?;
    let rest_root = strip_query(&final_url);

    client.set_credentials(Credentials::Bearer {
        token: token.to_string(),
    });
    client.trust_origin_of(&rest_root)?;

    let mut discovery = enumerate(client, &root, &rest_root).await?;
    discovery.site_url = site.url.clone();
    discovery.site_home = Some(site.url.clone());
    discovery.site_title = Some(site.name.clone());
    discovery.site_icon_url = site.icon_url.clone();

    Ok(discovery)
}

/// Authenticate and list types/taxonomies using the routes of `root`.
async fn enumerate(
    client: &WpClient,
    root: &RootDocument,
    rest_root: &str,
) -> Result<SiteDiscovery, ConnectError> {
    let me_url =
        route_href(&root.routes, "/users/me", rest_root).ok_or(ConnectError::MissingRoute("/users/me"))?;
    let types_url =
        route_href(&root.routes, "/types", rest_root).ok_or(ConnectError::MissingRoute("/types"))?;
    let taxonomies_url = route_href(&root.routes, "/taxonomies", rest_root)
        .ok_or(ConnectError::MissingRoute("/taxonomies"))?;
    for url in [&me_url, &types_url, &taxonomies_url] {
        same_origin(rest_root, url)?;
    }

    let user: CurrentUser = client.get_as(&me_url).await?;
    tracing::info!(user = %user.name, "Authenticated");

    let (types, taxonomies) = futures::try_join!(
        client.get_as::<BTreeMap<String, ContentType>>(&types_url),
        client.get_as::<BTreeMap<String, Taxonomy>>(&taxonomies_url),
    )?;

    let plugin_detected =
        types.contains_key(PLUGIN_POST_TYPE) && taxonomies.contains_key(PLUGIN_TAXONOMY);

    let (post_type, taxonomy) = if plugin_detected {
        tracing::info!("To-do plugin detected");
        (
            PLUGIN_POST_TYPE.to_string(),
            Some(PLUGIN_TAXONOMY.to_string()),
        )
    } else {
        (DEFAULT_POST_TYPE.to_string(), None)
    };

    Ok(SiteDiscovery {
        rest_root: rest_root.to_string(),
        username: Some(user.name),
        avatar_url: user.avatar_urls.get("96").cloned(),
        post_types: types.into_values().collect(),
        taxonomies,
        post_type,
        taxonomy,
        plugin_detected,
        ..Default::default()
    })
}

/// Routes must live where the index was served, since credentials go nowhere else.
fn same_origin(rest_root: &str, url: &str) -> Result<(), ConnectError> {
    let expected = origin_of(rest_root)?;
    let found = origin_of(url)?;
    if expected == found {
        Ok(())
    } else {
        Err(ConnectError::OriginMismatch { expected, found })
    }
}

/// `url` if it has a scheme, otherwise the https then http variants.
pub fn candidate_urls(url: &str) -> Vec<String> {
    if has_scheme(url) {
        vec![url.to_string()]
    } else {
        vec![normalize_url(url, "https"), normalize_url(url, "http")]
    }
}

/// Prefix `scheme://` unless the address already has one.
pub fn normalize_url(url: &str, scheme: &str) -> String {
    if has_scheme(url) {
        url.to_string()
    } else {
        format!("{}://{}", scheme, url)
    }
}

fn has_scheme(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// REST index address for a site base.
pub fn discovery_url(base: &str) -> Result<String, ApiError> {
    let mut url = Url::parse(base).map_err(|e| ApiError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair("rest_route", "/");
    Ok(url.to_string())
}

/// Whether the address belongs to WordPress.com hosting.
pub fn is_hosted_platform(url: &str) -> bool {
    Url::parse(&normalize_url(url, "https"))
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| host == HOSTED_DOMAIN || host.ends_with(&format!(".{}", HOSTED_DOMAIN)))
}

fn unreachable_error(url: &str) -> ConnectError {
    if is_hosted_platform(url) {
        let host = Url::parse(&normalize_url(url, "https"))
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        ConnectError::HostedPlatform { host }
    } else {
        ConnectError::Unreachable {
            url: url.to_string(),
        }
    }
}

fn strip_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// Endpoint of the first route whose path ends with `suffix`.
///
/// Core `wp/v2` routes win over plugin namespaces. Routes without a `self`
/// link are addressed through `?rest_route=` on the REST root.
pub fn route_href(routes: &Map<String, Value>, suffix: &str, rest_root: &str) -> Option<String> {
    let mut matches: Vec<(&String, &Value)> = routes
        .iter()
        .filter(|(route, _)| route.ends_with(suffix))
        .collect();
    matches.sort_by_key(|(route, _)| (!route.starts_with("/wp/v2"), route.len()));

    let (route, descriptor) = matches.into_iter().next()?;
    self_link(descriptor).or_else(|| {
        let mut url = Url::parse(rest_root).ok()?;
        url.query_pairs_mut().append_pair("rest_route", route);
        Some(url.to_string())
    })
}

fn self_link(descriptor: &Value) -> Option<String> {
    match descriptor.get("_links")?.get("self")? {
        Value::String(href) => Some(href.clone()),
        Value::Array(links) => links
            .first()
            .and_then(|l| l.get("href"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
